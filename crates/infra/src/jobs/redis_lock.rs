//! Redis-backed single-instance lock store (optional).
//!
//! `SET key token NX PX ttl` to acquire, compare-and-delete script to
//! release, so a run can only clear its own lock.

use std::time::Duration;

use cronq_core::JobError;

use super::lock::LockStore;

const DEFAULT_PREFIX: &str = "cronq:lock:";

const RELEASE_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
else
    return 0
end
"#;

#[derive(Debug, Clone)]
pub struct RedisLockStore {
    client: redis::Client,
    prefix: String,
}

impl RedisLockStore {
    pub fn new(redis_url: impl AsRef<str>) -> Result<Self, JobError> {
        let client = redis::Client::open(redis_url.as_ref())
            .map_err(|e| JobError::lock(e.to_string()))?;
        Ok(Self {
            client,
            prefix: DEFAULT_PREFIX.to_string(),
        })
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    fn key(&self, name: &str) -> String {
        format!("{}{}", self.prefix, name)
    }

    fn connection(&self) -> Result<redis::Connection, JobError> {
        self.client
            .get_connection()
            .map_err(|e| JobError::lock(e.to_string()))
    }
}

impl LockStore for RedisLockStore {
    fn acquire(&self, name: &str, token: &str, ttl: Option<Duration>) -> Result<bool, JobError> {
        let mut conn = self.connection()?;
        let mut cmd = redis::cmd("SET");
        cmd.arg(self.key(name)).arg(token).arg("NX");
        if let Some(ttl) = ttl {
            cmd.arg("PX").arg(ttl.as_millis().max(1) as u64);
        }
        let reply: Option<String> = cmd
            .query(&mut conn)
            .map_err(|e| JobError::lock(e.to_string()))?;
        Ok(reply.is_some())
    }

    fn release(&self, name: &str, token: &str) -> Result<bool, JobError> {
        let mut conn = self.connection()?;
        let deleted: i64 = redis::Script::new(RELEASE_SCRIPT)
            .key(self.key(name))
            .arg(token)
            .invoke(&mut conn)
            .map_err(|e| JobError::lock(e.to_string()))?;
        Ok(deleted == 1)
    }

    fn holder(&self, name: &str) -> Result<Option<String>, JobError> {
        let mut conn = self.connection()?;
        redis::cmd("GET")
            .arg(self.key(name))
            .query(&mut conn)
            .map_err(|e| JobError::lock(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_prefixed() {
        let store = RedisLockStore::new("redis://127.0.0.1/").unwrap();
        assert_eq!(store.key("nightly"), "cronq:lock:nightly");
        assert_eq!(store.with_prefix("app:").key("nightly"), "app:nightly");
    }

    #[test]
    fn malformed_url_is_a_lock_error() {
        assert!(matches!(
            RedisLockStore::new("not a url"),
            Err(JobError::Lock(_))
        ));
    }
}
