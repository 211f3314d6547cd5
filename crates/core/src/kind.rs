//! Job kinds (closed set of tagged variants).

use core::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::JobError;

/// Job kind key used to route a job to its handler.
///
/// The set is closed; every variant has a built-in handler. Payload shapes:
///
/// - `Command`: `{"program": "backup", "args": ["--full"]}`
/// - `Shell`: `{"command": "echo hi"}`
/// - `Closure`: any JSON value (describes the closure; the invocable lives on the job)
/// - `Event`: `{"event": "report.ready", "data": {...}}`
/// - `Url`: `{"url": "https://...", "method": "GET", "body": {...}}`
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Command,
    Shell,
    Closure,
    Event,
    Url,
}

impl JobKind {
    pub const ALL: [JobKind; 5] = [
        JobKind::Command,
        JobKind::Shell,
        JobKind::Closure,
        JobKind::Event,
        JobKind::Url,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Command => "command",
            JobKind::Shell => "shell",
            JobKind::Closure => "closure",
            JobKind::Event => "event",
            JobKind::Url => "url",
        }
    }

    /// Structural check of a payload against this kind's contract.
    pub fn validate_payload(&self, payload: &JsonValue) -> Result<(), JobError> {
        match self {
            JobKind::Command => {
                require_str(self, payload, "program")?;
                match payload.get("args") {
                    None | Some(JsonValue::Null) => Ok(()),
                    Some(JsonValue::Array(args)) if args.iter().all(JsonValue::is_string) => Ok(()),
                    Some(_) => Err(JobError::invalid_job(
                        "command payload `args` must be an array of strings",
                    )),
                }
            }
            JobKind::Shell => require_str(self, payload, "command").map(|_| ()),
            JobKind::Closure => Ok(()),
            JobKind::Event => require_str(self, payload, "event").map(|_| ()),
            JobKind::Url => {
                let url = require_str(self, payload, "url")?;
                if !(url.starts_with("http://") || url.starts_with("https://")) {
                    return Err(JobError::invalid_job(format!(
                        "url payload must be http(s), got `{url}`"
                    )));
                }
                match payload.get("method").and_then(JsonValue::as_str) {
                    None | Some("GET") | Some("POST") => Ok(()),
                    Some(other) => Err(JobError::invalid_job(format!(
                        "unsupported url method `{other}`"
                    ))),
                }
            }
        }
    }
}

fn require_str<'a>(
    kind: &JobKind,
    payload: &'a JsonValue,
    field: &str,
) -> Result<&'a str, JobError> {
    match payload.get(field).and_then(JsonValue::as_str) {
        Some(s) if !s.trim().is_empty() => Ok(s),
        _ => Err(JobError::invalid_job(format!(
            "{} payload requires a non-empty string `{field}`",
            kind.as_str()
        ))),
    }
}

impl core::fmt::Display for JobKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobKind {
    type Err = JobError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobKind::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| JobError::invalid_job(format!("unknown job kind `{s}`")))
    }
}
