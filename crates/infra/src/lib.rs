//! Infrastructure layer: scheduler, executor, lifecycle coordinator, and the
//! cron and queue runners that drive them.

pub mod jobs;

#[cfg(test)]
mod integration_tests;
