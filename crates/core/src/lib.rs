//! `cronq-core`: job model building blocks.
//!
//! This crate contains the **pure** job vocabulary shared by every driver:
//! the `Job` descriptor, its kinds, attempt results, configuration and the
//! error taxonomy. It performs no IO.

pub mod config;
pub mod error;
pub mod id;
pub mod job;
pub mod kind;
pub mod result;

pub use config::{RetryConfig, RunnerConfig};
pub use error::{JobError, JobResult};
pub use id::JobId;
pub use job::{Dependent, Job, JobClosure, Notifiable, Schedulable};
pub use kind::JobKind;
pub use result::{AttemptRecord, ExecutionResult, LifecycleOutcome};
