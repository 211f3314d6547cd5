//! Job scheduling and execution lifecycle.
//!
//! ## Components
//!
//! - `Scheduler`: registered jobs and their dependency order
//! - `JobExecutor`: one attempt of one job, with output capture and logging
//! - `JobLifecycleCoordinator`: retries, backoff, completion, single-instance lock
//! - `CronRunner` / `QueueRunner`: the two drivers
//! - `RetryPolicy` / `CompletionStrategy`: pluggable backoff and finalization
//! - `DeadLetterQueue`: jobs that exhausted their retry budget

pub mod capture;
pub mod completion;
pub mod context;
pub mod coordinator;
pub mod dead_letter;
pub mod executor;
pub mod handler;
pub mod handlers;
pub mod lock;
pub mod queue_runner;
#[cfg(feature = "redis")]
pub mod redis_lock;
pub mod requeue;
pub mod retry;
pub mod runner;
pub mod scheduler;
pub mod services;

#[cfg(test)]
pub(crate) mod test_support;

pub use capture::{OutputSink, merge_output};
pub use completion::{CompletionStrategy, CronCompletion, QueueCompletion, completion_for};
pub use context::{ExecutionContext, JobSource};
pub use coordinator::JobLifecycleCoordinator;
pub use dead_letter::{DeadLetterEntry, DeadLetterQueue, InMemoryDeadLetterQueue};
pub use executor::JobExecutor;
pub use handler::{Handler, HandlerError, HandlerOutput, HandlerRegistry};
pub use handlers::{ClosureHandler, CommandHandler, EventHandler, ShellHandler, UrlHandler};
pub use lock::{InMemoryLockStore, InstanceGuard, LockStore};
pub use queue_runner::{
    Dispatch, FinalizeMode, QueueRunner, QueueRunnerConfig, QueueRunnerHandle, QueueRunnerStats,
};
#[cfg(feature = "redis")]
pub use redis_lock::RedisLockStore;
pub use requeue::RequeueHelper;
pub use retry::{
    BackoffStrategy, ExponentialBackoff, FixedBackoff, NoBackoff, RetryPolicy, policy_from_config,
};
pub use runner::{AlwaysDue, CronRunner, DueOracle, JobRunSummary, PassReport, ScheduleTimestampDue};
pub use scheduler::Scheduler;
pub use services::{JobServices, JobServicesBuilder, RecordingSleeper, Sleeper, ThreadSleeper};
