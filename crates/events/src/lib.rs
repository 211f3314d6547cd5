//! Queue envelopes, backend contracts and the job event bus.
//!
//! Everything a queue backend needs to plug into the lifecycle engine lives
//! here: the normalized `JobEnvelope`, the `Worker`/`Queue` contracts and an
//! in-memory backend for tests/dev.

pub mod bus;
pub mod envelope;
pub mod event;
pub mod in_memory_bus;
pub mod in_memory_queue;
pub mod worker;

pub use bus::{BusError, EventBus, Subscription};
pub use envelope::{BackendMeta, JobEnvelope, RawRef};
pub use event::JobEvent;
pub use in_memory_bus::InMemoryEventBus;
pub use in_memory_queue::InMemoryQueue;
pub use worker::{Queue, Worker, WorkerError};
