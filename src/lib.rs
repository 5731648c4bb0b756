//! Durable, at-least-once job queue on top of Redis.
//!
//! Producers [`push`](infrastructure::queue::redis_queue::RedisQueue::push)
//! documents identified by a stable string ID; consumer processes claim them
//! off a ready list, run a user-supplied [`JobHandler`](workers::scheduler::JobHandler),
//! and publish every state transition on a per-document channel. A recovery
//! sweep resurrects documents claimed by consumers that died mid-job, so an
//! accepted document always ends up `DONE`, `FAILED`, or back in the ready
//! list.
//!
//! All coordination happens through the Redis store: lists for the ready and
//! processing queues, short-TTL lock keys for consumer liveness, and pub/sub
//! for synchronous completion waits.

pub mod config;
pub mod domain;
pub mod infrastructure;
pub mod workers;

pub use config::{ConfigError, QueueConfig};
pub use domain::document::{Document, TimedPayload};
pub use domain::errors::{QueueError, WaitError};
pub use domain::state::{ExtendedStateInfo, JobState, StateInfo};
pub use infrastructure::codec::{Codec, JsonCodec};
pub use infrastructure::monitoring::{
    InMemoryRecorder, NoopRecorder, QueueRecorder, RecorderSnapshot,
};
pub use infrastructure::queue::redis_queue::{RedisQueue, RedisQueueBuilder, StateWait};
pub use workers::scheduler::JobHandler;
