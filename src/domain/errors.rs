use std::time::Duration;

use thiserror::Error;

/// Failures surfaced by the producer-side operations (`push`, `set_state`,
/// `get_state`, length probes).
///
/// The consumer and recovery loops never surface this type to callers; they
/// log and move on, leaving cleanup to the recovery sweep.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("redis command failed: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("encoding payload failed: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("decoding stored record failed: {0}")]
    Decode(#[source] serde_json::Error),

    #[error("document id must not be empty")]
    EmptyId,
}

/// Failures of the state-wait primitives.
#[derive(Debug, Error)]
pub enum WaitError {
    /// The per-document channel subscription could not be established; no
    /// wait was started.
    #[error("state channel subscription could not be established: {0}")]
    Subscribe(#[source] redis::RedisError),

    #[error("timed out after {0:?} waiting for a matching state")]
    Timeout(Duration),

    /// The document was dropped by the recovery sweep; it will never reach
    /// the awaited states.
    #[error("document was abandoned and removed by the recovery sweep")]
    Stopped,

    #[error("state channel closed before a matching state arrived")]
    ChannelClosed,

    /// The push leg of `push_and_wait` failed; nothing was enqueued.
    #[error("push failed: {0}")]
    Push(#[source] QueueError),
}
