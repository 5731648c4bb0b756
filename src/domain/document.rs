use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::domain::state::epoch_ms;

/// A queueable payload.
///
/// The queue is opaque to the payload's content; the only capability it
/// requires is a stable, non-empty string ID, which is the sole identity
/// used for keying, locking, and state tracking. Two pushes with the same ID
/// refer to the same logical document.
pub trait Document: Serialize + DeserializeOwned + Send + Sync + 'static {
    fn id(&self) -> &str;
}

/// A document together with the instant it was accepted by `push`.
///
/// The timestamp is assigned once at enqueue and never updated; consumers
/// use it to skip documents that have grown too old to be worth running.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimedPayload<D> {
    pub document: D,
    pub enqueued_at_ms: i64,
}

impl<D: Document> TimedPayload<D> {
    pub fn new(document: D) -> Self {
        Self {
            document,
            enqueued_at_ms: epoch_ms(),
        }
    }

    /// Age of the payload relative to `now_ms`, saturating at zero for
    /// clocks that run backwards across processes.
    pub fn age_ms(&self, now_ms: i64) -> i64 {
        (now_ms - self.enqueued_at_ms).max(0)
    }
}
