/// Value written to the per-document lock key. Only the key's presence
/// matters; the value is never inspected.
pub const LOCK_SENTINEL: &str = "locked";

/// Reserved channel message telling waiters their document was dropped.
/// Distinguishable from any encoded state record, which is a JSON object.
pub const STOP_MESSAGE: &str = "STOP";

/// Deterministic mapping from a queue name and document ID to the Redis
/// keys, lists, and channels the queue uses.
///
/// Every derived name embeds the queue name, so any number of queues can
/// share one Redis database without collisions.
#[derive(Debug, Clone)]
pub struct KeySpace {
    prefix: String,
    ready: String,
    processing: String,
    state_pattern: String,
}

impl KeySpace {
    pub fn new(queue_name: &str) -> Self {
        let prefix = format!("relayq:{}", queue_name);
        Self {
            ready: format!("{}:ready", prefix),
            processing: format!("{}:processing", prefix),
            state_pattern: format!("{}:state:*", prefix),
            prefix,
        }
    }

    /// List of IDs awaiting a consumer claim.
    pub fn ready(&self) -> &str {
        &self.ready
    }

    /// List of IDs a consumer has claimed but not acknowledged completed.
    pub fn processing(&self) -> &str {
        &self.processing
    }

    /// Serialized timed payload of a document.
    pub fn content(&self, id: &str) -> String {
        format!("{}:content:{}", self.prefix, id)
    }

    /// Serialized state record of a document.
    pub fn state(&self, id: &str) -> String {
        format!("{}:state:{}", self.prefix, id)
    }

    /// Short-TTL ownership marker of a document.
    pub fn lock(&self, id: &str) -> String {
        format!("{}:lock:{}", self.prefix, id)
    }

    /// Pub/sub channel carrying the document's state records, or
    /// [`STOP_MESSAGE`].
    pub fn state_channel(&self, id: &str) -> String {
        format!("{}:channel:{}", self.prefix, id)
    }

    /// `KEYS` pattern matching every state record of this queue.
    pub fn state_pattern(&self) -> &str {
        &self.state_pattern
    }
}
