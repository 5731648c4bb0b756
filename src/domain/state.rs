use std::fmt;

use serde::{Deserialize, Serialize};

/// Current epoch time in milliseconds, the timestamp unit used in every
/// stored record.
pub(crate) fn epoch_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Lifecycle state of a document.
///
/// The legal transitions are `New -> Processing` (consumer claim),
/// `Processing -> Done` (handler success) and `Processing -> Failed`
/// (handler error). `Done` and `Failed` are terminal: the queue never writes
/// a state record for a document again, it is simply evicted by TTL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    New,
    Processing,
    Done,
    Failed,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Done | JobState::Failed)
    }

    pub fn can_transition_to(self, next: JobState) -> bool {
        matches!(
            (self, next),
            (JobState::New, JobState::Processing)
                | (JobState::Processing, JobState::Done)
                | (JobState::Processing, JobState::Failed)
        )
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            JobState::New => "NEW",
            JobState::Processing => "PROCESSING",
            JobState::Done => "DONE",
            JobState::Failed => "FAILED",
        };
        f.write_str(name)
    }
}

/// A recorded state transition.
///
/// `info` is free-form; handlers put their error detail here when a document
/// fails.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateInfo {
    pub state: JobState,
    pub updated_at_ms: i64,
    #[serde(default)]
    pub info: String,
}

impl StateInfo {
    pub fn new(state: JobState, info: impl Into<String>) -> Self {
        Self {
            state,
            updated_at_ms: epoch_ms(),
            info: info.into(),
        }
    }
}

/// A state record together with the Redis key it was read from, as returned
/// when enumerating every known document of a queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtendedStateInfo {
    pub key: String,
    pub info: StateInfo,
}
