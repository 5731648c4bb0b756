use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use relayq::{Document, JobHandler, JobState, QueueConfig, RedisQueue};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use uuid::Uuid;

/// Probe for a reachable Redis. Tests skip (pass vacuously, with a notice on
/// stderr) when none is running, so the suite works on machines without a
/// local Redis and exercises the full flows where one exists.
pub async fn connect() -> Option<redis::Client> {
    init_tracing();
    let url =
        std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());
    let client = redis::Client::open(url).ok()?;
    let mut conn = tokio::time::timeout(
        Duration::from_secs(1),
        client.get_multiplexed_async_connection(),
    )
    .await
    .ok()?
    .ok()?;
    redis::cmd("PING")
        .query_async::<String>(&mut conn)
        .await
        .ok()?;
    Some(client)
}

pub fn skip_notice(test: &str) {
    eprintln!("skipping {test}: no reachable Redis (set REDIS_URL to point at one)");
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("relayq=debug")),
        )
        .try_init();
}

/// Unique queue name per test run so leftovers from earlier runs can never
/// interfere.
pub fn unique_queue(prefix: &str) -> String {
    format!("{}-{}", prefix, Uuid::now_v7())
}

/// Short-fuse configuration so the suite runs in seconds. The state TTL
/// still has to clear the lock TTL by more than a minute.
pub fn test_config(name: &str) -> QueueConfig {
    let mut config = QueueConfig::new(name);
    config.pop_timeout = Duration::from_secs(1);
    config.lock_ttl = Duration::from_secs(1);
    config.state_ttl = Duration::from_secs(120);
    config.reap_interval = Duration::from_millis(500);
    config
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parcel {
    pub id: String,
    pub body: String,
}

impl Parcel {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            body: format!("payload for {id}"),
        }
    }
}

impl Document for Parcel {
    fn id(&self) -> &str {
        &self.id
    }
}

/// Handler that records every document it sees and optionally fails.
#[derive(Default)]
pub struct RecordingHandler {
    pub seen: Mutex<Vec<String>>,
    pub fail_with: Option<String>,
}

impl RecordingHandler {
    pub fn failing(message: &str) -> Self {
        Self {
            seen: Mutex::new(Vec::new()),
            fail_with: Some(message.to_string()),
        }
    }
}

#[async_trait]
impl JobHandler<Parcel> for RecordingHandler {
    async fn execute(&self, document: Parcel) -> anyhow::Result<()> {
        self.seen.lock().await.push(document.id.clone());
        match &self.fail_with {
            Some(message) => anyhow::bail!("{message}"),
            None => Ok(()),
        }
    }
}

/// Poll until the document reaches `state` or `within` elapses.
pub async fn reaches_state(
    queue: &RedisQueue<Parcel>,
    id: &str,
    state: JobState,
    within: Duration,
) -> bool {
    let deadline = tokio::time::Instant::now() + within;
    loop {
        if let Ok(Some(info)) = queue.get_state(id).await
            && info.state == state
        {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

pub fn handler() -> Arc<RecordingHandler> {
    Arc::new(RecordingHandler::default())
}
