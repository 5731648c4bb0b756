//! The in-flight recovery sweep.
//!
//! A processing-list entry whose lock key has expired has no live owner.
//! What happens next depends on its state record: `PROCESSING` means the
//! owner died mid-job and the entry goes back to the ready list;
//! a terminal state means the owner finished but failed to acknowledge, so
//! the entry is dropped and any waiter released. Several queue instances may
//! sweep concurrently; the atomic list surgery makes the second sweeper's
//! removal a no-op.

use std::sync::Arc;
use std::sync::atomic::Ordering;

use redis::AsyncCommands;
use redis::aio::MultiplexedConnection;
use tracing::{debug, error, info, warn};

use crate::domain::document::Document;
use crate::domain::errors::QueueError;
use crate::domain::state::JobState;
use crate::infrastructure::keys::STOP_MESSAGE;
use crate::infrastructure::queue::redis_queue::QueueInner;

pub(crate) async fn run<D: Document>(inner: Arc<QueueInner<D>>) {
    let queue = inner.config.name.clone();
    while inner.running.load(Ordering::SeqCst) {
        tokio::select! {
            _ = tokio::time::sleep(inner.config.reap_interval) => {}
            _ = inner.shutdown.notified() => {}
        }
        if !inner.running.load(Ordering::SeqCst) {
            break;
        }
        if let Err(e) = sweep(&inner).await {
            error!(queue = %queue, "recovery sweep failed: {e}");
        }
    }
    debug!(queue = %queue, "recovery worker stopped");
}

async fn sweep<D: Document>(inner: &Arc<QueueInner<D>>) -> Result<(), QueueError> {
    let mut conn = inner.connection().await?;
    // TODO: paginate this scan; it reads the whole processing list per sweep.
    let ids: Vec<String> = conn.lrange(inner.keys.processing(), 0, -1).await?;
    for id in ids {
        if let Err(e) = dispose(inner, &mut conn, &id).await {
            error!(id = %id, "recovery disposition failed: {e}");
        }
    }
    Ok(())
}

async fn dispose<D: Document>(
    inner: &Arc<QueueInner<D>>,
    conn: &mut MultiplexedConnection,
    id: &str,
) -> Result<(), QueueError> {
    let ttl: i64 = conn.ttl(inner.keys.lock(id)).await?;
    // -1 is a lock without expiry; presence still marks ownership.
    if ttl > 0 || ttl == -1 {
        return Ok(());
    }

    let state = match inner.read_state(conn, id).await {
        Ok(state) => state,
        Err(e) => {
            warn!(id = %id, "unreadable state record; leaving entry: {e}");
            return Ok(());
        }
    };

    match state.map(|info| info.state) {
        None => {
            // Content and state have TTL-expired entirely.
            debug!(id = %id, "no state record for unlocked entry; leaving it");
        }
        Some(JobState::Processing) => {
            info!(id = %id, "requeueing document abandoned mid-job");
            let mut pipe = redis::pipe();
            pipe.atomic()
                .lrem(inner.keys.processing(), 1, id)
                .lpush(inner.keys.ready(), id);
            pipe.query_async::<()>(conn).await?;
        }
        Some(JobState::Done) => {
            debug!(id = %id, "clearing completed document that was never acknowledged");
            remove_and_stop(inner, conn, id).await?;
        }
        Some(state @ (JobState::Failed | JobState::New)) => {
            error!(id = %id, state = %state, "losing a job: unlocked entry cannot progress");
            remove_and_stop(inner, conn, id).await?;
        }
    }
    Ok(())
}

/// Drop the entry and release any waiter still subscribed to the document.
async fn remove_and_stop<D: Document>(
    inner: &Arc<QueueInner<D>>,
    conn: &mut MultiplexedConnection,
    id: &str,
) -> Result<(), QueueError> {
    let mut pipe = redis::pipe();
    pipe.atomic()
        .lrem(inner.keys.processing(), 1, id)
        .publish(inner.keys.state_channel(id), STOP_MESSAGE);
    pipe.query_async::<()>(conn).await?;
    Ok(())
}
