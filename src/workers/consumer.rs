//! The main consumer loop.
//!
//! Claims IDs off the ready list with a blocking pop that lands them on the
//! processing list in the same store operation, re-locks them, records the
//! `PROCESSING` transition, and hands the content to the handler scheduler.
//! The loop never propagates failures: every broken iteration is logged and
//! abandoned, leaving the entry on the processing list for the recovery
//! sweep to sort out.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

use redis::AsyncCommands;
use redis::aio::MultiplexedConnection;
use tracing::{debug, error, warn};

use crate::domain::document::Document;
use crate::domain::state::{JobState, epoch_ms};
use crate::infrastructure::keys::LOCK_SENTINEL;
use crate::infrastructure::queue::redis_queue::QueueInner;

/// Pause after a store failure before the next attempt.
const RETRY_BACKOFF: Duration = Duration::from_secs(1);

pub(crate) async fn run<D: Document>(inner: Arc<QueueInner<D>>) {
    let queue = inner.config.name.clone();
    let pop_timeout_secs = inner.config.pop_timeout.as_secs().max(1);

    while inner.running.load(Ordering::SeqCst) {
        let mut conn = match inner.connection().await {
            Ok(conn) => conn,
            Err(e) => {
                error!(queue = %queue, "consumer lost its store connection: {e}");
                backoff(&inner).await;
                continue;
            }
        };
        inner.refresh_ready_gauge(&mut conn).await;

        let idle_started = Instant::now();
        let popped: Result<Option<String>, redis::RedisError> = redis::cmd("BRPOPLPUSH")
            .arg(inner.keys.ready())
            .arg(inner.keys.processing())
            .arg(pop_timeout_secs)
            .query_async(&mut conn)
            .await;
        inner.recorder.idle_wait(idle_started.elapsed());

        let id = match popped {
            Ok(Some(id)) => id,
            Ok(None) => continue,
            Err(e) => {
                error!(queue = %queue, "blocking pop failed: {e}");
                backoff(&inner).await;
                continue;
            }
        };
        claim(&inner, &mut conn, &id).await;
    }
    debug!(queue = %queue, "consumer loop stopped");
}

async fn backoff<D: Document>(inner: &Arc<QueueInner<D>>) {
    tokio::select! {
        _ = tokio::time::sleep(RETRY_BACKOFF) => {}
        _ = inner.shutdown.notified() => {}
    }
}

/// One claimed ID: lock, state transition, content fetch, dispatch.
///
/// Every early return leaves the ID on the processing list; once the lock
/// expires the recovery sweep decides its fate from the state record.
async fn claim<D: Document>(
    inner: &Arc<QueueInner<D>>,
    conn: &mut MultiplexedConnection,
    id: &str,
) {
    // Take over the producer's pre-claim lock for the duration of this job.
    if let Err(e) = conn
        .set_ex::<_, _, ()>(inner.keys.lock(id), LOCK_SENTINEL, inner.lock_ttl_secs())
        .await
    {
        error!(id = %id, "could not take the document lock: {e}");
        return;
    }

    match inner.read_state(conn, id).await {
        Ok(Some(info)) if info.state != JobState::New => {
            // A second claim after a crash or requeue; last writer wins.
            warn!(id = %id, state = %info.state, "claimed a document that was not NEW");
        }
        Ok(Some(_)) => {}
        Ok(None) => warn!(id = %id, "claimed a document with no state record"),
        Err(e) => warn!(id = %id, "state check failed: {e}"),
    }

    if let Err(e) = inner.write_state(conn, id, JobState::Processing, "").await {
        error!(id = %id, "could not record the PROCESSING transition: {e}");
        return;
    }

    let raw: Option<String> = match conn.get(inner.keys.content(id)).await {
        Ok(raw) => raw,
        Err(e) => {
            error!(id = %id, "content read failed: {e}");
            return;
        }
    };
    let Some(raw) = raw else {
        warn!(id = %id, "content record missing; leaving entry for the recovery sweep");
        return;
    };
    let payload = match inner.payload_codec.decode(&raw) {
        Ok(payload) => payload,
        Err(e) => {
            inner.recorder.serialization_error();
            error!(id = %id, "undecodable content record: {e}");
            return;
        }
    };

    let age_ms = payload.age_ms(epoch_ms());
    if age_ms >= inner.config.discard_after.as_millis() as i64 {
        debug!(id = %id, age_ms, "document exceeded the discard age; not dispatching");
        return;
    }

    let submit_started = Instant::now();
    let submitted = inner
        .scheduler
        .submit(Arc::clone(inner), id.to_string(), payload.document)
        .await;
    inner.recorder.execute_wait(submit_started.elapsed());

    if submitted.is_err() {
        let restore_started = Instant::now();
        warn!(id = %id, "handler scheduler at capacity; returning document to the ready list");
        let mut pipe = redis::pipe();
        pipe.atomic()
            .lrem(inner.keys.processing(), 1, id)
            .lpush(inner.keys.ready(), id);
        if let Err(e) = pipe.query_async::<()>(conn).await {
            error!(id = %id, "could not return the document to the ready list: {e}");
        }
        inner.recorder.restore_blocked(restore_started.elapsed());
    }
}
