use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Notify, Semaphore};
use tracing::{error, warn};

use crate::domain::document::Document;
use crate::domain::state::JobState;
use crate::infrastructure::queue::redis_queue::QueueInner;

/// How long `close` waits for running handlers before giving up on them.
const DRAIN_WINDOW: Duration = Duration::from_secs(60);

/// User-supplied processing logic for one document.
///
/// The queue records the outcome: `Ok` transitions the document to `DONE`,
/// `Err` to `FAILED` with the error text, and both remove it from the
/// processing list. A handler that never returns (or a process that dies
/// mid-execution) leaves the document `PROCESSING` until its lock expires
/// and the recovery sweep requeues it, so handlers must tolerate running
/// more than once.
#[async_trait]
pub trait JobHandler<D>: Send + Sync {
    async fn execute(&self, document: D) -> anyhow::Result<()>;
}

/// The submission was refused because every handler slot was busy.
#[derive(Debug)]
pub(crate) struct SchedulerFull;

/// Bounded-concurrency executor for handler runs.
///
/// Capacity is a semaphore; a submission that finds no free slot waits one
/// poll delay, retries, and is rejected if still out of luck. Each accepted
/// document runs on its own task, which acknowledges completion through the
/// queue before releasing its slot.
pub(crate) struct HandlerScheduler<D: Document> {
    handler: Arc<dyn JobHandler<D>>,
    permits: Arc<Semaphore>,
    poll_delay: Duration,
    closed: AtomicBool,
    active: Arc<AtomicUsize>,
    drained: Arc<Notify>,
}

impl<D: Document> HandlerScheduler<D> {
    pub(crate) fn new(
        handler: Arc<dyn JobHandler<D>>,
        capacity: usize,
        poll_delay: Duration,
    ) -> Self {
        Self {
            handler,
            permits: Arc::new(Semaphore::new(capacity.max(1))),
            poll_delay,
            closed: AtomicBool::new(false),
            active: Arc::new(AtomicUsize::new(0)),
            drained: Arc::new(Notify::new()),
        }
    }

    pub(crate) async fn submit(
        &self,
        inner: Arc<QueueInner<D>>,
        id: String,
        document: D,
    ) -> Result<(), SchedulerFull> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(SchedulerFull);
        }
        let permit = match self.permits.clone().try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                tokio::time::sleep(self.poll_delay).await;
                self.permits
                    .clone()
                    .try_acquire_owned()
                    .map_err(|_| SchedulerFull)?
            }
        };

        self.active.fetch_add(1, Ordering::SeqCst);
        let handler = Arc::clone(&self.handler);
        let active = Arc::clone(&self.active);
        let drained = Arc::clone(&self.drained);
        tokio::spawn(async move {
            let _permit = permit;
            match handler.execute(document).await {
                Ok(()) => {
                    if let Err(e) = inner.finish(&id, JobState::Done, "").await {
                        // Stays PROCESSING; the recovery sweep will requeue it.
                        error!(id = %id, "could not record handler success: {e}");
                    }
                }
                Err(err) => {
                    warn!(id = %id, "handler failed: {err:#}");
                    if let Err(e) = inner.finish(&id, JobState::Failed, &err.to_string()).await {
                        error!(id = %id, "could not record handler failure: {e}");
                    }
                }
            }
            if active.fetch_sub(1, Ordering::SeqCst) == 1 {
                drained.notify_waiters();
            }
        });
        Ok(())
    }

    /// Accept submissions again after a close.
    pub(crate) fn reopen(&self) {
        self.closed.store(false, Ordering::SeqCst);
    }

    /// Refuse new submissions and wait for running handlers to finish,
    /// bounded by [`DRAIN_WINDOW`].
    pub(crate) async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        let drain = async {
            loop {
                let notified = self.drained.notified();
                if self.active.load(Ordering::SeqCst) == 0 {
                    break;
                }
                notified.await;
            }
        };
        if tokio::time::timeout(DRAIN_WINDOW, drain).await.is_err() {
            warn!(
                "handler executions still running after the {:?} drain window",
                DRAIN_WINDOW
            );
        }
    }
}
