use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use futures_util::{Stream, StreamExt, stream};
use redis::AsyncCommands;
use redis::aio::MultiplexedConnection;
use tokio::sync::{Mutex, Notify, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::config::{ConfigError, QueueConfig};
use crate::domain::document::{Document, TimedPayload};
use crate::domain::errors::{QueueError, WaitError};
use crate::domain::state::{ExtendedStateInfo, JobState, StateInfo, epoch_ms};
use crate::infrastructure::codec::{Codec, JsonCodec};
use crate::infrastructure::keys::{KeySpace, LOCK_SENTINEL, STOP_MESSAGE};
use crate::infrastructure::monitoring::{GAUGE_WINDOW, GaugeCache, NoopRecorder, QueueRecorder};
use crate::workers::scheduler::{HandlerScheduler, JobHandler};
use crate::workers::{consumer, reaper};

/// A durable, at-least-once job queue on a Redis database.
///
/// Producers call [`push`](Self::push); [`start`](Self::start) spawns the
/// consumer loop and the recovery sweep, which coordinate with every other
/// queue instance purely through the store. Cloning is cheap and all clones
/// drive the same queue.
pub struct RedisQueue<D: Document> {
    inner: Arc<QueueInner<D>>,
}

impl<D: Document> Clone for RedisQueue<D> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

pub(crate) struct WorkerHandles {
    pub(crate) consumer: JoinHandle<()>,
    pub(crate) reaper: JoinHandle<()>,
}

/// Shared state behind a queue handle, visible to the worker loops.
pub(crate) struct QueueInner<D: Document> {
    pub(crate) config: QueueConfig,
    pub(crate) client: redis::Client,
    pub(crate) keys: KeySpace,
    pub(crate) payload_codec: Arc<dyn Codec<TimedPayload<D>>>,
    pub(crate) state_codec: Arc<dyn Codec<StateInfo>>,
    pub(crate) recorder: Arc<dyn QueueRecorder>,
    pub(crate) scheduler: HandlerScheduler<D>,
    pub(crate) running: AtomicBool,
    pub(crate) shutdown: Notify,
    workers: Mutex<Option<WorkerHandles>>,
    ready_gauge: GaugeCache,
}

impl<D: Document> QueueInner<D> {
    pub(crate) async fn connection(&self) -> Result<MultiplexedConnection, QueueError> {
        Ok(self.client.get_multiplexed_async_connection().await?)
    }

    pub(crate) fn state_ttl_secs(&self) -> u64 {
        self.config.state_ttl.as_secs().max(1)
    }

    pub(crate) fn lock_ttl_secs(&self) -> u64 {
        self.config.lock_ttl.as_secs().max(1)
    }

    pub(crate) async fn read_state(
        &self,
        conn: &mut MultiplexedConnection,
        id: &str,
    ) -> Result<Option<StateInfo>, QueueError> {
        let raw: Option<String> = conn.get(self.keys.state(id)).await?;
        match raw {
            Some(raw) => {
                let info = self.state_codec.decode(&raw).inspect_err(|_| {
                    self.recorder.serialization_error();
                })?;
                Ok(Some(info))
            }
            None => Ok(None),
        }
    }

    /// Write a fresh state record and publish it on the document's channel.
    /// The two commands go out as one pipeline; the write is ordered before
    /// the publish so a subscriber's catch-up read never misses the record.
    pub(crate) async fn write_state(
        &self,
        conn: &mut MultiplexedConnection,
        id: &str,
        state: JobState,
        info: &str,
    ) -> Result<(), QueueError> {
        let record = StateInfo::new(state, info);
        let encoded = self
            .state_codec
            .encode(&record)
            .inspect_err(|_| self.recorder.serialization_error())?;
        let mut pipe = redis::pipe();
        pipe.set_ex(self.keys.state(id), &encoded, self.state_ttl_secs())
            .publish(self.keys.state_channel(id), &encoded);
        pipe.query_async::<()>(conn).await?;
        Ok(())
    }

    /// Record a handler outcome: terminal state write, publish, and removal
    /// from the processing list.
    pub(crate) async fn finish(
        &self,
        id: &str,
        state: JobState,
        info: &str,
    ) -> Result<(), QueueError> {
        let record = StateInfo::new(state, info);
        let encoded = self
            .state_codec
            .encode(&record)
            .inspect_err(|_| self.recorder.serialization_error())?;
        let mut conn = self.connection().await?;
        let mut pipe = redis::pipe();
        pipe.set_ex(self.keys.state(id), &encoded, self.state_ttl_secs())
            .publish(self.keys.state_channel(id), &encoded)
            .lrem(self.keys.processing(), 1, id);
        pipe.query_async::<()>(&mut conn).await?;
        Ok(())
    }

    /// Sample the ready-list length into the recorder, at most once per
    /// gauge window across all claimants.
    pub(crate) async fn refresh_ready_gauge(&self, conn: &mut MultiplexedConnection) {
        if !self.ready_gauge.try_claim(epoch_ms()) {
            return;
        }
        match conn.llen::<_, u64>(self.keys.ready()).await {
            Ok(len) => self.recorder.ready_len(len),
            Err(e) => warn!(queue = %self.config.name, "failed to sample ready list length: {e}"),
        }
    }
}

/// Assembles a [`RedisQueue`] with optional codec and recorder overrides.
pub struct RedisQueueBuilder<D: Document> {
    config: QueueConfig,
    client: redis::Client,
    handler: Arc<dyn JobHandler<D>>,
    payload_codec: Arc<dyn Codec<TimedPayload<D>>>,
    state_codec: Arc<dyn Codec<StateInfo>>,
    recorder: Arc<dyn QueueRecorder>,
}

impl<D: Document> RedisQueueBuilder<D> {
    pub fn payload_codec(mut self, codec: Arc<dyn Codec<TimedPayload<D>>>) -> Self {
        self.payload_codec = codec;
        self
    }

    pub fn state_codec(mut self, codec: Arc<dyn Codec<StateInfo>>) -> Self {
        self.state_codec = codec;
        self
    }

    pub fn recorder(mut self, recorder: Arc<dyn QueueRecorder>) -> Self {
        self.recorder = recorder;
        self
    }

    /// # Errors
    ///
    /// Returns [`ConfigError`] when the configuration violates a
    /// construction precondition; nothing touches the store until the
    /// configuration is accepted.
    pub fn build(self) -> Result<RedisQueue<D>, ConfigError> {
        self.config.validate()?;
        let keys = KeySpace::new(&self.config.name);
        let scheduler = HandlerScheduler::new(
            self.handler,
            self.config.handler_capacity,
            self.config.handler_poll_delay,
        );
        Ok(RedisQueue {
            inner: Arc::new(QueueInner {
                keys,
                scheduler,
                client: self.client,
                payload_codec: self.payload_codec,
                state_codec: self.state_codec,
                recorder: self.recorder,
                running: AtomicBool::new(false),
                shutdown: Notify::new(),
                workers: Mutex::new(None),
                ready_gauge: GaugeCache::new(GAUGE_WINDOW),
                config: self.config,
            }),
        })
    }
}

impl<D: Document> RedisQueue<D> {
    /// Queue with the default JSON codecs and no metrics.
    ///
    /// # Errors
    ///
    /// See [`RedisQueueBuilder::build`].
    pub fn new(
        config: QueueConfig,
        client: redis::Client,
        handler: Arc<dyn JobHandler<D>>,
    ) -> Result<Self, ConfigError> {
        Self::builder(config, client, handler).build()
    }

    pub fn builder(
        config: QueueConfig,
        client: redis::Client,
        handler: Arc<dyn JobHandler<D>>,
    ) -> RedisQueueBuilder<D> {
        RedisQueueBuilder {
            config,
            client,
            handler,
            payload_codec: Arc::new(JsonCodec),
            state_codec: Arc::new(JsonCodec),
            recorder: Arc::new(NoopRecorder),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.config.name
    }

    #[cfg(test)]
    pub(crate) fn inner(&self) -> Arc<QueueInner<D>> {
        Arc::clone(&self.inner)
    }

    /// Enqueue a document.
    ///
    /// Writes the content, state, and pre-claim lock records, pushes the ID
    /// onto the ready list, and publishes the initial `NEW` state, all in a
    /// single MULTI/EXEC group: a concurrent consumer or recovery sweep
    /// either sees the complete document or none of it. Returns once the
    /// store has acknowledged the transaction.
    ///
    /// The pre-claim lock keeps the recovery sweep from treating the fresh
    /// ID as abandoned before a consumer picks it up.
    ///
    /// # Errors
    ///
    /// [`QueueError::EmptyId`] for an ID-less document,
    /// [`QueueError::Encode`] when the payload cannot be serialized, and
    /// [`QueueError::Redis`] on transport failure. Nothing is written in any
    /// of these cases.
    pub async fn push(&self, document: D) -> Result<(), QueueError> {
        if document.id().is_empty() {
            return Err(QueueError::EmptyId);
        }
        let started = Instant::now();
        let inner = &self.inner;

        let payload = TimedPayload::new(document);
        let id = payload.document.id().to_string();
        let content = inner
            .payload_codec
            .encode(&payload)
            .inspect_err(|_| inner.recorder.serialization_error())?;
        let state_record = StateInfo::new(JobState::New, "");
        let state_raw = inner
            .state_codec
            .encode(&state_record)
            .inspect_err(|_| inner.recorder.serialization_error())?;

        let mut conn = inner.connection().await?;
        let mut pipe = redis::pipe();
        pipe.atomic()
            .set_ex(inner.keys.lock(&id), LOCK_SENTINEL, inner.lock_ttl_secs())
            .lpush(inner.keys.ready(), &id)
            .set_ex(inner.keys.content(&id), &content, inner.state_ttl_secs())
            .set_ex(inner.keys.state(&id), &state_raw, inner.state_ttl_secs())
            .publish(inner.keys.state_channel(&id), &state_raw);
        pipe.query_async::<()>(&mut conn).await?;

        inner.recorder.push_latency(started.elapsed());
        debug!(queue = %self.name(), id = %id, "document enqueued");
        Ok(())
    }

    /// Write a state record for a document and publish it to any waiters.
    pub async fn set_state(
        &self,
        id: &str,
        state: JobState,
        info: &str,
    ) -> Result<(), QueueError> {
        let mut conn = self.inner.connection().await?;
        self.inner.write_state(&mut conn, id, state, info).await
    }

    /// Current state record of a document, if one is stored.
    ///
    /// # Errors
    ///
    /// [`QueueError::Decode`] when a record exists but cannot be parsed.
    pub async fn get_state(&self, id: &str) -> Result<Option<StateInfo>, QueueError> {
        let mut conn = self.inner.connection().await?;
        self.inner.read_state(&mut conn, id).await
    }

    /// Lazily enumerate the state records of every document of this queue.
    ///
    /// The key set is captured eagerly; records are fetched as the stream is
    /// polled. `None` items are records that expired between enumeration and
    /// fetch, or that could not be decoded (logged).
    pub async fn get_states(
        &self,
    ) -> Result<impl Stream<Item = Option<ExtendedStateInfo>> + Send, QueueError> {
        let mut conn = self.inner.connection().await?;
        let keys: Vec<String> = conn.keys(self.inner.keys.state_pattern()).await?;
        let inner = Arc::clone(&self.inner);
        Ok(stream::iter(keys).then(move |key| {
            let inner = Arc::clone(&inner);
            async move {
                let mut conn = match inner.connection().await {
                    Ok(conn) => conn,
                    Err(e) => {
                        warn!(key = %key, "state enumeration lost its connection: {e}");
                        return None;
                    }
                };
                let raw: Option<String> = match conn.get(&key).await {
                    Ok(raw) => raw,
                    Err(e) => {
                        warn!(key = %key, "state record read failed: {e}");
                        return None;
                    }
                };
                let raw = raw?;
                match inner.state_codec.decode(&raw) {
                    Ok(info) => Some(ExtendedStateInfo { key, info }),
                    Err(e) => {
                        warn!(key = %key, "undecodable state record: {e}");
                        None
                    }
                }
            }
        }))
    }

    /// Number of documents awaiting a consumer.
    pub async fn ready_len(&self) -> Result<u64, QueueError> {
        let mut conn = self.inner.connection().await?;
        Ok(conn.llen(self.inner.keys.ready()).await?)
    }

    /// Number of documents claimed but not acknowledged completed.
    pub async fn processing_len(&self) -> Result<u64, QueueError> {
        let mut conn = self.inner.connection().await?;
        Ok(conn.llen(self.inner.keys.processing()).await?)
    }

    /// A wait that completes once the document's state is in `targets`.
    ///
    /// The channel subscription is established before this returns and the
    /// current state is read back through it afterwards, so a transition
    /// that lands between the two cannot be missed. The returned
    /// [`StateWait`] owns its subscription; dropping it releases the
    /// connection.
    ///
    /// # Errors
    ///
    /// [`WaitError::Subscribe`] when the subscription cannot be
    /// established; no wait is running in that case.
    pub async fn wait_for_states(
        &self,
        targets: &[JobState],
        id: &str,
    ) -> Result<StateWait, WaitError> {
        let channel = self.inner.keys.state_channel(id);
        let mut pubsub = self
            .inner
            .client
            .get_async_pubsub()
            .await
            .map_err(WaitError::Subscribe)?;
        pubsub
            .subscribe(&channel)
            .await
            .map_err(WaitError::Subscribe)?;

        let (tx, rx) = oneshot::channel();
        let inner = Arc::clone(&self.inner);
        let id = id.to_string();
        let targets = targets.to_vec();
        let listener = tokio::spawn(async move {
            let outcome = listen(inner, pubsub, id, targets).await;
            let _ = tx.send(outcome);
        });
        Ok(StateWait { rx, listener })
    }

    /// Enqueue a document and block until it reaches a terminal state.
    ///
    /// The wait is registered before the push, so even a handler that
    /// completes faster than the subscription round-trip cannot slip a
    /// terminal publish past the waiter.
    pub async fn push_and_wait(&self, document: D, timeout: Duration) -> Result<(), WaitError> {
        let wait = self
            .wait_for_states(&[JobState::Done, JobState::Failed], document.id())
            .await?;
        self.push(document).await.map_err(WaitError::Push)?;
        wait.wait(timeout).await
    }

    /// Spawn the consumer loop and the recovery sweep.
    ///
    /// A second call on an already-running queue is a logged no-op.
    pub async fn start(&self) {
        let mut workers = self.inner.workers.lock().await;
        if workers.is_some() {
            warn!(queue = %self.name(), "start requested but workers are already running");
            return;
        }
        self.inner.running.store(true, Ordering::SeqCst);
        self.inner.scheduler.reopen();
        let handles = WorkerHandles {
            consumer: tokio::spawn(consumer::run(Arc::clone(&self.inner))),
            reaper: tokio::spawn(reaper::run(Arc::clone(&self.inner))),
        };
        *workers = Some(handles);
        debug!(queue = %self.name(), "consumer and recovery workers started");
    }

    /// Stop both loops and drain in-flight handler executions.
    ///
    /// The consumer notices shutdown within the blocking-pop timeout and the
    /// recovery sweep is woken immediately; after both exit, handler tasks
    /// get up to a minute to finish. `push` keeps working on a closed queue,
    /// it just makes no progress until some queue instance starts consuming
    /// again.
    pub async fn close(&self) {
        let mut workers = self.inner.workers.lock().await;
        self.inner.running.store(false, Ordering::SeqCst);
        self.inner.shutdown.notify_waiters();
        if let Some(handles) = workers.take() {
            if let Err(e) = handles.consumer.await {
                error!(queue = %self.name(), "consumer worker did not exit cleanly: {e}");
            }
            if let Err(e) = handles.reaper.await {
                error!(queue = %self.name(), "recovery worker did not exit cleanly: {e}");
            }
        }
        self.inner.scheduler.close().await;
        debug!(queue = %self.name(), "queue closed");
    }
}

async fn listen<D: Document>(
    inner: Arc<QueueInner<D>>,
    mut pubsub: redis::aio::PubSub,
    id: String,
    targets: Vec<JobState>,
) -> Result<(), WaitError> {
    // Catch-up read, strictly after the subscription went active: a state
    // already in the target set completes the wait without a message.
    match inner.connection().await {
        Ok(mut conn) => match inner.read_state(&mut conn, &id).await {
            Ok(Some(info)) if targets.contains(&info.state) => return Ok(()),
            Ok(_) => {}
            Err(e) => warn!(id = %id, "catch-up state read failed: {e}"),
        },
        Err(e) => warn!(id = %id, "catch-up read lost its connection: {e}"),
    }

    let mut messages = pubsub.on_message();
    while let Some(msg) = messages.next().await {
        let payload: String = match msg.get_payload() {
            Ok(payload) => payload,
            Err(e) => {
                warn!(id = %id, "unreadable message on state channel: {e}");
                continue;
            }
        };
        if payload == STOP_MESSAGE {
            return Err(WaitError::Stopped);
        }
        match inner.state_codec.decode(&payload) {
            Ok(info) if targets.contains(&info.state) => return Ok(()),
            Ok(_) => {}
            Err(e) => warn!(id = %id, "undecodable message on state channel: {e}"),
        }
    }
    Err(WaitError::ChannelClosed)
}

/// A pending state wait.
///
/// Await it with [`wait`](Self::wait); dropping it aborts the listener task
/// and releases the subscription connection.
pub struct StateWait {
    rx: oneshot::Receiver<Result<(), WaitError>>,
    listener: JoinHandle<()>,
}

impl StateWait {
    /// Block until the target state arrives or `timeout` expires.
    pub async fn wait(mut self, timeout: Duration) -> Result<(), WaitError> {
        match tokio::time::timeout(timeout, &mut self.rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(WaitError::ChannelClosed),
            Err(_) => Err(WaitError::Timeout(timeout)),
        }
    }
}

impl Drop for StateWait {
    fn drop(&mut self) {
        self.listener.abort();
    }
}
