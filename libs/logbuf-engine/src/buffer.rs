use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::io::AsyncRead;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::task::TaskTracker;

use logbuf_api::{LogRecord, OverflowPolicy, RotatingSink, StreamId, StreamKey};

use crate::config::LogBufferConfig;
use crate::error::LogError;
use crate::history;
use crate::ingest;
use crate::registry::{Listener, ListenerId, Registry};
use crate::watcher::{lock_sink, write_record, PersistenceWatcher, SharedSink};

/// Log buffer of one supervised job.
///
/// Ingests job output with [`follow`](Self::follow), fans records out to
/// live listeners, persists them through a [`RotatingSink`] and serves the
/// last N persisted records with [`read`](Self::read).
///
/// States: open until the first [`close`](Self::close), closed after. Every
/// operation on a closed buffer fails with [`LogError::Closed`]; `close`
/// itself may be called any number of times.
pub struct LogBuffer {
    registry: Arc<Registry>,
    sink: SharedSink,
    config: LogBufferConfig,
    closed: AtomicBool,
    watcher_id: ListenerId,
    watcher: Mutex<Option<JoinHandle<Result<(), LogError>>>>,
    persisted: watch::Receiver<u64>,
    tasks: TaskTracker,
}

impl LogBuffer {
    /// Open a buffer writing to `sink` and start its persistence watcher.
    ///
    /// Must be called inside a tokio runtime.
    pub fn new<S>(sink: S, config: LogBufferConfig) -> Self
    where
        S: RotatingSink + 'static,
    {
        let sink: Box<dyn RotatingSink> = Box::new(sink);
        let sink: SharedSink = Arc::new(Mutex::new(sink));
        let (registry, listener) = Registry::with_listener(
            StreamKey::All,
            config.persist_buffer,
            OverflowPolicy::BackPressure,
        );
        let registry = Arc::new(registry);
        let watcher_id = listener.id();
        let (watcher, persisted) = PersistenceWatcher::new(listener, sink.clone());
        let handle = tokio::spawn(watcher.run());

        tracing::debug!(max_size = lock_sink(&sink).max_size(), "log buffer opened");

        Self {
            registry,
            sink,
            config,
            closed: AtomicBool::new(false),
            watcher_id,
            watcher: Mutex::new(Some(handle)),
            persisted,
            tasks: TaskTracker::new(),
        }
    }

    fn ensure_open(&self) -> Result<(), LogError> {
        if self.closed.load(Ordering::Acquire) {
            Err(LogError::Closed)
        } else {
            Ok(())
        }
    }

    pub fn config(&self) -> &LogBufferConfig {
        &self.config
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    // ── Listeners ──

    /// Register a listener with the configured queue depth and policy.
    pub async fn add_listener(&self, key: impl Into<StreamKey>) -> Result<Listener, LogError> {
        self.add_listener_with(key, self.config.listener_buffer, self.config.listener_overflow)
            .await
    }

    pub async fn add_listener_with(
        &self,
        key: impl Into<StreamKey>,
        buffer: usize,
        overflow: OverflowPolicy,
    ) -> Result<Listener, LogError> {
        self.ensure_open()?;
        self.registry.add_listener(key.into(), buffer, overflow).await
    }

    /// Unregister a listener. Removing an unknown listener is a no-op.
    pub async fn remove_listener(&self, key: impl Into<StreamKey>, id: ListenerId) -> bool {
        self.registry.remove_listener(key.into(), id).await
    }

    // ── Ingestion ──

    /// Broadcast everything read from `source` as records of `stream`.
    ///
    /// Returns when `source` hits EOF or the buffer closes; read errors are
    /// returned as [`LogError::Ingest`].
    pub async fn follow<R>(&self, stream: StreamId, source: R) -> Result<(), LogError>
    where
        R: AsyncRead + Unpin,
    {
        self.ensure_open()?;
        let token = self.registry.token().clone();
        ingest::follow(self.registry.clone(), stream, source, token).await
    }

    /// [`follow`](Self::follow) on a background task that `close` waits for.
    pub fn spawn_follow<R>(
        &self,
        stream: StreamId,
        source: R,
    ) -> Result<JoinHandle<Result<(), LogError>>, LogError>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        self.ensure_open()?;
        let token = self.registry.token().clone();
        Ok(self
            .tasks
            .spawn(ingest::follow(self.registry.clone(), stream, source, token)))
    }

    // ── Persistence ──

    /// Append one record to the sink directly, bypassing listeners.
    pub fn write(&self, record: &LogRecord) -> Result<(), LogError> {
        self.ensure_open()?;
        write_record(&self.sink, record)
    }

    /// Wait until every record broadcast so far is written to the sink.
    ///
    /// Fails with [`LogError::PersistenceStopped`] if the watcher died. A
    /// broadcast stalled on a back-pressure listener holds up the wait; a
    /// concurrent `close` ends it with [`LogError::Closed`].
    pub async fn flush(&self) -> Result<(), LogError> {
        self.ensure_open()?;
        let token = self.registry.token().clone();
        tokio::select! {
            res = self.wait_persisted() => res?,
            _ = token.cancelled() => return Err(LogError::Closed),
        }
        lock_sink(&self.sink).flush().map_err(LogError::Sink)
    }

    async fn wait_persisted(&self) -> Result<(), LogError> {
        let target = self
            .registry
            .delivered(StreamKey::All, self.watcher_id)
            .await
            .ok_or(LogError::PersistenceStopped)?;

        let mut persisted = self.persisted.clone();
        persisted
            .wait_for(|&n| n >= target)
            .await
            .map_err(|_| LogError::PersistenceStopped)?;
        Ok(())
    }

    // ── History ──

    /// Send the last `lines` persisted records (all of them for 0) to `tx`
    /// in persisted order, then close it by dropping `tx`.
    ///
    /// With nothing persisted yet the channel is closed right away. The
    /// channel is closed on error too. Returns the number of records sent.
    pub async fn read(&self, lines: usize, tx: mpsc::Sender<LogRecord>) -> Result<usize, LogError> {
        self.ensure_open()?;
        let Some(path) = lock_sink(&self.sink).current_file() else {
            return Ok(0);
        };
        tokio::task::spawn_blocking(move || history::read_history(&path, lines, tx)).await?
    }

    // ── Lifecycle ──

    /// Close the buffer.
    ///
    /// Stops ingestion, closes every registered listener once, lets the
    /// watcher drain what it already received, then closes the sink. Only
    /// the first call does anything; later calls return `Ok(())`.
    pub async fn close(&self) -> Result<(), LogError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            tracing::debug!("log buffer already closed");
            return Ok(());
        }

        let listeners = self.registry.close().await;
        self.tasks.close();
        self.tasks.wait().await;

        let handle = match self.watcher.lock() {
            Ok(mut g) => g.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(handle) = handle {
            match handle.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::warn!(error = %e, "persistence had stopped before close"),
                Err(e) => tracing::warn!(error = %e, "persistence watcher task failed"),
            }
        }

        tracing::info!(listeners, "log buffer closed");
        lock_sink(&self.sink).close().map_err(LogError::Sink)
    }
}

impl Drop for LogBuffer {
    fn drop(&mut self) {
        // Unblocks ingestors so the registry, and with it the watcher, can go.
        self.registry.cancel();
    }
}
