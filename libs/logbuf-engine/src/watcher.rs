use std::io::Write;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::watch;

use logbuf_api::{LogRecord, RotatingSink};

use crate::error::LogError;
use crate::registry::Listener;

pub(crate) type SharedSink = Arc<Mutex<Box<dyn RotatingSink>>>;

pub(crate) fn lock_sink(sink: &SharedSink) -> MutexGuard<'_, Box<dyn RotatingSink>> {
    match sink.lock() {
        Ok(g) => g,
        Err(poisoned) => {
            tracing::warn!("sink lock was poisoned, recovering");
            poisoned.into_inner()
        }
    }
}

/// Encode one record as a line and append it to the sink.
pub(crate) fn write_record(sink: &SharedSink, record: &LogRecord) -> Result<(), LogError> {
    let line = record.encode_line()?;
    let mut guard = lock_sink(sink);
    guard.write_all(&line).map_err(LogError::Sink)?;
    guard.flush().map_err(LogError::Sink)
}

/// Wildcard listener that transcribes every broadcast record to the sink.
///
/// Runs until its listener is closed. On the first write failure it logs the
/// error and stops; records broadcast afterwards reach live listeners but are
/// no longer persisted. The failure is visible through `LogBuffer::flush`,
/// which reports it once the watcher is gone.
pub(crate) struct PersistenceWatcher {
    listener: Listener,
    sink: SharedSink,
    persisted: watch::Sender<u64>,
}

impl PersistenceWatcher {
    pub(crate) fn new(listener: Listener, sink: SharedSink) -> (Self, watch::Receiver<u64>) {
        let (persisted, rx) = watch::channel(0);
        (
            Self {
                listener,
                sink,
                persisted,
            },
            rx,
        )
    }

    pub(crate) async fn run(mut self) -> Result<(), LogError> {
        let id = self.listener.id();
        tracing::debug!(listener = id, "persistence watcher started");

        let mut count = 0u64;
        while let Some(record) = self.listener.recv().await {
            if let Err(e) = write_record(&self.sink, &record) {
                tracing::error!(
                    listener = id,
                    persisted = count,
                    error = %e,
                    "persistence failed, watcher stopping"
                );
                return Err(e);
            }
            count += 1;
            self.persisted.send_replace(count);
        }

        tracing::debug!(listener = id, persisted = count, "persistence watcher finished");
        Ok(())
    }
}
