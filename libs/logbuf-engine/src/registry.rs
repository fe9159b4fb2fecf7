use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;

use logbuf_api::{LogRecord, OverflowPolicy, StreamKey};

use crate::error::LogError;

/// Identifies one registered listener inside a [`Registry`].
pub type ListenerId = u64;

// ═══════════════════════════════════════════════════════════════
//  Subscriber
// ═══════════════════════════════════════════════════════════════

struct Subscriber {
    id: ListenerId,
    tx: mpsc::Sender<LogRecord>,
    overflow: OverflowPolicy,
    /// Records accepted into this subscriber's queue.
    delivered: u64,
}

enum Delivery {
    Sent,
    Dropped,
    Gone,
    Cancelled,
}

// ═══════════════════════════════════════════════════════════════
//  Listener
// ═══════════════════════════════════════════════════════════════

/// Live feed of records for one registry key.
///
/// `recv` returns `None` once the listener was removed, disconnected by
/// its overflow policy, or the buffer was closed.
pub struct Listener {
    id: ListenerId,
    key: StreamKey,
    rx: mpsc::Receiver<LogRecord>,
}

impl Listener {
    pub fn id(&self) -> ListenerId {
        self.id
    }

    pub fn key(&self) -> StreamKey {
        self.key
    }

    pub async fn recv(&mut self) -> Option<LogRecord> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Result<LogRecord, mpsc::error::TryRecvError> {
        self.rx.try_recv()
    }

    pub fn into_receiver(self) -> mpsc::Receiver<LogRecord> {
        self.rx
    }
}

impl std::fmt::Debug for Listener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Listener")
            .field("id", &self.id)
            .field("key", &self.key)
            .finish()
    }
}

// ═══════════════════════════════════════════════════════════════
//  Registry
// ═══════════════════════════════════════════════════════════════

#[derive(Default)]
struct Inner {
    closed: bool,
    by_key: HashMap<StreamKey, Vec<Subscriber>>,
}

/// Listeners keyed by stream id or the wildcard group.
///
/// Every subscriber owns a bounded queue. A broadcast holds the exclusive
/// lock for its whole fan-out, so all listeners see broadcasts in one total
/// order, the same order in which the persistence watcher writes them.
pub struct Registry {
    inner: RwLock<Inner>,
    next_id: AtomicU64,
    token: CancellationToken,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            next_id: AtomicU64::new(1),
            token: CancellationToken::new(),
        }
    }

    /// Registry whose first listener is in place before any broadcast.
    pub fn with_listener(
        key: StreamKey,
        buffer: usize,
        overflow: OverflowPolicy,
    ) -> (Self, Listener) {
        let mut registry = Self::new();
        let (sub, listener) = registry.make_listener(key, buffer, overflow);
        registry.inner.get_mut().by_key.entry(key).or_default().push(sub);
        (registry, listener)
    }

    fn make_listener(
        &self,
        key: StreamKey,
        buffer: usize,
        overflow: OverflowPolicy,
    ) -> (Subscriber, Listener) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let sub = Subscriber {
            id,
            tx,
            overflow,
            delivered: 0,
        };
        (sub, Listener { id, key, rx })
    }

    /// Register a new listener under `key`.
    ///
    /// The listener sees every broadcast that starts after this returns.
    pub async fn add_listener(
        &self,
        key: StreamKey,
        buffer: usize,
        overflow: OverflowPolicy,
    ) -> Result<Listener, LogError> {
        let (sub, listener) = self.make_listener(key, buffer, overflow);

        let mut inner = self.inner.write().await;
        if inner.closed {
            return Err(LogError::Closed);
        }
        inner.by_key.entry(key).or_default().push(sub);
        tracing::debug!(listener = listener.id, %key, ?overflow, "listener added");

        Ok(listener)
    }

    /// Unregister a listener, closing its channel. Returns `false` when it
    /// was not registered under `key` (never added, or already removed).
    pub async fn remove_listener(&self, key: StreamKey, id: ListenerId) -> bool {
        let mut inner = self.inner.write().await;
        let Some(subs) = inner.by_key.get_mut(&key) else {
            return false;
        };
        let Some(pos) = subs.iter().position(|s| s.id == id) else {
            return false;
        };
        subs.swap_remove(pos);
        if subs.is_empty() {
            inner.by_key.remove(&key);
        }
        tracing::debug!(listener = id, %key, "listener removed");
        true
    }

    /// Deliver `record` to the listeners of its stream and to the wildcard group.
    pub async fn broadcast(&self, record: &LogRecord) {
        if self.token.is_cancelled() {
            return;
        }
        let mut inner = self.inner.write().await;
        if inner.closed {
            return;
        }

        for key in [StreamKey::All, StreamKey::Stream(record.stream_id)] {
            let Some(subs) = inner.by_key.get_mut(&key) else {
                continue;
            };
            let mut i = 0;
            while i < subs.len() {
                match self.deliver(&subs[i], record).await {
                    Delivery::Sent => {
                        subs[i].delivered += 1;
                        i += 1;
                    }
                    Delivery::Dropped => i += 1,
                    Delivery::Gone => {
                        tracing::debug!(listener = subs[i].id, %key, "listener gone, removing");
                        subs.swap_remove(i);
                    }
                    Delivery::Cancelled => return,
                }
            }
        }
        inner.by_key.retain(|_, subs| !subs.is_empty());
    }

    async fn deliver(&self, sub: &Subscriber, record: &LogRecord) -> Delivery {
        match sub.overflow {
            OverflowPolicy::Drop => match sub.tx.try_send(record.clone()) {
                Ok(()) => Delivery::Sent,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    tracing::warn!(
                        listener = sub.id,
                        stream = record.stream_id,
                        "listener queue full, dropping record"
                    );
                    Delivery::Dropped
                }
                Err(mpsc::error::TrySendError::Closed(_)) => Delivery::Gone,
            },
            OverflowPolicy::Disconnect => match sub.tx.try_send(record.clone()) {
                Ok(()) => Delivery::Sent,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    tracing::warn!(
                        listener = sub.id,
                        stream = record.stream_id,
                        "listener queue full, disconnecting"
                    );
                    Delivery::Gone
                }
                Err(mpsc::error::TrySendError::Closed(_)) => Delivery::Gone,
            },
            OverflowPolicy::BackPressure => {
                tokio::select! {
                    res = sub.tx.send(record.clone()) => match res {
                        Ok(()) => Delivery::Sent,
                        Err(_) => Delivery::Gone,
                    },
                    _ = self.token.cancelled() => Delivery::Cancelled,
                }
            }
        }
    }

    /// Records accepted so far by one listener's queue. `None` when the
    /// listener is no longer registered.
    pub async fn delivered(&self, key: StreamKey, id: ListenerId) -> Option<u64> {
        let inner = self.inner.read().await;
        inner
            .by_key
            .get(&key)?
            .iter()
            .find(|s| s.id == id)
            .map(|s| s.delivered)
    }

    pub async fn listener_count(&self) -> usize {
        self.inner.read().await.by_key.values().map(Vec::len).sum()
    }

    /// Token cancelled when the registry closes. Ingestors stop on it.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Cancel pending back-pressure sends and stop accepting broadcasts,
    /// without closing any listener yet.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Close every registered listener exactly once and refuse new ones.
    /// Returns how many listeners were closed.
    pub async fn close(&self) -> usize {
        self.token.cancel();
        let mut inner = self.inner.write().await;
        inner.closed = true;
        inner.by_key.drain().map(|(_, subs)| subs.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn record(stream: i32, msg: &str) -> LogRecord {
        LogRecord::with_timestamp(stream, 1, msg)
    }

    #[tokio::test]
    async fn broadcast_reaches_stream_and_wildcard_listeners() {
        let registry = Registry::new();
        let mut all = registry.add_listener(StreamKey::All, 8, OverflowPolicy::Drop).await.unwrap();
        let mut one = registry
            .add_listener(StreamKey::Stream(1), 8, OverflowPolicy::Drop)
            .await
            .unwrap();
        let mut two = registry
            .add_listener(StreamKey::Stream(2), 8, OverflowPolicy::Drop)
            .await
            .unwrap();

        registry.broadcast(&record(1, "a")).await;
        registry.broadcast(&record(2, "b")).await;

        assert_eq!(all.recv().await.unwrap().message, b"a");
        assert_eq!(all.recv().await.unwrap().message, b"b");
        assert_eq!(one.recv().await.unwrap().message, b"a");
        assert!(one.try_recv().is_err());
        assert_eq!(two.recv().await.unwrap().message, b"b");
        assert!(two.try_recv().is_err());
    }

    #[tokio::test]
    async fn remove_listener_is_idempotent_and_closes_channel() {
        let registry = Registry::new();
        let mut listener = registry
            .add_listener(StreamKey::Stream(3), 4, OverflowPolicy::Drop)
            .await
            .unwrap();
        let id = listener.id();

        assert!(registry.remove_listener(StreamKey::Stream(3), id).await);
        assert!(!registry.remove_listener(StreamKey::Stream(3), id).await);
        assert!(!registry.remove_listener(StreamKey::All, 999).await);
        assert_eq!(listener.recv().await, None);
        assert_eq!(registry.listener_count().await, 0);
    }

    #[tokio::test]
    async fn remove_under_wrong_key_is_a_no_op() {
        let registry = Registry::new();
        let listener = registry
            .add_listener(StreamKey::Stream(1), 4, OverflowPolicy::Drop)
            .await
            .unwrap();
        assert!(!registry.remove_listener(StreamKey::All, listener.id()).await);
        assert_eq!(registry.listener_count().await, 1);
    }

    #[tokio::test]
    async fn drop_policy_discards_when_full() {
        let registry = Registry::new();
        let mut listener = registry
            .add_listener(StreamKey::All, 1, OverflowPolicy::Drop)
            .await
            .unwrap();

        registry.broadcast(&record(1, "first")).await;
        registry.broadcast(&record(1, "second")).await;

        assert_eq!(listener.recv().await.unwrap().message, b"first");
        assert!(listener.try_recv().is_err());
        assert_eq!(registry.delivered(StreamKey::All, listener.id()).await, Some(1));
    }

    #[tokio::test]
    async fn disconnect_policy_closes_slow_listener() {
        let registry = Registry::new();
        let mut listener = registry
            .add_listener(StreamKey::All, 1, OverflowPolicy::Disconnect)
            .await
            .unwrap();

        registry.broadcast(&record(1, "first")).await;
        registry.broadcast(&record(1, "second")).await;

        assert_eq!(listener.recv().await.unwrap().message, b"first");
        assert_eq!(listener.recv().await, None);
        assert_eq!(registry.delivered(StreamKey::All, listener.id()).await, None);
    }

    #[tokio::test]
    async fn dropped_receiver_is_pruned_on_broadcast() {
        let registry = Registry::new();
        let listener = registry
            .add_listener(StreamKey::Stream(1), 4, OverflowPolicy::BackPressure)
            .await
            .unwrap();
        drop(listener);

        registry.broadcast(&record(1, "x")).await;
        assert_eq!(registry.listener_count().await, 0);
    }

    #[tokio::test]
    async fn close_unblocks_back_pressure_send() {
        let registry = std::sync::Arc::new(Registry::new());
        let _stalled = registry
            .add_listener(StreamKey::All, 1, OverflowPolicy::BackPressure)
            .await
            .unwrap();
        registry.broadcast(&record(1, "fills the queue")).await;

        let blocked = {
            let registry = registry.clone();
            tokio::spawn(async move { registry.broadcast(&record(1, "blocks")).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!blocked.is_finished());

        let closed = tokio::time::timeout(Duration::from_secs(1), registry.close())
            .await
            .expect("close must not wait for a stalled listener");
        assert_eq!(closed, 1);
        blocked.await.unwrap();
    }

    #[tokio::test]
    async fn close_closes_every_listener_and_refuses_new_ones() {
        let registry = Registry::new();
        let mut a = registry.add_listener(StreamKey::All, 4, OverflowPolicy::Drop).await.unwrap();
        let mut b = registry
            .add_listener(StreamKey::Stream(7), 4, OverflowPolicy::Drop)
            .await
            .unwrap();

        assert_eq!(registry.close().await, 2);
        assert_eq!(a.recv().await, None);
        assert_eq!(b.recv().await, None);
        assert_eq!(registry.close().await, 0);
        assert!(matches!(
            registry.add_listener(StreamKey::All, 4, OverflowPolicy::Drop).await,
            Err(LogError::Closed)
        ));
    }
}
