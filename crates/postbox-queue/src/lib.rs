// Queue engine over filesystem storage. Admission control, long-poll waiter
// registries and broadcast hand-off live here; persistence is delegated to
// postbox-storage. All queue logic runs inside one process, so the waiter
// registries only need plain mutexes; the filesystem is the sole shared
// surface with other processes.
use ahash::RandomState;
use bytes::Bytes;
use hashbrown::HashMap;
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{RwLock, oneshot};

pub use postbox_storage::{MessageId, PathResolver, QueueStore, StorageError};

pub type Result<T> = std::result::Result<T, QueueError>;

#[derive(thiserror::Error, Debug)]
pub enum QueueError {
    #[error("queue size exceeded")]
    QueueFull,
    #[error("message size {size} exceeds limit of {limit} bytes")]
    MessageTooLarge { size: usize, limit: usize },
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl QueueError {
    /// True for rejections whose display text may be shown to the caller.
    /// Everything else surfaces as an opaque failure.
    pub fn is_user_visible(&self) -> bool {
        matches!(
            self,
            QueueError::QueueFull | QueueError::MessageTooLarge { .. }
        )
    }
}

const DEFAULT_MAX_QUEUE_LEN: usize = 100;
const DEFAULT_MAX_MESSAGE_BYTES: usize = 10 * 1024;

#[derive(Debug, Clone)]
pub struct QueueConfig {
    // Puts are rejected once the pending count exceeds this bound.
    pub max_queue_len: usize,
    // Payloads larger than this are rejected before anything is persisted.
    pub max_message_bytes: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_queue_len: DEFAULT_MAX_QUEUE_LEN,
            max_message_bytes: DEFAULT_MAX_MESSAGE_BYTES,
        }
    }
}

/// One persisted message handed to readers. Reads are non-destructive;
/// several concurrent readers may hold the same message.
#[derive(Debug, Clone)]
pub struct Message {
    pub id: MessageId,
    pub payload: Bytes,
}

#[derive(Debug, Clone, Hash, PartialEq, Eq)]
struct QueueKey {
    domain: String,
    queue: String,
}

impl QueueKey {
    fn new(domain: impl Into<String>, queue: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            queue: queue.into(),
        }
    }
}

#[derive(Debug, Copy, Clone, Hash, PartialEq, Eq)]
struct QueueKeyRef<'a> {
    domain: &'a str,
    queue: &'a str,
}

impl<'a> QueueKeyRef<'a> {
    fn new(domain: &'a str, queue: &'a str) -> Self {
        Self { domain, queue }
    }
}

impl<'a> hashbrown::Equivalent<QueueKey> for QueueKeyRef<'a> {
    fn equivalent(&self, key: &QueueKey) -> bool {
        self.domain == key.domain && self.queue == key.queue
    }
}

// Per-queue, in-memory, never persisted: empty after every restart.
#[derive(Debug, Default)]
struct QueueState {
    waiters: Mutex<WaiterRegistry>,
}

#[derive(Debug, Default)]
struct WaiterRegistry {
    next_id: u64,
    handles: Vec<(u64, oneshot::Sender<Message>)>,
}

impl QueueState {
    fn register_waiter(&self) -> (u64, oneshot::Receiver<Message>) {
        let mut registry = self.waiters.lock();
        let (tx, rx) = oneshot::channel();
        let id = registry.next_id;
        registry.next_id += 1;
        registry.handles.push((id, tx));
        metrics::counter!("postbox_waiters_registered_total").increment(1);
        (id, rx)
    }

    fn remove_waiter(&self, id: u64) {
        self.waiters
            .lock()
            .handles
            .retain(|(handle_id, _)| *handle_id != id);
    }

    // Pops handles from the end of the list until it is empty, so the
    // most-recently-registered waiter is served first. Every popped handle
    // gets the same message; a handle whose receiver is gone counts as
    // consumed and its failure is swallowed. Returns the completed count.
    fn deliver(&self, message: &Message) -> usize {
        let mut handles = std::mem::take(&mut self.waiters.lock().handles);
        let mut delivered = 0;
        while let Some((_, handle)) = handles.pop() {
            if handle.send(message.clone()).is_ok() {
                delivered += 1;
            }
        }
        delivered
    }

    #[cfg(test)]
    fn waiter_count(&self) -> usize {
        self.waiters.lock().handles.len()
    }
}

// RAII handle that unregisters a waiter on drop. Delivery, timeout and
// caller disconnect all end up here.
#[derive(Debug)]
struct WaiterGuard {
    state: Weak<QueueState>,
    waiter_id: u64,
}

impl Drop for WaiterGuard {
    fn drop(&mut self) {
        if let Some(state) = self.state.upgrade() {
            state.remove_waiter(self.waiter_id);
        }
    }
}

/// Multi-tenant queue hub: put/get/take/delete over `(domain, queue)` pairs.
///
/// Constructed once in the composition root and shared by `Arc`; it owns the
/// waiter registries and the storage handle, nothing lives in globals.
#[derive(Debug)]
pub struct QueueHub {
    store: QueueStore,
    config: QueueConfig,
    // Map of queue key -> waiter state, created lazily on first touch.
    queues: RwLock<HashMap<QueueKey, Arc<QueueState>, RandomState>>,
}

impl QueueHub {
    pub fn new(store: QueueStore, config: QueueConfig) -> Self {
        Self {
            store,
            config,
            queues: RwLock::new(HashMap::with_hasher(RandomState::new())),
        }
    }

    pub fn store(&self) -> &QueueStore {
        &self.store
    }

    /// Admission check: a fresh count of persisted entries, never cached.
    pub async fn check_load(&self, domain: &str, queue: &str) -> Result<usize> {
        Ok(self.store.list(domain, queue).await?.len())
    }

    /// Persists a payload and returns its id.
    ///
    /// A put that lands on an empty queue re-reads the oldest entry and
    /// broadcasts it to every waiter registered right now. A put onto a
    /// nonempty queue wakes nobody: those waiters already missed the queue's
    /// became-nonempty transition.
    pub async fn put(&self, domain: &str, queue: &str, payload: Bytes) -> Result<MessageId> {
        if payload.len() > self.config.max_message_bytes {
            return Err(QueueError::MessageTooLarge {
                size: payload.len(),
                limit: self.config.max_message_bytes,
            });
        }
        let pending = self.check_load(domain, queue).await?;
        if pending > self.config.max_queue_len {
            metrics::counter!("postbox_put_rejected_total").increment(1);
            return Err(QueueError::QueueFull);
        }

        let id = self.store.append(domain, queue, &payload).await?;
        metrics::counter!("postbox_put_total").increment(1);

        if pending == 0 {
            if let Some(message) = self.oldest_message(domain, queue).await? {
                let delivered = self.queue_state(domain, queue).await.deliver(&message);
                metrics::counter!("postbox_broadcast_total").increment(delivered as u64);
                tracing::debug!(domain, queue, delivered, "handed off message to waiters");
            }
        }
        Ok(id)
    }

    /// Resolves with the oldest pending message, or waits for a later put's
    /// broadcast. `Ok(None)` when `wait` elapses with nothing delivered; the
    /// registration is removed on every exit path.
    ///
    /// Reads never delete: any number of concurrent callers may receive the
    /// same message.
    pub async fn get(&self, domain: &str, queue: &str, wait: Duration) -> Result<Option<Message>> {
        let pending = self.check_load(domain, queue).await?;
        let state = self.queue_state(domain, queue).await;
        let (waiter_id, receiver) = state.register_waiter();
        let _guard = WaiterGuard {
            state: Arc::downgrade(&state),
            waiter_id,
        };

        if pending > 0 {
            match self.oldest_message(domain, queue).await? {
                Some(message) => {
                    // Registered last, served first: the broadcast resolves
                    // this caller on the same turn, along with everyone who
                    // was already waiting.
                    let delivered = state.deliver(&message);
                    tracing::debug!(domain, queue, delivered, "delivered pending message");
                }
                // Drained between the count and the read; fall through and wait.
                None => {}
            }
        }

        match tokio::time::timeout(wait, receiver).await {
            Ok(Ok(message)) => Ok(Some(message)),
            // The sending side vanished without completing; same as a timeout.
            Ok(Err(_)) => Ok(None),
            Err(_elapsed) => Ok(None),
        }
    }

    /// `get` followed by delete of the returned id: the only read path that
    /// removes an entry. Concurrent takes of the same message race on the
    /// delete; exactly one wins, the rest fail `NotFound`.
    pub async fn take(&self, domain: &str, queue: &str, wait: Duration) -> Result<Option<Message>> {
        let Some(message) = self.get(domain, queue, wait).await? else {
            return Ok(None);
        };
        self.store.delete(domain, queue, &message.id).await?;
        metrics::counter!("postbox_take_total").increment(1);
        Ok(Some(message))
    }

    pub async fn delete(&self, domain: &str, queue: &str, id: &MessageId) -> Result<()> {
        self.store.delete(domain, queue, id).await?;
        Ok(())
    }

    async fn oldest_message(&self, domain: &str, queue: &str) -> Result<Option<Message>> {
        let ids = self.store.list(domain, queue).await?;
        let Some(id) = ids.first().copied() else {
            return Ok(None);
        };
        let payload = self.store.read(domain, queue, &id).await?;
        Ok(Some(Message { id, payload }))
    }

    async fn queue_state(&self, domain: &str, queue: &str) -> Arc<QueueState> {
        {
            let guard = self.queues.read().await;
            if let Some(state) = guard.get(&QueueKeyRef::new(domain, queue)) {
                return Arc::clone(state);
            }
        }
        let mut guard = self.queues.write().await;
        Arc::clone(
            guard
                .entry(QueueKey::new(domain, queue))
                .or_insert_with(|| Arc::new(QueueState::default())),
        )
    }

    #[cfg(test)]
    async fn waiter_count(&self, domain: &str, queue: &str) -> usize {
        self.queue_state(domain, queue).await.waiter_count()
    }
}
