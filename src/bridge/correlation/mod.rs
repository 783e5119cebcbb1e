//! Correlation of asynchronous host-to-script calls with their results.
//!
//! Each call that expects a result gets a fresh correlation ID. The entry is
//! removed atomically when the completion arrives, so a second completion for
//! the same ID finds nothing and is reported as `NoSuchCorrelation`.

mod pending;

pub(crate) use pending::PendingCompletion;

use parking_lot::Mutex;
use serde_json::Value as Json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use super::error::BridgeError;
use super::event_loop::EventLoop;
use super::promise::Promise;
use super::types::TypeDesc;
use super::value::Value;
use super::wire::Answer;

/// Integer ID pairing a call with its completion.
pub type CorrelationId = u64;

/// Name of the thread promises are settled on.
pub const SETTLE_THREAD_NAME: &str = "jsbridge-settle";

/// Statistics about pending calls.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CorrelationStats {
    /// Number of calls awaiting completion
    pub pending_count: usize,
    /// Total calls registered
    pub total_registered: usize,
    /// Total completions accepted
    pub total_completed: usize,
    /// Total calls that expired
    pub total_timed_out: usize,
}

pub struct CorrelationTable {
    pending: Mutex<HashMap<CorrelationId, PendingCompletion>>,
    next_id: AtomicU64,
    total_registered: AtomicUsize,
    total_completed: AtomicUsize,
    total_timed_out: AtomicUsize,
    settler: EventLoop,
    timeout: Option<Duration>,
}

impl CorrelationTable {
    pub fn new(settler: EventLoop, timeout: Option<Duration>) -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(0),
            total_registered: AtomicUsize::new(0),
            total_completed: AtomicUsize::new(0),
            total_timed_out: AtomicUsize::new(0),
            settler,
            timeout,
        }
    }

    /// Spawn the settle thread and build a table around it.
    pub fn spawn(timeout: Option<Duration>) -> Result<Arc<Self>, BridgeError> {
        Ok(Arc::new(Self::new(
            EventLoop::spawn(SETTLE_THREAD_NAME)?,
            timeout,
        )))
    }

    /// Allocate an ID and the promise its completion will settle.
    pub fn register(self: &Arc<Self>, expected: TypeDesc) -> (CorrelationId, Promise<Value>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let promise = Promise::new();
        self.pending
            .lock()
            .insert(id, PendingCompletion::new(id, expected, promise.clone()));
        self.total_registered.fetch_add(1, Ordering::Relaxed);

        if let Some(timeout) = self.timeout {
            let table: Weak<Self> = Arc::downgrade(self);
            self.settler.schedule(timeout, move || {
                if let Some(table) = table.upgrade() {
                    table.expire(id, timeout);
                }
            });
        }
        (id, promise)
    }

    fn take(&self, id: CorrelationId) -> Result<PendingCompletion, BridgeError> {
        self.pending
            .lock()
            .remove(&id)
            .ok_or(BridgeError::NoSuchCorrelation(id))
    }

    /// Accept the completion for `id`.
    ///
    /// The entry is removed before anything else happens; decoding and
    /// settlement then run on the settle thread.
    pub fn complete<D>(&self, id: CorrelationId, answer: Answer, decode: D) -> Result<(), BridgeError>
    where
        D: FnOnce(&Json, &TypeDesc) -> Result<Value, BridgeError> + Send + 'static,
    {
        let pending = self.take(id)?;
        self.total_completed.fetch_add(1, Ordering::Relaxed);
        self.settler.execute(move || pending.settle(answer, decode));
        Ok(())
    }

    /// Fail a pending call, e.g. when its request could not be sent.
    pub fn cancel(&self, id: CorrelationId, error: BridgeError) -> Result<(), BridgeError> {
        let pending = self.take(id)?;
        self.settler.execute(move || pending.fail(error));
        Ok(())
    }

    /// Fail every pending call.
    pub fn cancel_all(&self, error: BridgeError) -> usize {
        let drained: Vec<_> = self.pending.lock().drain().map(|(_, p)| p).collect();
        let count = drained.len();
        for pending in drained {
            let error = error.clone();
            self.settler.execute(move || pending.fail(error));
        }
        count
    }

    fn expire(&self, id: CorrelationId, timeout: Duration) {
        if let Ok(pending) = self.take(id) {
            self.total_timed_out.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(
                target: "jsbridge::correlation",
                correlation = id,
                timeout_ms = timeout.as_millis() as u64,
                "No completion after {:?}",
                pending.registered_at.elapsed()
            );
            pending.fail(BridgeError::Timeout(timeout.as_millis() as u64));
        }
    }

    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// IDs of every pending call, ascending.
    pub fn pending_ids(&self) -> Vec<CorrelationId> {
        let mut ids: Vec<_> = self.pending.lock().keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn stats(&self) -> CorrelationStats {
        CorrelationStats {
            pending_count: self.len(),
            total_registered: self.total_registered.load(Ordering::Relaxed),
            total_completed: self.total_completed.load(Ordering::Relaxed),
            total_timed_out: self.total_timed_out.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::config::Limits;
    use crate::bridge::conversion::decode;
    use serde_json::json;

    fn decode_default(json: &Json, desc: &TypeDesc) -> Result<Value, BridgeError> {
        decode(json, desc, Limits::default())
    }

    #[tokio::test]
    async fn test_register_and_complete() {
        let table = CorrelationTable::spawn(None).unwrap();
        let (first, promise) = table.register(TypeDesc::string());
        let (second, _other) = table.register(TypeDesc::string());
        assert!(second > first);
        assert_eq!(table.pending_ids(), vec![first, second]);

        table
            .complete(first, Answer::value(json!("hi")), decode_default)
            .unwrap();
        assert_eq!(table.len(), 1);
        assert_eq!(promise.await, Ok(Value::from("hi")));

        table.cancel(second, BridgeError::ChannelClosed).unwrap();
        assert!(table.is_empty());
    }

    #[tokio::test]
    async fn test_second_completion_is_rejected() {
        let table = CorrelationTable::spawn(None).unwrap();
        let (id, promise) = table.register(TypeDesc::int());
        table.complete(id, Answer::value(json!(1)), decode_default).unwrap();
        assert_eq!(
            table.complete(id, Answer::value(json!(2)), decode_default),
            Err(BridgeError::NoSuchCorrelation(id))
        );
        assert_eq!(promise.await, Ok(Value::Int(1)));
        let stats = table.stats();
        assert_eq!(stats.total_registered, 1);
        assert_eq!(stats.total_completed, 1);
        assert_eq!(stats.pending_count, 0);
    }

    #[tokio::test]
    async fn test_concurrent_completions_have_one_winner() {
        let table = CorrelationTable::spawn(None).unwrap();
        let (id, promise) = table.register(TypeDesc::int());
        let threads: Vec<_> = (0..8)
            .map(|i| {
                let table = table.clone();
                std::thread::spawn(move || {
                    table
                        .complete(id, Answer::value(json!(i)), decode_default)
                        .is_ok()
                })
            })
            .collect();
        let wins = threads
            .into_iter()
            .map(|t| t.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(wins, 1);
        assert!(promise.await.is_ok());
    }

    #[tokio::test]
    async fn test_settles_on_settle_thread() {
        let table = CorrelationTable::spawn(None).unwrap();
        let (id, promise) = table.register(TypeDesc::int());
        let (tx, rx) = std::sync::mpsc::channel();
        promise.on_success(move |_| {
            let _ = tx.send(std::thread::current().name().map(str::to_string));
        });
        table.complete(id, Answer::value(json!(5)), decode_default).unwrap();
        let name = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(name.as_deref(), Some(SETTLE_THREAD_NAME));
    }

    #[tokio::test]
    async fn test_timeout_rejects_and_removes() {
        let table = CorrelationTable::spawn(Some(Duration::from_millis(30))).unwrap();
        let (id, promise) = table.register(TypeDesc::int());
        assert_eq!(promise.await, Err(BridgeError::Timeout(30)));
        assert!(table.is_empty());
        assert_eq!(
            table.complete(id, Answer::void(), decode_default),
            Err(BridgeError::NoSuchCorrelation(id))
        );
        assert_eq!(table.stats().total_timed_out, 1);
    }

    #[tokio::test]
    async fn test_cancel_all() {
        let table = CorrelationTable::spawn(None).unwrap();
        let (_, a) = table.register(TypeDesc::Unit);
        let (_, b) = table.register(TypeDesc::Unit);
        assert_eq!(table.cancel_all(BridgeError::ChannelClosed), 2);
        assert_eq!(a.await, Err(BridgeError::ChannelClosed));
        assert_eq!(b.await, Err(BridgeError::ChannelClosed));
    }
}
