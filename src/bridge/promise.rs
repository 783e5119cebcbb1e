//! Single-assignment promise shared across threads.
//!
//! A [`Promise`] is settled at most once by [`Promise::resolve`] or
//! [`Promise::reject`]. Callbacks registered before settlement run in
//! registration order on the settling thread; callbacks registered afterwards
//! run immediately on the registering thread. The promise is also a
//! [`std::future::Future`], so host code can simply `.await` it.

use parking_lot::Mutex;
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};

use super::error::BridgeError;

type SuccessCallback<T> = Box<dyn FnOnce(T) + Send>;
type FailureCallback = Box<dyn FnOnce(BridgeError) + Send>;

/// Observable state of a promise.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromiseState {
    Pending,
    Resolved,
    Rejected,
}

enum Settlement<T> {
    Pending,
    Resolved(T),
    Rejected(BridgeError),
}

struct Inner<T> {
    settlement: Settlement<T>,
    on_success: Vec<SuccessCallback<T>>,
    on_failure: Vec<FailureCallback>,
    wakers: Vec<Waker>,
}

struct Shared<T> {
    inner: Mutex<Inner<T>>,
}

impl<T> Drop for Shared<T> {
    fn drop(&mut self) {
        if matches!(self.inner.get_mut().settlement, Settlement::Pending) {
            tracing::warn!(
                target: "jsbridge::promise",
                "Promise dropped before it was resolved or rejected"
            );
        }
    }
}

/// Thread-safe single-assignment promise.
pub struct Promise<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for Promise<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> std::fmt::Debug for Promise<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Promise")
            .field("state", &self.state())
            .finish()
    }
}

impl<T> Promise<T> {
    pub fn state(&self) -> PromiseState {
        match self.shared.inner.lock().settlement {
            Settlement::Pending => PromiseState::Pending,
            Settlement::Resolved(_) => PromiseState::Resolved,
            Settlement::Rejected(_) => PromiseState::Rejected,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.state() == PromiseState::Pending
    }
}

impl<T: Clone + Send + 'static> Default for Promise<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Send + 'static> Promise<T> {
    /// Create a pending promise.
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                inner: Mutex::new(Inner {
                    settlement: Settlement::Pending,
                    on_success: Vec::new(),
                    on_failure: Vec::new(),
                    wakers: Vec::new(),
                }),
            }),
        }
    }

    /// Create an already resolved promise.
    pub fn resolved(value: T) -> Self {
        let promise = Self::new();
        let _ = promise.resolve(value);
        promise
    }

    /// Create an already rejected promise.
    pub fn rejected(error: BridgeError) -> Self {
        let promise = Self::new();
        let _ = promise.reject(error);
        promise
    }

    /// Settle with a value and run the success callbacks.
    pub fn resolve(&self, value: T) -> Result<(), BridgeError> {
        let (callbacks, wakers) = {
            let mut inner = self.shared.inner.lock();
            if !matches!(inner.settlement, Settlement::Pending) {
                return Err(BridgeError::AlreadySettled);
            }
            inner.settlement = Settlement::Resolved(value.clone());
            inner.on_failure.clear();
            (
                std::mem::take(&mut inner.on_success),
                std::mem::take(&mut inner.wakers),
            )
        };

        for callback in callbacks {
            run_guarded("success", || callback(value.clone()));
        }
        wakers.into_iter().for_each(Waker::wake);
        Ok(())
    }

    /// Settle with an error and run the failure callbacks.
    pub fn reject(&self, error: BridgeError) -> Result<(), BridgeError> {
        let (callbacks, wakers) = {
            let mut inner = self.shared.inner.lock();
            if !matches!(inner.settlement, Settlement::Pending) {
                return Err(BridgeError::AlreadySettled);
            }
            inner.settlement = Settlement::Rejected(error.clone());
            inner.on_success.clear();
            (
                std::mem::take(&mut inner.on_failure),
                std::mem::take(&mut inner.wakers),
            )
        };

        for callback in callbacks {
            run_guarded("failure", || callback(error.clone()));
        }
        wakers.into_iter().for_each(Waker::wake);
        Ok(())
    }

    /// Settle from a `Result`.
    pub fn settle(&self, result: Result<T, BridgeError>) -> Result<(), BridgeError> {
        match result {
            Ok(value) => self.resolve(value),
            Err(error) => self.reject(error),
        }
    }

    /// Register a success callback.
    pub fn on_success<F>(&self, callback: F) -> &Self
    where
        F: FnOnce(T) + Send + 'static,
    {
        let ready = {
            let mut inner = self.shared.inner.lock();
            match &inner.settlement {
                Settlement::Pending => {
                    inner.on_success.push(Box::new(callback));
                    return self;
                }
                Settlement::Resolved(value) => Some((value.clone(), callback)),
                Settlement::Rejected(_) => None,
            }
        };
        if let Some((value, callback)) = ready {
            run_guarded("success", || callback(value));
        }
        self
    }

    /// Register a failure callback.
    pub fn on_failure<F>(&self, callback: F) -> &Self
    where
        F: FnOnce(BridgeError) + Send + 'static,
    {
        let ready = {
            let mut inner = self.shared.inner.lock();
            match &inner.settlement {
                Settlement::Pending => {
                    inner.on_failure.push(Box::new(callback));
                    return self;
                }
                Settlement::Rejected(error) => Some((error.clone(), callback)),
                Settlement::Resolved(_) => None,
            }
        };
        if let Some((error, callback)) = ready {
            run_guarded("failure", || callback(error));
        }
        self
    }

    /// Block the current thread until the promise settles.
    ///
    /// Must not be called on the thread expected to settle it.
    pub fn wait(&self) -> Result<T, BridgeError> {
        futures::executor::block_on(self.clone())
    }

    /// Derive a promise settled by applying `f` to this promise's value.
    pub fn map<U, F>(&self, f: F) -> Promise<U>
    where
        U: Clone + Send + 'static,
        F: FnOnce(T) -> Result<U, BridgeError> + Send + 'static,
    {
        let mapped = Promise::new();
        let on_ok = mapped.clone();
        let on_err = mapped.clone();
        self.on_success(move |value| {
            let _ = on_ok.settle(f(value));
        });
        self.on_failure(move |error| {
            let _ = on_err.reject(error);
        });
        mapped
    }
}

impl<T: Clone + Send + 'static> Future for Promise<T> {
    type Output = Result<T, BridgeError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut inner = self.shared.inner.lock();
        match &inner.settlement {
            Settlement::Resolved(value) => Poll::Ready(Ok(value.clone())),
            Settlement::Rejected(error) => Poll::Ready(Err(error.clone())),
            Settlement::Pending => {
                if !inner.wakers.iter().any(|w| w.will_wake(cx.waker())) {
                    inner.wakers.push(cx.waker().clone());
                }
                Poll::Pending
            }
        }
    }
}

fn run_guarded<F: FnOnce()>(kind: &str, callback: F) {
    if let Err(payload) = catch_unwind(AssertUnwindSafe(callback)) {
        let error = BridgeError::from_panic(payload);
        tracing::error!(
            target: "jsbridge::promise",
            "Error in {} callback: {}",
            kind,
            error
        );
    }
}

/// Run `work` on a worker thread and return a promise for its result.
///
/// Exposed functions with the full-promise call type use this to leave the
/// dispatching thread immediately.
pub fn spawn_blocking_promise<T, F>(work: F) -> Promise<T>
where
    T: Clone + Send + 'static,
    F: FnOnce() -> Result<T, BridgeError> + Send + 'static,
{
    let promise = Promise::new();
    let settle = promise.clone();
    let spawned = std::thread::Builder::new()
        .name("jsbridge-worker".to_string())
        .spawn(move || {
            let result = catch_unwind(AssertUnwindSafe(work))
                .unwrap_or_else(|payload| Err(BridgeError::from_panic(payload)));
            let _ = settle.settle(result);
        });
    if let Err(err) = spawned {
        let _ = promise.reject(BridgeError::invocation(&err));
    }
    promise
}
