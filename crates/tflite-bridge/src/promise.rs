//! Promises settled from background work.
//!
//! A [`Promise`] is created on the runtime thread by [`create_promise`], which
//! hands the executor a [`Deferred`]. The deferred may be moved to any thread;
//! resolving or rejecting it posts the settlement through the
//! [`CallInvoker`], so the promise state and its continuations only ever change
//! on the runtime thread.
//!
//! A promise settles at most once. The first call to `resolve`, `reject` or
//! `settle_with` wins; later calls are ignored and logged. A promise whose
//! deferred handles are all dropped unsettled is rejected with
//! [`ABANDONED_MESSAGE`].

use crate::host::{CallInvoker, JsError, Runtime, Value};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// Fulfillment value or rejection reason.
pub type Outcome = Result<Value, JsError>;

type Continuation = Box<dyn FnOnce(&mut Runtime, Outcome) + Send>;

enum PromiseState {
    Pending(Vec<Continuation>),
    Fulfilled(Value),
    Rejected(JsError),
}

/// A promise value. Clones refer to the same promise.
#[derive(Clone)]
pub struct Promise {
    state: Arc<Mutex<PromiseState>>,
}

impl Promise {
    fn pending() -> Self {
        Self {
            state: Arc::new(Mutex::new(PromiseState::Pending(Vec::new()))),
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(*self.lock(), PromiseState::Pending(_))
    }

    /// The outcome, once settled.
    pub fn outcome(&self) -> Option<Outcome> {
        match &*self.lock() {
            PromiseState::Pending(_) => None,
            PromiseState::Fulfilled(value) => Some(Ok(value.clone())),
            PromiseState::Rejected(err) => Some(Err(err.clone())),
        }
    }

    /// Registers a continuation. It runs on the runtime thread when the promise
    /// settles, or right away if it already has.
    pub fn on_settled<F>(&self, runtime: &mut Runtime, f: F)
    where
        F: FnOnce(&mut Runtime, Outcome) + Send + 'static,
    {
        let settled = {
            let mut state = self.lock();
            match &mut *state {
                PromiseState::Pending(continuations) => {
                    continuations.push(Box::new(f));
                    return;
                }
                PromiseState::Fulfilled(value) => Ok(value.clone()),
                PromiseState::Rejected(err) => Err(err.clone()),
            }
        };
        f(runtime, settled);
    }

    /// Whether both handles refer to the same promise.
    pub fn ptr_eq(&self, other: &Promise) -> bool {
        Arc::ptr_eq(&self.state, &other.state)
    }

    /// Moves the promise out of `Pending`. Returns `false` if it had already
    /// settled.
    fn settle(&self, runtime: &mut Runtime, outcome: Outcome) -> bool {
        debug_assert!(runtime.is_owner_thread(), "promise settled off the runtime thread");
        let continuations = {
            let mut state = self.lock();
            let next = match &outcome {
                Ok(value) => PromiseState::Fulfilled(value.clone()),
                Err(err) => PromiseState::Rejected(err.clone()),
            };
            match std::mem::replace(&mut *state, next) {
                PromiseState::Pending(continuations) => continuations,
                previous => {
                    *state = previous;
                    return false;
                }
            }
        };
        for continuation in continuations {
            continuation(runtime, outcome.clone());
        }
        true
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, PromiseState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl fmt::Debug for Promise {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &*self.lock() {
            PromiseState::Pending(_) => f.write_str("Promise { <pending> }"),
            PromiseState::Fulfilled(value) => write!(f, "Promise {{ {value:?} }}"),
            PromiseState::Rejected(err) => write!(f, "Promise {{ <rejected> {err} }}"),
        }
    }
}

/// Message a promise is rejected with when every [`Deferred`] for it is
/// dropped without settling, e.g. when a worker panics or its executor has
/// shut down.
pub const ABANDONED_MESSAGE: &str = "Promise was abandoned: the background task ended without settling it";

/// State shared by all clones of one [`Deferred`].
struct DeferredShared {
    promise: Promise,
    invoker: Arc<dyn CallInvoker>,
    claimed: AtomicBool,
}

impl DeferredShared {
    /// Claims the settlement. Only the first caller gets `true`.
    fn claim(&self) -> bool {
        !self.claimed.swap(true, Ordering::AcqRel)
    }

    fn post<F>(&self, producer: F)
    where
        F: FnOnce(&mut Runtime) -> Outcome + Send + 'static,
    {
        let promise = self.promise.clone();
        self.invoker.invoke_async(Box::new(move |runtime| {
            let outcome = producer(runtime);
            promise.settle(runtime, outcome);
        }));
    }
}

impl Drop for DeferredShared {
    fn drop(&mut self) {
        if self.claim() {
            log::warn!("Rejecting promise abandoned by its background task");
            self.post(|_| Err(JsError::new(ABANDONED_MESSAGE)));
        }
    }
}

/// Settlement handle for a promise. Cheap to clone; all clones share one
/// settle-once guard.
///
/// If the last clone is dropped before anyone settles, the promise is
/// rejected with [`ABANDONED_MESSAGE`].
#[derive(Clone)]
pub struct Deferred {
    shared: Arc<DeferredShared>,
}

impl Deferred {
    pub fn promise(&self) -> &Promise {
        &self.shared.promise
    }

    /// Fulfills the promise with `value`.
    pub fn resolve(&self, value: Value) -> bool {
        self.settle_with(move |_| Ok(value))
    }

    /// Rejects the promise.
    pub fn reject(&self, error: impl Into<JsError>) -> bool {
        let error = error.into();
        self.settle_with(move |_| Err(error))
    }

    /// Settles with the outcome of `producer`, evaluated on the runtime thread.
    ///
    /// Used when the fulfillment value must be built with runtime access, for
    /// example wrapping a native object or copying tensors into typed arrays.
    /// Returns `false`, without scheduling anything, if the promise was already
    /// claimed.
    pub fn settle_with<F>(&self, producer: F) -> bool
    where
        F: FnOnce(&mut Runtime) -> Outcome + Send + 'static,
    {
        if !self.shared.claim() {
            log::warn!("Ignoring repeated settlement of a promise");
            return false;
        }
        self.shared.post(producer);
        true
    }
}

/// Creates a pending promise and runs `executor` with its [`Deferred`].
///
/// Must be called on the runtime thread. The executor runs synchronously and
/// is expected to hand the deferred to background work and return.
pub fn create_promise<F>(runtime: &Runtime, invoker: &Arc<dyn CallInvoker>, executor: F) -> Promise
where
    F: FnOnce(Deferred),
{
    debug_assert!(runtime.is_owner_thread(), "promise created off the runtime thread");
    let promise = Promise::pending();
    executor(Deferred {
        shared: Arc::new(DeferredShared {
            promise: promise.clone(),
            invoker: invoker.clone(),
            claimed: AtomicBool::new(false),
        }),
    });
    promise
}
