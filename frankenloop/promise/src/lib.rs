use anyhow::Error;
use parking_lot::Mutex;
use std::fmt;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};
use thiserror::*;

pub mod lock;

pub use lock::Lock;

#[derive(Debug, Error)]
#[error("Promise was dropped before completion")]
pub struct BrokenPromise {}

#[derive(Debug, Error)]
#[error("Deferred result was already taken by another future")]
pub struct ResultTaken {}

/// Observable lifecycle of a [`Deferred`]. Moves out of `Pending` at most once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeferredState {
    Pending,
    Resolved,
    Rejected,
}

impl DeferredState {
    pub fn is_pending(self) -> bool {
        self == Self::Pending
    }

    /// True once the deferred was either resolved or rejected.
    pub fn is_finalized(self) -> bool {
        !self.is_pending()
    }
}

type Continuation = Box<dyn FnOnce(DeferredState) + Send>;

struct Core<T> {
    state: DeferredState,
    result: Option<anyhow::Result<T>>,
    wakers: Vec<Waker>,
    continuations: Vec<Continuation>,
    producers: usize,
}

impl<T> Core<T> {
    fn register(&mut self, waker: &Waker) {
        if !self.wakers.iter().any(|w| w.will_wake(waker)) {
            self.wakers.push(waker.clone());
        }
    }
}

/// A manually settled future.
///
/// The producer side calls [`Deferred::resolve`] or [`Deferred::reject`];
/// only the first of those calls has any effect. Consumers await
/// [`Deferred::future`] (which yields the value) or [`Deferred::settled`]
/// (which only observes the outcome), or attach a continuation with
/// [`Deferred::on_settled`].
///
/// `Deferred` is cheaply cloneable; every clone is a producer handle.
/// When the last producer handle is dropped while still pending, the
/// deferred rejects itself with [`BrokenPromise`].
pub struct Deferred<T> {
    core: Arc<Mutex<Core<T>>>,
}

impl<T> Default for Deferred<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for Deferred<T> {
    fn clone(&self) -> Self {
        self.core.lock().producers += 1;
        Self {
            core: Arc::clone(&self.core),
        }
    }
}

impl<T> fmt::Debug for Deferred<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Deferred")
            .field("state", &self.state())
            .finish()
    }
}

impl<T> Deferred<T> {
    pub fn new() -> Self {
        Self {
            core: Arc::new(Mutex::new(Core {
                state: DeferredState::Pending,
                result: None,
                wakers: Vec::new(),
                continuations: Vec::new(),
                producers: 1,
            })),
        }
    }

    /// Create a deferred that is already resolved with `value`
    pub fn resolved(value: T) -> Self {
        let deferred = Self::new();
        deferred.resolve(value);
        deferred
    }

    /// Create a deferred that is already rejected with `err`
    pub fn rejected(err: Error) -> Self {
        let deferred = Self::new();
        deferred.reject(err);
        deferred
    }

    /// Resolve with `value`. Returns false (and drops `value`) if the
    /// deferred was already finalized.
    pub fn resolve(&self, value: T) -> bool {
        self.settle(Ok(value))
    }

    /// Reject with `err`. Returns false if the deferred was already finalized.
    pub fn reject(&self, err: Error) -> bool {
        self.settle(Err(err))
    }

    pub fn state(&self) -> DeferredState {
        self.core.lock().state
    }

    pub fn is_pending(&self) -> bool {
        self.state().is_pending()
    }

    pub fn is_finalized(&self) -> bool {
        self.state().is_finalized()
    }

    pub fn is_resolved(&self) -> bool {
        self.state() == DeferredState::Resolved
    }

    pub fn is_rejected(&self) -> bool {
        self.state() == DeferredState::Rejected
    }

    /// A future yielding the settled value. The value is handed to the
    /// first future that observes it; later ones get [`ResultTaken`].
    pub fn future(&self) -> DeferredFuture<T> {
        DeferredFuture {
            core: Arc::clone(&self.core),
        }
    }

    /// A future that completes with the terminal state without consuming
    /// the value.
    pub fn settled(&self) -> Settled<T> {
        Settled {
            core: Arc::clone(&self.core),
        }
    }

    /// Run `func` once the deferred is finalized. Runs immediately, on the
    /// calling thread, when that already happened.
    pub fn on_settled<F>(&self, func: F)
    where
        F: FnOnce(DeferredState) + Send + 'static,
    {
        let mut core = self.core.lock();
        if core.state.is_pending() {
            core.continuations.push(Box::new(func));
            return;
        }
        let state = core.state;
        drop(core);
        func(state);
    }

    fn settle(&self, result: anyhow::Result<T>) -> bool {
        let (state, wakers, continuations) = {
            let mut core = self.core.lock();
            if core.state.is_finalized() {
                return false;
            }
            core.state = if result.is_ok() {
                DeferredState::Resolved
            } else {
                DeferredState::Rejected
            };
            core.result = Some(result);
            (
                core.state,
                std::mem::take(&mut core.wakers),
                std::mem::take(&mut core.continuations),
            )
        };
        // Wake and notify outside of the lock so that continuations may
        // freely touch this deferred again.
        for waker in wakers {
            waker.wake();
        }
        for continuation in continuations {
            continuation(state);
        }
        true
    }
}

impl<T> Drop for Deferred<T> {
    fn drop(&mut self) {
        let abandoned = {
            let mut core = self.core.lock();
            core.producers -= 1;
            core.producers == 0 && core.state.is_pending()
        };
        if abandoned {
            self.settle(Err(BrokenPromise {}.into()));
        }
    }
}

/// Consumer half of a [`Deferred`], yielding its value.
pub struct DeferredFuture<T> {
    core: Arc<Mutex<Core<T>>>,
}

impl<T> fmt::Debug for DeferredFuture<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeferredFuture")
            .field("state", &self.core.lock().state)
            .finish()
    }
}

impl<T> std::future::Future for DeferredFuture<T> {
    type Output = Result<T, Error>;

    fn poll(self: Pin<&mut Self>, ctx: &mut Context) -> Poll<Self::Output> {
        let mut core = self.core.lock();
        if core.state.is_pending() {
            core.register(ctx.waker());
            return Poll::Pending;
        }
        match core.result.take() {
            Some(result) => Poll::Ready(result),
            None => Poll::Ready(Err(ResultTaken {}.into())),
        }
    }
}

/// Completes with the terminal [`DeferredState`] of a [`Deferred`].
pub struct Settled<T> {
    core: Arc<Mutex<Core<T>>>,
}

impl<T> fmt::Debug for Settled<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Settled")
            .field("state", &self.core.lock().state)
            .finish()
    }
}

impl<T> std::future::Future for Settled<T> {
    type Output = DeferredState;

    fn poll(self: Pin<&mut Self>, ctx: &mut Context) -> Poll<Self::Output> {
        let mut core = self.core.lock();
        if core.state.is_pending() {
            core.register(ctx.waker());
            Poll::Pending
        } else {
            Poll::Ready(core.state)
        }
    }
}
