//! FIFO asynchronous mutual exclusion.
//!
//! [`Lock`] serializes critical sections by chaining [`Deferred`]s: every
//! caller swaps a fresh deferred into the tail, waits for the previous tail
//! to settle, runs its body and then settles its own deferred. The swap
//! happens synchronously inside [`Lock::with_lock`], so bodies are entered
//! in exactly the order `with_lock` was called.

use crate::{Deferred, Settled};
use parking_lot::Mutex;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

pub struct Lock {
    tail: Mutex<Deferred<()>>,
}

impl Default for Lock {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Lock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lock")
            .field("locked", &self.is_locked())
            .finish()
    }
}

impl Lock {
    pub fn new() -> Self {
        Self {
            tail: Mutex::new(Deferred::resolved(())),
        }
    }

    /// True while some caller holds the lock or is queued for it.
    pub fn is_locked(&self) -> bool {
        self.tail.lock().is_pending()
    }

    /// Queue `body` behind every previously queued body and run it once
    /// its turn comes.
    ///
    /// The position in the queue is taken when `with_lock` is called, not
    /// when the returned future is first polled. The body's output
    /// (including any error) is returned unchanged. The lock is released
    /// when the body completes, fails, panics, or when the returned future
    /// is dropped.
    ///
    /// A body that never completes holds the lock forever.
    pub fn with_lock<F, Fut>(&self, body: F) -> impl Future<Output = Fut::Output> + use<F, Fut>
    where
        F: FnOnce() -> Fut,
        Fut: Future,
    {
        let acquire = self.enqueue();
        async move {
            let _release = acquire.await;
            body().await
        }
    }

    fn enqueue(&self) -> Acquire {
        let release = Deferred::new();
        let previous = std::mem::replace(&mut *self.tail.lock(), release.clone());
        Acquire {
            waiting: previous.settled(),
            previous,
            release: Some(release),
        }
    }
}

/// Waits for the previous holder. Owns this caller's release signal until
/// the lock is handed over.
struct Acquire {
    previous: Deferred<()>,
    waiting: Settled<()>,
    release: Option<Deferred<()>>,
}

impl Future for Acquire {
    type Output = Release;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Release> {
        match Pin::new(&mut self.waiting).poll(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(_) => Poll::Ready(Release {
                signal: self.release.take(),
            }),
        }
    }
}

impl Drop for Acquire {
    fn drop(&mut self) {
        // Abandoned before our turn: the next caller must still wait for
        // the previous holder, so hand our signal over to it.
        if let Some(release) = self.release.take() {
            self.previous.on_settled(move |_| {
                release.resolve(());
            });
        }
    }
}

struct Release {
    signal: Option<Deferred<()>>,
}

impl Drop for Release {
    fn drop(&mut self) {
        if let Some(signal) = self.signal.take() {
            signal.resolve(());
        }
    }
}
