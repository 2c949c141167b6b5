//! Host timing primitives.
//!
//! Schedulers never talk to a clock or a queue directly; they go through a
//! [`Host`]. [`crate::event_loop::EventLoop`] is the in-process
//! implementation; embedders with their own main loop (a GUI toolkit, a
//! browser shim) implement the trait over their native primitives.
//!
//! Hosts must never run a task synchronously from inside the call that
//! queued it.

use std::cell::Cell;
use std::fmt;
use std::rc::Rc;
use std::time::Duration;

use crate::error::SchedulerCallbackError;

pub type HostTask = Box<dyn FnOnce() + 'static>;

/// Opaque handle returned by a host primitive. Only meaningful to the
/// cancellation function matching the primitive that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HostHandle(u64);

impl HostHandle {
    /// For host implementations: wrap a native handle value
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub fn into_raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for HostHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

pub trait Host {
    /// Run `task` at microtask priority.
    fn queue_microtask(&self, task: HostTask);

    /// Run `task` once `delay` has elapsed.
    fn set_timeout(&self, delay: Duration, task: HostTask) -> HostHandle;

    /// Cancel a pending timeout. Unknown or already fired handles are ignored.
    fn clear_timeout(&self, handle: HostHandle);

    /// Run `task` before the next frame is presented.
    fn request_animation_frame(&self, task: HostTask) -> HostHandle;

    fn cancel_animation_frame(&self, handle: HostHandle);

    /// Idle-callback support, if the host has it right now. Queried on
    /// every use since support may change over the host's lifetime.
    fn idle_callbacks(&self) -> Option<&dyn IdleCallbacks> {
        None
    }

    /// Cancel a handle issued by [`IdleCallbacks::request_idle_callback`].
    ///
    /// Must reach the request even after [`Host::idle_callbacks`] stopped
    /// returning support. The default only works while support lasts, so
    /// hosts whose support can go away override it.
    fn cancel_idle_request(&self, handle: HostHandle) {
        if let Some(idle) = self.idle_callbacks() {
            idle.cancel_idle_callback(handle);
        }
    }

    /// Receives callback errors that have no caller to return to, i.e.
    /// those raised from host-fired callbacks.
    fn report_error(&self, err: SchedulerCallbackError) {
        tracing::error!(error = %err, stack = %err.stack(), "uncaught scheduler callback error");
    }
}

pub trait IdleCallbacks {
    fn request_idle_callback(&self, task: HostTask) -> HostHandle;

    fn cancel_idle_callback(&self, handle: HostHandle);
}

/// A microtask that can be cancelled after it was queued.
///
/// Microtasks cannot be removed from the host queue; cancelling sets a
/// flag the queued task checks before running, so a cancelled microtask
/// still occupies its queue slot.
#[derive(Debug)]
pub struct MicrotaskHandle {
    cancelled: Rc<Cell<bool>>,
}

impl MicrotaskHandle {
    pub fn queue(host: &dyn Host, task: HostTask) -> Self {
        let cancelled = Rc::new(Cell::new(false));
        let flag = Rc::clone(&cancelled);
        host.queue_microtask(Box::new(move || {
            if !flag.get() {
                task();
            }
        }));
        Self { cancelled }
    }

    pub fn cancel(&self) {
        self.cancelled.set(true);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.get()
    }
}

/// Which primitive an idle request ended up using.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdleRequest {
    IdleCallback(HostHandle),
    AnimationFrame(HostHandle),
}

impl IdleRequest {
    /// Request an idle callback, falling back to an animation frame when
    /// the host has no idle-callback support at this moment.
    pub fn request(host: &dyn Host, task: HostTask) -> Self {
        match host.idle_callbacks() {
            Some(idle) => Self::IdleCallback(idle.request_idle_callback(task)),
            None => {
                tracing::trace!("idle callbacks unavailable; using animation frame");
                Self::AnimationFrame(host.request_animation_frame(task))
            }
        }
    }

    /// Cancel through the primitive that produced the handle.
    pub fn cancel(self, host: &dyn Host) {
        match self {
            Self::IdleCallback(handle) => host.cancel_idle_request(handle),
            Self::AnimationFrame(handle) => host.cancel_animation_frame(handle),
        }
    }
}
