//! frankenloop-core: cooperative scheduling on a single-threaded event loop
//!
//! Callers describe *when* a callback should run (synchronously, as a
//! microtask, after a timeout, on the next animation frame, when idle) and
//! a [`Host`] supplies the timing primitives that make it happen.
//!
//! # Architecture
//!
//! ```text
//! Scheduler<S> (frozen flag, pending re-arm)
//!      │ schedule_core / cancel_core
//!      ▼
//! ScheduleStrategy (immediate, microtask, macrotask, timeout, frame, idle)
//!      │ queue_microtask / set_timeout / request_animation_frame / ...
//!      ▼
//! Host ── EventLoop (virtual or realtime clock)
//! ```
//!
//! # Modules
//!
//! - `host`: host primitive trait, opaque handles, idle fallback
//! - `event_loop`: in-process host with deterministic virtual time
//! - `scheduler`: the scheduler state machine and its variants
//! - `time`: `sleep` on a host timer
//! - `config`: TOML configuration
//! - `logging`: tracing subscriber setup
//! - `error`: error types
//!
//! The `promise` crate provides the `Deferred` future and the FIFO `Lock`;
//! both are re-exported here.
//!
//! # Safety
//!
//! This crate forbids unsafe code.

#![forbid(unsafe_code)]

pub mod config;
pub mod error;
pub mod event_loop;
pub mod host;
pub mod logging;
pub mod scheduler;
pub mod time;

pub use error::{Error, Result, SchedulerCallbackError};
pub use event_loop::EventLoop;
pub use host::{Host, HostHandle, HostTask, IdleCallbacks};
pub use promise::{BrokenPromise, Deferred, DeferredState, Lock, ResultTaken};
pub use scheduler::{
    AnimationFrameScheduler, ImmediateScheduler, MacrotaskScheduler, MicrotaskScheduler,
    OnIdleScheduler, RestartTimer, ScheduleStrategy, Scheduler, SchedulerHandle,
    TimeoutOptions, TimeoutScheduler, call_callback,
};
