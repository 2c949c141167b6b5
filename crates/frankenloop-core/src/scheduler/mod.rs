//! Schedulers: run a callback "soon", where each variant has its own idea
//! of soon.
//!
//! Every variant shares one state machine, [`Scheduler`], which tracks the
//! frozen flag and a pending re-arm. The variant-specific part (which host
//! primitive to arm, and how to disarm it) lives in a [`ScheduleStrategy`].
//!
//! | variant | primitive | repeated `schedule()` while armed |
//! |---|---|---|
//! | [`ImmediateScheduler`] | none, runs synchronously | n/a |
//! | [`MicrotaskScheduler`] | microtask queue | ignored |
//! | [`MacrotaskScheduler`] | zero-delay timeout | ignored |
//! | [`TimeoutScheduler`] | timeout | per [`RestartTimer`] |
//! | [`AnimationFrameScheduler`] | animation frame | ignored |
//! | [`OnIdleScheduler`] | idle callback, else animation frame | ignored |
//!
//! Dropping a scheduler cancels it.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use tracing::trace;

use crate::error::SchedulerCallbackError;
use crate::host::HostTask;

pub mod animation_frame;
pub mod immediate;
pub mod macrotask;
pub mod microtask;
pub mod on_idle;
pub mod timeout;

pub use animation_frame::{AnimationFrameScheduler, AnimationFrameStrategy};
pub use immediate::{ImmediateScheduler, ImmediateStrategy};
pub use macrotask::{MacrotaskScheduler, MacrotaskStrategy};
pub use microtask::{MicrotaskScheduler, MicrotaskStrategy};
pub use on_idle::{OnIdleScheduler, OnIdleStrategy};
pub use timeout::{RestartTimer, TimeoutOptions, TimeoutScheduler, TimeoutStrategy};

pub type SchedulerCallback = Box<dyn FnMut() -> anyhow::Result<()> + 'static>;

/// Run a callback, wrapping any error it returns in a
/// [`SchedulerCallbackError`].
pub fn call_callback<R>(
    callback: impl FnOnce() -> anyhow::Result<R>,
) -> Result<R, SchedulerCallbackError> {
    callback().map_err(SchedulerCallbackError::new)
}

/// What a strategy did with a schedule request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arming {
    /// A host primitive was armed (or already was); the callback runs when
    /// it fires.
    Armed,
    /// The callback must run right now, before `schedule()` returns.
    RunNow,
}

/// Entry point a strategy hands to its host primitive.
///
/// Holds the scheduler weakly; firing after the scheduler is gone does
/// nothing.
#[derive(Clone)]
pub struct Fire {
    inner: Rc<dyn Fn()>,
}

impl Fire {
    fn new(f: impl Fn() + 'static) -> Self {
        Self { inner: Rc::new(f) }
    }

    pub fn fire(&self) {
        (self.inner)();
    }

    pub fn into_task(self) -> HostTask {
        Box::new(move || self.fire())
    }
}

impl fmt::Debug for Fire {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Fire")
    }
}

/// The variant-specific half of a scheduler.
///
/// Strategies never see the frozen flag; [`Scheduler`] only calls
/// `schedule_core` when the callback should really be armed.
pub trait ScheduleStrategy: 'static {
    /// Name used in log events
    const KIND: &'static str;

    /// Arm the host primitive so that it calls `fire`.
    fn schedule_core(&mut self, fire: Fire) -> Arming;

    /// Disarm the host primitive. Only called while armed.
    fn cancel_core(&mut self);

    /// The primitive fired; forget its handle. Called before the callback
    /// runs, so the callback can schedule again.
    fn mark_fired(&mut self);

    fn is_scheduled_core(&self) -> bool;

    /// Whether `schedule()` reaches `schedule_core` while already armed.
    fn allow_scheduling_when_scheduled(&self) -> bool {
        false
    }

    /// Where errors from host-fired callbacks go.
    fn report_error(&self, err: SchedulerCallbackError) {
        tracing::error!(kind = Self::KIND, error = %err, stack = %err.stack(), "uncaught scheduler callback error");
    }
}

struct Shared<S> {
    strategy: RefCell<S>,
    callback: RefCell<SchedulerCallback>,
    frozen: Cell<bool>,
    should_be_scheduled_on_unfreeze: Cell<bool>,
}

impl<S: ScheduleStrategy> Shared<S> {
    fn schedule(self: &Rc<Self>) -> Result<(), SchedulerCallbackError> {
        if self.frozen.get() {
            self.should_be_scheduled_on_unfreeze.set(true);
            trace!(kind = S::KIND, "schedule while frozen, deferred to unfreeze");
            return Ok(());
        }
        {
            let strategy = self.strategy.borrow();
            if strategy.is_scheduled_core() && !strategy.allow_scheduling_when_scheduled() {
                return Ok(());
            }
        }
        self.schedule_core()
    }

    fn schedule_core(self: &Rc<Self>) -> Result<(), SchedulerCallbackError> {
        let fire = self.fire_handle();
        let arming = self.strategy.borrow_mut().schedule_core(fire);
        trace!(kind = S::KIND, ?arming, "scheduled");
        match arming {
            Arming::Armed => Ok(()),
            Arming::RunNow => self.execute(),
        }
    }

    fn cancel(&self) {
        self.should_be_scheduled_on_unfreeze.set(false);
        let mut strategy = self.strategy.borrow_mut();
        if strategy.is_scheduled_core() {
            strategy.cancel_core();
            trace!(kind = S::KIND, "cancelled");
        }
    }

    fn freeze(&self) {
        if self.frozen.replace(true) {
            return;
        }
        let mut strategy = self.strategy.borrow_mut();
        if strategy.is_scheduled_core() {
            self.should_be_scheduled_on_unfreeze.set(true);
            strategy.cancel_core();
        }
        trace!(
            kind = S::KIND,
            rearm = self.should_be_scheduled_on_unfreeze.get(),
            "frozen"
        );
    }

    fn unfreeze(self: &Rc<Self>) -> Result<(), SchedulerCallbackError> {
        if !self.frozen.replace(false) {
            return Ok(());
        }
        trace!(kind = S::KIND, "unfrozen");
        if self.should_be_scheduled_on_unfreeze.replace(false) {
            self.schedule_core()
        } else {
            Ok(())
        }
    }

    fn is_scheduled(&self) -> bool {
        self.should_be_scheduled_on_unfreeze.get() || self.strategy.borrow().is_scheduled_core()
    }

    fn fire_handle(self: &Rc<Self>) -> Fire {
        let weak = Rc::downgrade(self);
        Fire::new(move || {
            if let Some(shared) = weak.upgrade() {
                shared.on_fire();
            }
        })
    }

    fn on_fire(&self) {
        // A host that ran a primitive after it was disarmed.
        if self.frozen.get() || !self.strategy.borrow().is_scheduled_core() {
            trace!(kind = S::KIND, "stale fire ignored");
            return;
        }
        self.strategy.borrow_mut().mark_fired();
        trace!(kind = S::KIND, "fired");
        if let Err(err) = self.execute() {
            self.strategy.borrow().report_error(err);
        }
    }

    fn execute(&self) -> Result<(), SchedulerCallbackError> {
        let Ok(mut callback) = self.callback.try_borrow_mut() else {
            return Err(SchedulerCallbackError::new(anyhow::anyhow!(
                "{} scheduler callback re-entered while running",
                S::KIND
            )));
        };
        call_callback(&mut *callback)
    }
}

/// Runs its callback when scheduled, at a time determined by `S`.
///
/// At most one run is pending per scheduler no matter how often
/// [`schedule`](Self::schedule) is called. While frozen nothing fires; a
/// pending run is disarmed and re-armed on [`unfreeze`](Self::unfreeze).
pub struct Scheduler<S: ScheduleStrategy> {
    shared: Rc<Shared<S>>,
}

impl<S: ScheduleStrategy> Scheduler<S> {
    pub fn with_strategy<F>(strategy: S, callback: F) -> Self
    where
        F: FnMut() -> anyhow::Result<()> + 'static,
    {
        Self {
            shared: Rc::new(Shared {
                strategy: RefCell::new(strategy),
                callback: RefCell::new(Box::new(callback)),
                frozen: Cell::new(false),
                should_be_scheduled_on_unfreeze: Cell::new(false),
            }),
        }
    }

    /// Build a scheduler whose callback holds a handle to the scheduler
    /// itself, e.g. to reschedule from inside the callback.
    pub fn new_cyclic<M, F>(strategy: S, make_callback: M) -> Self
    where
        M: FnOnce(SchedulerHandle<S>) -> F,
        F: FnMut() -> anyhow::Result<()> + 'static,
    {
        Self {
            shared: Rc::new_cyclic(|weak: &Weak<Shared<S>>| {
                let handle = SchedulerHandle {
                    shared: weak.clone(),
                };
                Shared {
                    strategy: RefCell::new(strategy),
                    callback: RefCell::new(Box::new(make_callback(handle))),
                    frozen: Cell::new(false),
                    should_be_scheduled_on_unfreeze: Cell::new(false),
                }
            }),
        }
    }

    /// Request a run of the callback.
    ///
    /// Only a synchronous run (an immediate scheduler, or an unfreeze
    /// re-arm of one) can produce an error here; errors from host-fired
    /// runs go to the host's error sink.
    pub fn schedule(&self) -> Result<(), SchedulerCallbackError> {
        self.shared.schedule()
    }

    /// Drop any pending run, including one deferred by `freeze`.
    pub fn cancel(&self) {
        self.shared.cancel();
    }

    pub fn freeze(&self) {
        self.shared.freeze();
    }

    pub fn unfreeze(&self) -> Result<(), SchedulerCallbackError> {
        self.shared.unfreeze()
    }

    pub fn is_frozen(&self) -> bool {
        self.shared.frozen.get()
    }

    /// True when a run is pending: armed now, or due to be armed on
    /// unfreeze.
    pub fn is_scheduled(&self) -> bool {
        self.shared.is_scheduled()
    }

    /// True when a host primitive is currently armed.
    pub fn is_armed(&self) -> bool {
        self.shared.strategy.borrow().is_scheduled_core()
    }

    pub fn handle(&self) -> SchedulerHandle<S> {
        SchedulerHandle {
            shared: Rc::downgrade(&self.shared),
        }
    }
}

impl<S: ScheduleStrategy> Drop for Scheduler<S> {
    fn drop(&mut self) {
        self.shared.cancel();
    }
}

impl<S: ScheduleStrategy> fmt::Debug for Scheduler<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("kind", &S::KIND)
            .field("frozen", &self.is_frozen())
            .field("scheduled", &self.is_scheduled())
            .finish()
    }
}

/// Weak reference to a [`Scheduler`]. Every operation is a no-op once the
/// scheduler has been dropped.
pub struct SchedulerHandle<S: ScheduleStrategy> {
    shared: Weak<Shared<S>>,
}

impl<S: ScheduleStrategy> Clone for SchedulerHandle<S> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<S: ScheduleStrategy> fmt::Debug for SchedulerHandle<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchedulerHandle")
            .field("kind", &S::KIND)
            .field("alive", &self.is_alive())
            .finish()
    }
}

impl<S: ScheduleStrategy> SchedulerHandle<S> {
    pub fn is_alive(&self) -> bool {
        self.shared.strong_count() > 0
    }

    pub fn schedule(&self) -> Result<(), SchedulerCallbackError> {
        match self.shared.upgrade() {
            Some(shared) => shared.schedule(),
            None => Ok(()),
        }
    }

    pub fn cancel(&self) {
        if let Some(shared) = self.shared.upgrade() {
            shared.cancel();
        }
    }

    pub fn freeze(&self) {
        if let Some(shared) = self.shared.upgrade() {
            shared.freeze();
        }
    }

    pub fn unfreeze(&self) -> Result<(), SchedulerCallbackError> {
        match self.shared.upgrade() {
            Some(shared) => shared.unfreeze(),
            None => Ok(()),
        }
    }

    pub fn is_scheduled(&self) -> bool {
        self.shared.upgrade().is_some_and(|shared| shared.is_scheduled())
    }
}
