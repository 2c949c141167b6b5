//! In-process [`Host`] implementation.
//!
//! A single-threaded loop with four queues, drained in priority order:
//!
//! 1. microtasks: FIFO, drained completely after every other task
//! 2. timers: by due time, ties in registration order
//! 3. animation frames: every callback requested before a frame boundary
//!    runs at that boundary; boundaries are `frame_interval_ms` apart
//! 4. idle callbacks: run when nothing above is ready, at most one idle
//!    period per frame interval. A pending animation frame holds the idle
//!    period back until that frame has run.
//!
//! With [`ClockMode::Virtual`] time only moves when the loop has nothing
//! ready and jumps straight to the next due event, which makes timing
//! fully deterministic. With [`ClockMode::Realtime`] the loop sleeps.
//!
//! Futures can be spawned onto the loop; their polls are queued as
//! microtasks, like promise continuations.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::future::Future;
use std::pin::pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::{Context, Poll, Wake, Waker};
use std::time::{Duration, Instant};

use async_task::{Runnable, Task};
use flume::{Receiver, Sender, unbounded};
use tracing::{debug, error, trace};

use crate::config::{ClockMode, LoopConfig};
use crate::error::{Error, Result, SchedulerCallbackError};
use crate::host::{Host, HostHandle, HostTask, IdleCallbacks};

enum Clock {
    Virtual(Cell<Duration>),
    Realtime(Instant),
}

impl Clock {
    fn now(&self) -> Duration {
        match self {
            Self::Virtual(now) => now.get(),
            Self::Realtime(origin) => origin.elapsed(),
        }
    }

    fn advance_to(&self, target: Duration) {
        match self {
            Self::Virtual(now) => {
                if target > now.get() {
                    now.set(target);
                }
            }
            Self::Realtime(origin) => {
                let now = origin.elapsed();
                if target > now {
                    std::thread::sleep(target - now);
                }
            }
        }
    }
}

enum Microtask {
    Task(HostTask),
    Poll(Runnable),
}

#[derive(Default)]
struct LoopState {
    next_id: u64,
    microtasks: VecDeque<Microtask>,
    timers: BTreeMap<(Duration, u64), HostTask>,
    timer_due: HashMap<u64, Duration>,
    frames: BTreeMap<u64, HostTask>,
    frame_due: Option<Duration>,
    idle: BTreeMap<u64, HostTask>,
    idle_due: Option<Duration>,
    next_idle_period: Duration,
    frame_ran_since_idle: bool,
}

impl LoopState {
    fn allocate_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    /// Idle work waits for a pending frame, unless a frame already ran
    /// since the last idle period.
    fn idle_held_by_frame(&self) -> bool {
        self.frame_due.is_some() && !self.frame_ran_since_idle
    }

    fn idle_ready(&self, now: Duration) -> bool {
        !self.idle_held_by_frame() && self.idle_due.is_some_and(|due| due <= now)
    }

    fn next_wake(&self) -> Option<Duration> {
        let timer = self.timers.keys().next().map(|(due, _)| *due);
        let idle = self.idle_due.filter(|_| !self.idle_held_by_frame());
        [timer, self.frame_due, idle]
            .into_iter()
            .flatten()
            .min()
    }
}

/// Outcome of a single loop turn
enum Turn {
    /// Ran at least one task
    Ran(usize),
    /// Nothing was ready; time moved to the next due event
    Waited(usize),
    /// Nothing left to do before the deadline (or at all)
    Exhausted(usize),
}

pub struct EventLoop {
    config: LoopConfig,
    clock: Clock,
    state: RefCell<LoopState>,
    idle_supported: Cell<bool>,
    uncaught: RefCell<Vec<SchedulerCallbackError>>,
    runnable_tx: Sender<Runnable>,
    runnable_rx: Receiver<Runnable>,
}

impl Default for EventLoop {
    fn default() -> Self {
        Self::new(LoopConfig::default())
    }
}

impl std::fmt::Debug for EventLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventLoop")
            .field("clock", &self.config.clock)
            .field("now", &self.now())
            .field("pending", &self.pending_count())
            .finish()
    }
}

fn next_boundary(after: Duration, interval: Duration) -> Duration {
    let interval = interval.as_nanos().max(1) as u64;
    let after = after.as_nanos() as u64;
    Duration::from_nanos((after / interval + 1) * interval)
}

struct WakeFlag(AtomicBool);

impl Wake for WakeFlag {
    fn wake(self: Arc<Self>) {
        self.0.store(true, Ordering::SeqCst);
    }

    fn wake_by_ref(self: &Arc<Self>) {
        self.0.store(true, Ordering::SeqCst);
    }
}

impl EventLoop {
    pub fn new(config: LoopConfig) -> Self {
        let clock = match config.clock {
            ClockMode::Virtual => Clock::Virtual(Cell::new(Duration::ZERO)),
            ClockMode::Realtime => Clock::Realtime(Instant::now()),
        };
        let (runnable_tx, runnable_rx) = unbounded();
        debug!(clock = ?config.clock, frame_interval_ms = config.frame_interval_ms, "event loop created");
        Self {
            idle_supported: Cell::new(config.idle_callbacks),
            config,
            clock,
            state: RefCell::new(LoopState::default()),
            uncaught: RefCell::new(Vec::new()),
            runnable_tx,
            runnable_rx,
        }
    }

    pub fn config(&self) -> &LoopConfig {
        &self.config
    }

    /// Time elapsed on this loop's clock since it was created.
    pub fn now(&self) -> Duration {
        self.clock.now()
    }

    /// Switch idle-callback support on or off. Already queued idle
    /// callbacks still run unless cancelled.
    pub fn set_idle_callbacks_supported(&self, supported: bool) {
        self.idle_supported.set(supported);
    }

    /// Number of queued tasks of any kind.
    pub fn pending_count(&self) -> usize {
        let state = self.state.borrow();
        state.microtasks.len()
            + self.runnable_rx.len()
            + state.timers.len()
            + state.frames.len()
            + state.idle.len()
    }

    /// Callback errors reported since the last call.
    pub fn take_uncaught_errors(&self) -> Vec<SchedulerCallbackError> {
        std::mem::take(&mut *self.uncaught.borrow_mut())
    }

    /// Spawn a future onto the loop; each poll runs as a microtask.
    pub fn spawn<F>(&self, future: F) -> Task<F::Output>
    where
        F: Future + 'static,
        F::Output: 'static,
    {
        let tx = self.runnable_tx.clone();
        let (runnable, task) = async_task::spawn_local(future, move |runnable| {
            tx.send(runnable).ok();
        });
        runnable.schedule();
        task
    }

    /// Drive the loop until `future` completes.
    ///
    /// Returns [`Error::Stalled`] when the loop runs out of work while the
    /// future is still waiting.
    pub fn block_on<F: Future>(&self, future: F) -> Result<F::Output> {
        let mut future = pin!(future);
        let flag = Arc::new(WakeFlag(AtomicBool::new(true)));
        let waker = Waker::from(Arc::clone(&flag));
        let mut cx = Context::from_waker(&waker);
        loop {
            if flag.0.swap(false, Ordering::SeqCst) {
                if let Poll::Ready(output) = future.as_mut().poll(&mut cx) {
                    return Ok(output);
                }
            }
            if let Turn::Exhausted(_) = self.turn(None) {
                if !flag.0.load(Ordering::SeqCst) {
                    debug!(now = ?self.now(), "block_on stalled");
                    return Err(Error::Stalled);
                }
            }
        }
    }

    /// Run queued microtasks (and spawned future polls) until none remain.
    pub fn run_microtasks(&self) -> usize {
        let mut ran = 0;
        loop {
            while let Ok(runnable) = self.runnable_rx.try_recv() {
                self.state
                    .borrow_mut()
                    .microtasks
                    .push_back(Microtask::Poll(runnable));
            }
            let next = self.state.borrow_mut().microtasks.pop_front();
            match next {
                Some(Microtask::Task(task)) => task(),
                Some(Microtask::Poll(runnable)) => {
                    runnable.run();
                }
                None => break,
            }
            ran += 1;
        }
        ran
    }

    /// Run until nothing is queued. With a virtual clock, time jumps ahead
    /// as needed; a self-rearming scheduler keeps this from returning.
    pub fn run_until_stalled(&self) -> usize {
        let mut total = 0;
        loop {
            match self.turn(None) {
                Turn::Ran(n) | Turn::Waited(n) => total += n,
                Turn::Exhausted(n) => return total + n,
            }
        }
    }

    /// Run everything that becomes due within `by`, leaving the clock
    /// `by` later than it was.
    pub fn advance(&self, by: Duration) -> usize {
        let deadline = self.now() + by;
        let mut total = 0;
        loop {
            match self.turn(Some(deadline)) {
                Turn::Ran(n) | Turn::Waited(n) => total += n,
                Turn::Exhausted(n) => {
                    total += n;
                    break;
                }
            }
        }
        self.clock.advance_to(deadline);
        total + self.run_microtasks()
    }

    fn turn(&self, deadline: Option<Duration>) -> Turn {
        let mut ran = self.run_microtasks();
        let now = self.now();

        if let Some(task) = self.pop_due_timer(now) {
            task();
            ran += 1 + self.run_microtasks();
            return Turn::Ran(ran);
        }

        let frame_ready = self.state.borrow().frame_due.is_some_and(|due| due <= now);
        if frame_ready {
            ran += self.run_frame(now);
            return Turn::Ran(ran);
        }

        let idle_ready = self.state.borrow().idle_ready(now);
        if idle_ready {
            ran += self.run_idle_period(now);
            return Turn::Ran(ran);
        }

        let next = self.state.borrow().next_wake();
        match (next, deadline) {
            (Some(at), Some(limit)) if at > limit => Turn::Exhausted(ran),
            (Some(at), _) => {
                trace!(from = ?now, to = ?at, "advancing clock");
                self.clock.advance_to(at);
                Turn::Waited(ran)
            }
            (None, _) if ran > 0 => Turn::Ran(ran),
            (None, _) => Turn::Exhausted(ran),
        }
    }

    fn pop_due_timer(&self, now: Duration) -> Option<HostTask> {
        let mut state = self.state.borrow_mut();
        let (&(due, id), _) = state.timers.first_key_value()?;
        if due > now {
            return None;
        }
        state.timer_due.remove(&id);
        trace!(handle = id, ?due, "timer fired");
        state.timers.remove(&(due, id))
    }

    fn run_frame(&self, now: Duration) -> usize {
        let batch: Vec<u64> = {
            let mut state = self.state.borrow_mut();
            state.frame_due = None;
            state.frame_ran_since_idle = true;
            state.frames.keys().copied().collect()
        };
        trace!(callbacks = batch.len(), ?now, "animation frame");
        let mut ran = 0;
        for id in batch {
            // An earlier callback in this frame may have cancelled it.
            let task = self.state.borrow_mut().frames.remove(&id);
            if let Some(task) = task {
                task();
                ran += 1 + self.run_microtasks();
            }
        }
        let mut state = self.state.borrow_mut();
        if !state.frames.is_empty() && state.frame_due.is_none() {
            state.frame_due = Some(next_boundary(now, self.config.frame_interval()));
        }
        ran
    }

    fn run_idle_period(&self, now: Duration) -> usize {
        let batch: Vec<u64> = {
            let mut state = self.state.borrow_mut();
            state.idle_due = None;
            state.frame_ran_since_idle = false;
            state.next_idle_period = now + self.config.frame_interval();
            state.idle.keys().copied().collect()
        };
        trace!(callbacks = batch.len(), ?now, "idle period");
        let mut ran = 0;
        for id in batch {
            let task = self.state.borrow_mut().idle.remove(&id);
            if let Some(task) = task {
                task();
                ran += 1 + self.run_microtasks();
            }
        }
        let mut state = self.state.borrow_mut();
        if !state.idle.is_empty() && state.idle_due.is_none() {
            state.idle_due = Some(state.next_idle_period);
        }
        ran
    }
}

impl Host for EventLoop {
    fn queue_microtask(&self, task: HostTask) {
        self.state
            .borrow_mut()
            .microtasks
            .push_back(Microtask::Task(task));
    }

    fn set_timeout(&self, delay: Duration, task: HostTask) -> HostHandle {
        let due = self.now() + delay;
        let mut state = self.state.borrow_mut();
        let id = state.allocate_id();
        state.timers.insert((due, id), task);
        state.timer_due.insert(id, due);
        trace!(handle = id, ?delay, "timer armed");
        HostHandle::from_raw(id)
    }

    fn clear_timeout(&self, handle: HostHandle) {
        let id = handle.into_raw();
        let mut state = self.state.borrow_mut();
        if let Some(due) = state.timer_due.remove(&id) {
            state.timers.remove(&(due, id));
            trace!(handle = id, "timer cleared");
        }
    }

    fn request_animation_frame(&self, task: HostTask) -> HostHandle {
        let now = self.now();
        let mut state = self.state.borrow_mut();
        let id = state.allocate_id();
        state.frames.insert(id, task);
        if state.frame_due.is_none() {
            state.frame_due = Some(next_boundary(now, self.config.frame_interval()));
        }
        HostHandle::from_raw(id)
    }

    fn cancel_animation_frame(&self, handle: HostHandle) {
        let mut state = self.state.borrow_mut();
        state.frames.remove(&handle.into_raw());
        if state.frames.is_empty() {
            state.frame_due = None;
        }
    }

    fn idle_callbacks(&self) -> Option<&dyn IdleCallbacks> {
        if self.idle_supported.get() {
            Some(self)
        } else {
            None
        }
    }

    fn cancel_idle_request(&self, handle: HostHandle) {
        IdleCallbacks::cancel_idle_callback(self, handle);
    }

    fn report_error(&self, err: SchedulerCallbackError) {
        error!(error = %err, stack = %err.stack(), "uncaught scheduler callback error");
        self.uncaught.borrow_mut().push(err);
    }
}

impl IdleCallbacks for EventLoop {
    fn request_idle_callback(&self, task: HostTask) -> HostHandle {
        let now = self.now();
        let mut state = self.state.borrow_mut();
        let id = state.allocate_id();
        state.idle.insert(id, task);
        if state.idle_due.is_none() {
            state.idle_due = Some(now.max(state.next_idle_period));
        }
        HostHandle::from_raw(id)
    }

    fn cancel_idle_callback(&self, handle: HostHandle) {
        let mut state = self.state.borrow_mut();
        state.idle.remove(&handle.into_raw());
        if state.idle.is_empty() {
            state.idle_due = None;
        }
    }
}
