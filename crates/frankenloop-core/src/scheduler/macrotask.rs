use std::rc::Rc;
use std::time::Duration;

use super::{Arming, Fire, ScheduleStrategy, Scheduler, TimeoutScheduler, TimeoutStrategy};
use super::timeout::TimeoutOptions;
use crate::error::SchedulerCallbackError;
use crate::host::Host;

/// A zero-delay timeout that never restarts.
pub struct MacrotaskStrategy(TimeoutStrategy);

impl MacrotaskStrategy {
    pub fn new(host: Rc<dyn Host>) -> Self {
        Self(TimeoutStrategy::new(host, TimeoutOptions::default()))
    }
}

impl ScheduleStrategy for MacrotaskStrategy {
    const KIND: &'static str = "macrotask";

    fn schedule_core(&mut self, fire: Fire) -> Arming {
        self.0.schedule_core(fire)
    }

    fn cancel_core(&mut self) {
        self.0.cancel_core();
    }

    fn mark_fired(&mut self) {
        self.0.mark_fired();
    }

    fn is_scheduled_core(&self) -> bool {
        self.0.is_scheduled_core()
    }

    fn allow_scheduling_when_scheduled(&self) -> bool {
        self.0.allow_scheduling_when_scheduled()
    }

    fn report_error(&self, err: SchedulerCallbackError) {
        self.0.report_error(err);
    }
}

pub type MacrotaskScheduler = Scheduler<MacrotaskStrategy>;

impl Scheduler<MacrotaskStrategy> {
    pub fn new<F>(host: Rc<dyn Host>, callback: F) -> Self
    where
        F: FnMut() -> anyhow::Result<()> + 'static,
    {
        Self::with_strategy(MacrotaskStrategy::new(host), callback)
    }

    pub fn single_shot<F>(host: &Rc<dyn Host>, callback: F)
    where
        F: FnOnce() -> anyhow::Result<()> + 'static,
    {
        TimeoutScheduler::single_shot(host, Duration::ZERO, callback);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_loop::EventLoop;
    use std::cell::{Cell, RefCell};

    #[test]
    fn runs_after_microtasks_without_advancing_time() {
        let lp = Rc::new(EventLoop::default());
        let log = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&log);
        let scheduler = MacrotaskScheduler::new(lp.clone(), move || {
            sink.borrow_mut().push("macrotask");
            Ok(())
        });
        scheduler.schedule().unwrap();
        let sink = Rc::clone(&log);
        lp.queue_microtask(Box::new(move || sink.borrow_mut().push("microtask")));
        lp.run_until_stalled();
        assert_eq!(*log.borrow(), vec!["microtask", "macrotask"]);
        assert_eq!(lp.now(), Duration::ZERO);
    }

    #[test]
    fn repeated_schedule_fires_once() {
        let lp = Rc::new(EventLoop::default());
        let runs = Rc::new(Cell::new(0));
        let counter = Rc::clone(&runs);
        let scheduler = MacrotaskScheduler::new(lp.clone(), move || {
            counter.set(counter.get() + 1);
            Ok(())
        });
        for _ in 0..4 {
            scheduler.schedule().unwrap();
        }
        assert_eq!(lp.pending_count(), 1);
        lp.run_until_stalled();
        assert_eq!(runs.get(), 1);
    }

    #[test]
    fn single_shot_uses_zero_delay() {
        let lp = Rc::new(EventLoop::default());
        let host: Rc<dyn Host> = lp.clone();
        let runs = Rc::new(Cell::new(0));
        let counter = Rc::clone(&runs);
        MacrotaskScheduler::single_shot(&host, move || {
            counter.set(counter.get() + 1);
            Ok(())
        });
        lp.advance(Duration::ZERO);
        assert_eq!(runs.get(), 1);
    }
}
