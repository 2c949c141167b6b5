use std::rc::Rc;

use super::{Arming, Fire, ScheduleStrategy, Scheduler, call_callback};
use crate::error::SchedulerCallbackError;
use crate::host::{Host, IdleRequest};

/// Runs the callback when the host is idle. Hosts without idle-callback
/// support at the time of scheduling get an animation frame instead.
pub struct OnIdleStrategy {
    host: Rc<dyn Host>,
    request: Option<IdleRequest>,
}

impl OnIdleStrategy {
    pub fn new(host: Rc<dyn Host>) -> Self {
        Self {
            host,
            request: None,
        }
    }

    /// The primitive backing the pending request, if any.
    pub fn pending_request(&self) -> Option<IdleRequest> {
        self.request
    }
}

impl ScheduleStrategy for OnIdleStrategy {
    const KIND: &'static str = "on_idle";

    fn schedule_core(&mut self, fire: Fire) -> Arming {
        if self.request.is_none() {
            self.request = Some(IdleRequest::request(&*self.host, fire.into_task()));
        }
        Arming::Armed
    }

    fn cancel_core(&mut self) {
        if let Some(request) = self.request.take() {
            request.cancel(&*self.host);
        }
    }

    fn mark_fired(&mut self) {
        self.request = None;
    }

    fn is_scheduled_core(&self) -> bool {
        self.request.is_some()
    }

    fn report_error(&self, err: SchedulerCallbackError) {
        self.host.report_error(err);
    }
}

pub type OnIdleScheduler = Scheduler<OnIdleStrategy>;

impl Scheduler<OnIdleStrategy> {
    pub fn new<F>(host: Rc<dyn Host>, callback: F) -> Self
    where
        F: FnMut() -> anyhow::Result<()> + 'static,
    {
        Self::with_strategy(OnIdleStrategy::new(host), callback)
    }

    pub fn single_shot<F>(host: &Rc<dyn Host>, callback: F)
    where
        F: FnOnce() -> anyhow::Result<()> + 'static,
    {
        let reporter = Rc::clone(host);
        IdleRequest::request(
            &**host,
            Box::new(move || {
                if let Err(err) = call_callback(callback) {
                    reporter.report_error(err);
                }
            }),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_loop::EventLoop;
    use std::cell::RefCell;
    use std::time::Duration;

    fn logging_scheduler(lp: &Rc<EventLoop>, log: &Rc<RefCell<Vec<&'static str>>>) -> OnIdleScheduler {
        let sink = Rc::clone(log);
        OnIdleScheduler::new(lp.clone(), move || {
            sink.borrow_mut().push("idle");
            Ok(())
        })
    }

    #[test]
    fn runs_after_ready_timers() {
        let lp = Rc::new(EventLoop::default());
        let log = Rc::new(RefCell::new(Vec::new()));
        let scheduler = logging_scheduler(&lp, &log);
        scheduler.schedule().unwrap();
        let sink = Rc::clone(&log);
        lp.set_timeout(Duration::ZERO, Box::new(move || sink.borrow_mut().push("timeout")));
        lp.run_until_stalled();
        assert_eq!(*log.borrow(), vec!["timeout", "idle"]);
    }

    #[test]
    fn falls_back_to_animation_frame() {
        let lp = Rc::new(EventLoop::default());
        lp.set_idle_callbacks_supported(false);
        let log = Rc::new(RefCell::new(Vec::new()));
        let scheduler = logging_scheduler(&lp, &log);
        scheduler.schedule().unwrap();
        assert!(matches!(
            scheduler.shared.strategy.borrow().pending_request(),
            Some(IdleRequest::AnimationFrame(_))
        ));
        lp.run_until_stalled();
        assert_eq!(*log.borrow(), vec!["idle"]);
        assert_eq!(lp.now(), Duration::from_millis(16));
    }

    #[test]
    fn cancel_uses_the_primitive_that_was_armed() {
        let lp = Rc::new(EventLoop::default());
        let log = Rc::new(RefCell::new(Vec::new()));
        let scheduler = logging_scheduler(&lp, &log);

        lp.set_idle_callbacks_supported(false);
        scheduler.schedule().unwrap();
        // Support returning later must not redirect the cancel.
        lp.set_idle_callbacks_supported(true);
        scheduler.cancel();
        assert_eq!(lp.pending_count(), 0);

        scheduler.schedule().unwrap();
        assert!(matches!(
            scheduler.shared.strategy.borrow().pending_request(),
            Some(IdleRequest::IdleCallback(_))
        ));
        scheduler.cancel();
        assert_eq!(lp.pending_count(), 0);
        lp.run_until_stalled();
        assert!(log.borrow().is_empty());
    }

    #[test]
    fn freeze_disarms_an_idle_request_after_support_is_gone() {
        let lp = Rc::new(EventLoop::default());
        let log = Rc::new(RefCell::new(Vec::new()));
        let scheduler = logging_scheduler(&lp, &log);
        scheduler.schedule().unwrap();
        lp.set_idle_callbacks_supported(false);
        scheduler.freeze();
        assert_eq!(lp.pending_count(), 0);
        lp.run_until_stalled();
        assert!(log.borrow().is_empty());

        // Re-armed through the fallback now that support is off.
        scheduler.unfreeze().unwrap();
        assert!(matches!(
            scheduler.shared.strategy.borrow().pending_request(),
            Some(IdleRequest::AnimationFrame(_))
        ));
        lp.run_until_stalled();
        assert_eq!(*log.borrow(), vec!["idle"]);
    }

    #[test]
    fn waits_for_a_pending_frame() {
        let lp = Rc::new(EventLoop::default());
        let log = Rc::new(RefCell::new(Vec::new()));
        let scheduler = logging_scheduler(&lp, &log);
        scheduler.schedule().unwrap();
        let sink = Rc::clone(&log);
        lp.request_animation_frame(Box::new(move || sink.borrow_mut().push("frame")));
        lp.run_until_stalled();
        assert_eq!(*log.borrow(), vec!["frame", "idle"]);
    }

    #[test]
    fn single_shot_falls_back_too() {
        let lp = Rc::new(EventLoop::default());
        lp.set_idle_callbacks_supported(false);
        let host: Rc<dyn Host> = lp.clone();
        let log = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&log);
        OnIdleScheduler::single_shot(&host, move || {
            sink.borrow_mut().push("once");
            Ok(())
        });
        lp.run_until_stalled();
        assert_eq!(*log.borrow(), vec!["once"]);
    }
}
