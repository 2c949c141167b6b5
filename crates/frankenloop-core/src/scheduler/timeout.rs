use std::rc::Rc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::{Arming, Fire, ScheduleStrategy, Scheduler, call_callback};
use crate::error::SchedulerCallbackError;
use crate::host::{Host, HostHandle};

/// What a `schedule()` call does to a timer that is already running.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RestartTimer {
    /// Keep the running timer; only arm when idle
    #[default]
    OnScheduleCallWhenNotScheduled,
    /// Restart the full delay on every call
    OnEveryScheduleCall,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TimeoutOptions {
    pub delay_msec: u64,
    pub restart_timer: RestartTimer,
}

impl TimeoutOptions {
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay_msec: u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            restart_timer: RestartTimer::default(),
        }
    }

    #[must_use]
    pub fn restart_timer(mut self, restart_timer: RestartTimer) -> Self {
        self.restart_timer = restart_timer;
        self
    }

    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_msec)
    }
}

pub struct TimeoutStrategy {
    host: Rc<dyn Host>,
    options: TimeoutOptions,
    timer: Option<HostHandle>,
}

impl TimeoutStrategy {
    pub fn new(host: Rc<dyn Host>, options: TimeoutOptions) -> Self {
        Self {
            host,
            options,
            timer: None,
        }
    }

    pub fn options(&self) -> &TimeoutOptions {
        &self.options
    }
}

impl ScheduleStrategy for TimeoutStrategy {
    const KIND: &'static str = "timeout";

    fn schedule_core(&mut self, fire: Fire) -> Arming {
        if self.options.restart_timer == RestartTimer::OnEveryScheduleCall {
            self.cancel_core();
        }
        if self.timer.is_none() {
            self.timer = Some(self.host.set_timeout(self.options.delay(), fire.into_task()));
        }
        Arming::Armed
    }

    fn cancel_core(&mut self) {
        if let Some(timer) = self.timer.take() {
            self.host.clear_timeout(timer);
        }
    }

    fn mark_fired(&mut self) {
        self.timer = None;
    }

    fn is_scheduled_core(&self) -> bool {
        self.timer.is_some()
    }

    fn allow_scheduling_when_scheduled(&self) -> bool {
        true
    }

    fn report_error(&self, err: SchedulerCallbackError) {
        self.host.report_error(err);
    }
}

pub type TimeoutScheduler = Scheduler<TimeoutStrategy>;

impl Scheduler<TimeoutStrategy> {
    pub fn new<F>(host: Rc<dyn Host>, options: TimeoutOptions, callback: F) -> Self
    where
        F: FnMut() -> anyhow::Result<()> + 'static,
    {
        Self::with_strategy(TimeoutStrategy::new(host, options), callback)
    }

    pub fn single_shot<F>(host: &Rc<dyn Host>, delay: Duration, callback: F)
    where
        F: FnOnce() -> anyhow::Result<()> + 'static,
    {
        let reporter = Rc::clone(host);
        host.set_timeout(
            delay,
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

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    fn setup(options: TimeoutOptions) -> (Rc<EventLoop>, Rc<RefCell<Vec<Duration>>>, TimeoutScheduler) {
        let lp = Rc::new(EventLoop::default());
        let fired = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&fired);
        let clock = Rc::clone(&lp);
        let scheduler = TimeoutScheduler::new(lp.clone(), options, move || {
            sink.borrow_mut().push(clock.now());
            Ok(())
        });
        (lp, fired, scheduler)
    }

    #[test]
    fn options_parse_from_camel_case() {
        let options: TimeoutOptions =
            serde_json::from_str(r#"{"delayMsec":50,"restartTimer":"onEveryScheduleCall"}"#).unwrap();
        assert_eq!(options.delay(), ms(50));
        assert_eq!(options.restart_timer, RestartTimer::OnEveryScheduleCall);

        let defaults: TimeoutOptions = serde_json::from_str("{}").unwrap();
        assert_eq!(defaults, TimeoutOptions::default());
        assert_eq!(defaults.restart_timer, RestartTimer::OnScheduleCallWhenNotScheduled);
    }

    #[test]
    fn builder_sets_fields() {
        let options = TimeoutOptions::with_delay(ms(40)).restart_timer(RestartTimer::OnEveryScheduleCall);
        assert_eq!(options.delay_msec, 40);
        assert_eq!(options.restart_timer, RestartTimer::OnEveryScheduleCall);
    }

    #[test]
    fn default_policy_keeps_the_first_deadline() {
        let (lp, fired, scheduler) = setup(TimeoutOptions::with_delay(ms(40)));
        scheduler.schedule().unwrap();
        lp.advance(ms(20));
        scheduler.schedule().unwrap();
        lp.run_until_stalled();
        assert_eq!(*fired.borrow(), vec![ms(40)]);
    }

    #[test]
    fn restart_policy_pushes_the_deadline_back() {
        let (lp, fired, scheduler) = setup(
            TimeoutOptions::with_delay(ms(40)).restart_timer(RestartTimer::OnEveryScheduleCall),
        );
        scheduler.schedule().unwrap();
        lp.advance(ms(20));
        scheduler.schedule().unwrap();
        lp.run_until_stalled();
        assert_eq!(*fired.borrow(), vec![ms(60)]);
    }

    #[test]
    fn freeze_clears_the_host_timer() {
        let (lp, fired, scheduler) = setup(TimeoutOptions::with_delay(ms(10)));
        scheduler.schedule().unwrap();
        scheduler.freeze();
        assert_eq!(lp.pending_count(), 0);
        lp.advance(ms(30));
        assert!(fired.borrow().is_empty());
        scheduler.unfreeze().unwrap();
        lp.run_until_stalled();
        assert_eq!(*fired.borrow(), vec![ms(40)]);
    }

    #[test]
    fn drop_clears_the_host_timer() {
        let (lp, fired, scheduler) = setup(TimeoutOptions::with_delay(ms(10)));
        scheduler.schedule().unwrap();
        drop(scheduler);
        assert_eq!(lp.pending_count(), 0);
        lp.run_until_stalled();
        assert!(fired.borrow().is_empty());
    }

    #[test]
    fn single_shot_fires_after_delay() {
        let lp = Rc::new(EventLoop::default());
        let host: Rc<dyn Host> = lp.clone();
        let at = Rc::new(RefCell::new(None));
        let slot = Rc::clone(&at);
        let clock = Rc::clone(&lp);
        TimeoutScheduler::single_shot(&host, ms(25), move || {
            *slot.borrow_mut() = Some(clock.now());
            Ok(())
        });
        TimeoutScheduler::single_shot(&host, ms(5), || anyhow::bail!("late failure"));
        lp.run_until_stalled();
        assert_eq!(*at.borrow(), Some(ms(25)));
        assert_eq!(lp.take_uncaught_errors()[0].message(), "late failure");
    }
}
