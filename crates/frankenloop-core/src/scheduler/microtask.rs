use std::rc::Rc;

use super::{Arming, Fire, ScheduleStrategy, Scheduler, call_callback};
use crate::error::SchedulerCallbackError;
use crate::host::{Host, MicrotaskHandle};

/// Runs the callback from the host's microtask queue.
pub struct MicrotaskStrategy {
    host: Rc<dyn Host>,
    pending: Option<MicrotaskHandle>,
}

impl MicrotaskStrategy {
    pub fn new(host: Rc<dyn Host>) -> Self {
        Self {
            host,
            pending: None,
        }
    }
}

impl ScheduleStrategy for MicrotaskStrategy {
    const KIND: &'static str = "microtask";

    fn schedule_core(&mut self, fire: Fire) -> Arming {
        self.pending = Some(MicrotaskHandle::queue(&*self.host, fire.into_task()));
        Arming::Armed
    }

    fn cancel_core(&mut self) {
        if let Some(handle) = self.pending.take() {
            handle.cancel();
        }
    }

    fn mark_fired(&mut self) {
        self.pending = None;
    }

    fn is_scheduled_core(&self) -> bool {
        self.pending.is_some()
    }

    fn report_error(&self, err: SchedulerCallbackError) {
        self.host.report_error(err);
    }
}

pub type MicrotaskScheduler = Scheduler<MicrotaskStrategy>;

impl Scheduler<MicrotaskStrategy> {
    pub fn new<F>(host: Rc<dyn Host>, callback: F) -> Self
    where
        F: FnMut() -> anyhow::Result<()> + 'static,
    {
        Self::with_strategy(MicrotaskStrategy::new(host), callback)
    }

    pub fn single_shot<F>(host: &Rc<dyn Host>, callback: F)
    where
        F: FnOnce() -> anyhow::Result<()> + 'static,
    {
        let reporter = Rc::clone(host);
        host.queue_microtask(Box::new(move || {
            if let Err(err) = call_callback(callback) {
                reporter.report_error(err);
            }
        }));
    }
}
