use std::rc::Rc;

use super::{Arming, Fire, ScheduleStrategy, Scheduler, call_callback};
use crate::error::SchedulerCallbackError;
use crate::host::{Host, HostHandle};

pub struct AnimationFrameStrategy {
    host: Rc<dyn Host>,
    frame: Option<HostHandle>,
}

impl AnimationFrameStrategy {
    pub fn new(host: Rc<dyn Host>) -> Self {
        Self { host, frame: None }
    }
}

impl ScheduleStrategy for AnimationFrameStrategy {
    const KIND: &'static str = "animation_frame";

    fn schedule_core(&mut self, fire: Fire) -> Arming {
        if self.frame.is_none() {
            self.frame = Some(self.host.request_animation_frame(fire.into_task()));
        }
        Arming::Armed
    }

    fn cancel_core(&mut self) {
        if let Some(frame) = self.frame.take() {
            self.host.cancel_animation_frame(frame);
        }
    }

    fn mark_fired(&mut self) {
        self.frame = None;
    }

    fn is_scheduled_core(&self) -> bool {
        self.frame.is_some()
    }

    fn report_error(&self, err: SchedulerCallbackError) {
        self.host.report_error(err);
    }
}

pub type AnimationFrameScheduler = Scheduler<AnimationFrameStrategy>;

impl Scheduler<AnimationFrameStrategy> {
    pub fn new<F>(host: Rc<dyn Host>, callback: F) -> Self
    where
        F: FnMut() -> anyhow::Result<()> + 'static,
    {
        Self::with_strategy(AnimationFrameStrategy::new(host), callback)
    }

    pub fn single_shot<F>(host: &Rc<dyn Host>, callback: F)
    where
        F: FnOnce() -> anyhow::Result<()> + 'static,
    {
        let reporter = Rc::clone(host);
        host.request_animation_frame(Box::new(move || {
            if let Err(err) = call_callback(callback) {
                reporter.report_error(err);
            }
        }));
    }
}
