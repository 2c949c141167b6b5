use super::{Arming, Fire, ScheduleStrategy, Scheduler, call_callback};
use crate::error::SchedulerCallbackError;

/// Runs the callback synchronously inside `schedule()`. Never armed, so
/// there is nothing for `freeze` or `cancel` to stop once it has run.
#[derive(Debug, Default, Clone, Copy)]
pub struct ImmediateStrategy;

impl ScheduleStrategy for ImmediateStrategy {
    const KIND: &'static str = "immediate";

    fn schedule_core(&mut self, _fire: Fire) -> Arming {
        Arming::RunNow
    }

    fn cancel_core(&mut self) {}

    fn mark_fired(&mut self) {}

    fn is_scheduled_core(&self) -> bool {
        false
    }
}

pub type ImmediateScheduler = Scheduler<ImmediateStrategy>;

impl Scheduler<ImmediateStrategy> {
    pub fn new<F>(callback: F) -> Self
    where
        F: FnMut() -> anyhow::Result<()> + 'static,
    {
        Self::with_strategy(ImmediateStrategy, callback)
    }

    pub fn single_shot<F>(callback: F) -> Result<(), SchedulerCallbackError>
    where
        F: FnOnce() -> anyhow::Result<()>,
    {
        call_callback(callback)
    }
}
