//! Cancelable one-shot and recurring tasks owned by a manager.

use std::time::Duration;

use tokio::{
    runtime::Handle,
    task::JoinHandle,
    time::{self, Instant, MissedTickBehavior},
};

/// Owns at most one spawned timer task.
///
/// Arming always aborts the previous task first. Each arm/cancel bumps an
/// epoch; a callback that already woke up before being aborted must check
/// [`TaskSlot::is_current`] under the owner's lock before acting.
#[derive(Debug, Default)]
pub(crate) struct TaskSlot {
    handle: Option<JoinHandle<()>>,
    epoch: u64,
}

impl TaskSlot {
    /// Replace the current task with the one produced by `spawn`, which is
    /// handed the epoch it must present to [`TaskSlot::is_current`].
    /// Returns `false` when nothing could be spawned; the slot is then empty.
    pub(crate) fn arm<F>(&mut self, spawn: F) -> bool
    where
        F: FnOnce(u64) -> Option<JoinHandle<()>>,
    {
        self.cancel();
        let epoch = self.epoch;
        self.handle = spawn(epoch);
        self.handle.is_some()
    }

    /// Abort the task, if any. Returns whether one was armed.
    pub(crate) fn cancel(&mut self) -> bool {
        self.epoch = self.epoch.wrapping_add(1);
        match self.handle.take() {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    pub(crate) fn is_armed(&self) -> bool {
        self.handle.is_some()
    }

    pub(crate) fn is_current(&self, epoch: u64) -> bool {
        self.handle.is_some() && self.epoch == epoch
    }
}

impl Drop for TaskSlot {
    fn drop(&mut self) {
        self.cancel();
    }
}

fn current_runtime() -> Option<Handle> {
    match Handle::try_current() {
        Ok(runtime) => Some(runtime),
        Err(_) => {
            tracing::warn!(target = "live_status::timer", "no tokio runtime, timer not started");
            None
        }
    }
}

/// Spawn a task calling `tick` every `period`, first after one full period.
/// Ticks that fall behind are skipped, never replayed. The task ends when
/// `tick` returns `false`. `None` outside a tokio runtime.
pub(crate) fn spawn_recurring<F>(period: Duration, mut tick: F) -> Option<JoinHandle<()>>
where
    F: FnMut() -> bool + Send + 'static,
{
    let runtime = current_runtime()?;
    Some(runtime.spawn(async move {
        let mut interval = time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            interval.tick().await;
            if !tick() {
                break;
            }
        }
    }))
}

/// Spawn a task calling `fire` once after `delay`. `None` outside a tokio
/// runtime.
pub(crate) fn spawn_once<F>(delay: Duration, fire: F) -> Option<JoinHandle<()>>
where
    F: FnOnce() + Send + 'static,
{
    let runtime = current_runtime()?;
    Some(runtime.spawn(async move {
        time::sleep(delay).await;
        fire();
    }))
}
