//! Per-run thinking/typing indicator driven by a single trigger callback.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde::Serialize;

use crate::{
    config::TypingSettings,
    gate::PushGate,
    timer::{spawn_once, spawn_recurring, TaskSlot},
    types::{ErrorFn, PushFn},
};

/// Phase reported to the trigger on every call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TypingPhase {
    #[default]
    Idle,
    Thinking,
    Typing,
}

/// Injected trigger: called once per loop tick with the current phase.
pub type TriggerFn = PushFn<TypingPhase>;

#[derive(Debug, Default)]
struct TypingState {
    started: bool,
    active: bool,
    run_complete: bool,
    dispatch_idle: bool,
    transitioning: bool,
    sealed: bool,
    phase: TypingPhase,
    loop_task: TaskSlot,
    ttl_task: TaskSlot,
}

struct TypingInner {
    label: String,
    gate: PushGate<TypingPhase>,
    settings: TypingSettings,
    state: Mutex<TypingState>,
}

/// Drives the external typing indicator of one run.
///
/// Once sealed (TTL expiry, both done signals, or [`TypingController::cleanup`])
/// every call is a no-op until [`TypingController::reset_for_followup`].
#[derive(Clone)]
pub struct TypingController {
    inner: Arc<TypingInner>,
}

impl TypingController {
    pub fn new(
        label: impl Into<String>,
        trigger: TriggerFn,
        on_error: Option<ErrorFn>,
        settings: TypingSettings,
    ) -> Self {
        let label = label.into();
        Self {
            inner: Arc::new(TypingInner {
                gate: PushGate::new(label.clone(), trigger, on_error),
                label,
                settings,
                state: Mutex::new(TypingState::default()),
            }),
        }
    }

    pub fn start_thinking_loop(&self) {
        self.start_loop(TypingPhase::Thinking);
    }

    /// Start the typing loop, or upgrade a running thinking loop in place
    /// with one immediate extra trigger.
    pub fn start_typing_loop(&self) {
        self.start_loop(TypingPhase::Typing);
    }

    fn start_loop(&self, phase: TypingPhase) {
        let inner = &self.inner;
        let mut state = inner.state.lock();
        if state.sealed {
            return;
        }
        state.started = true;
        state.transitioning = false;
        inner.arm_ttl(&mut state);

        if state.loop_task.is_armed() {
            if state.phase == phase {
                return;
            }
            tracing::debug!(target = "live_status::typing", run = %inner.label, from = ?state.phase, to = ?phase, "typing phase changed in place");
            state.phase = phase;
            drop(state);
            inner.gate.fire(phase);
            return;
        }

        state.phase = phase;
        state.active = true;
        inner.arm_loop(&mut state, inner.settings.interval());
        drop(state);
        inner.gate.fire(phase);
    }

    /// Re-arm the TTL without changing phase.
    pub fn refresh_ttl(&self) {
        let mut state = self.inner.state.lock();
        if state.sealed || !state.started {
            return;
        }
        self.inner.arm_ttl(&mut state);
    }

    /// The model finished producing output.
    pub fn mark_run_complete(&self) {
        let mut state = self.inner.state.lock();
        if state.sealed {
            return;
        }
        state.run_complete = true;
        self.inner.maybe_cleanup(&mut state);
    }

    /// The outbound delivery queue drained.
    pub fn mark_dispatch_idle(&self) {
        let mut state = self.inner.state.lock();
        if state.sealed {
            return;
        }
        state.dispatch_idle = true;
        self.inner.maybe_cleanup(&mut state);
    }

    /// Keep the indicator alive across a reply that is immediately followed
    /// by another turn.
    pub fn transition_to_followup(&self) {
        let inner = &self.inner;
        let mut state = inner.state.lock();
        if state.sealed {
            return;
        }
        state.phase = TypingPhase::Thinking;
        state.run_complete = false;
        state.transitioning = true;
        state.started = true;
        state.active = true;
        inner.arm_loop(&mut state, inner.settings.followup_interval());
        inner.arm_ttl(&mut state);
        drop(state);

        tracing::debug!(target = "live_status::typing", run = %inner.label, "transitioning to follow-up");
        inner.gate.fire(TypingPhase::Thinking);
    }

    /// Un-seal for a follow-up run. Follow-up runs have no dispatcher of
    /// their own, so dispatch counts as idle.
    pub fn reset_for_followup(&self) {
        let mut state = self.inner.state.lock();
        state.loop_task.cancel();
        state.ttl_task.cancel();
        state.started = false;
        state.active = false;
        state.run_complete = false;
        state.dispatch_idle = true;
        state.transitioning = false;
        state.sealed = false;
        state.phase = TypingPhase::Idle;
    }

    /// Stop and seal immediately.
    pub fn cleanup(&self) {
        let mut state = self.inner.state.lock();
        if state.sealed {
            return;
        }
        self.inner.seal(&mut state, "cleanup");
    }

    pub fn is_active(&self) -> bool {
        self.inner.state.lock().active
    }

    pub fn is_started(&self) -> bool {
        self.inner.state.lock().started
    }

    pub fn is_sealed(&self) -> bool {
        self.inner.state.lock().sealed
    }

    pub fn is_transitioning(&self) -> bool {
        self.inner.state.lock().transitioning
    }

    pub fn phase(&self) -> TypingPhase {
        self.inner.state.lock().phase
    }
}

impl std::fmt::Debug for TypingController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("TypingController")
            .field("run", &self.inner.label)
            .field("phase", &state.phase)
            .field("sealed", &state.sealed)
            .finish()
    }
}

impl TypingInner {
    fn arm_loop(self: &Arc<Self>, state: &mut TypingState, period: std::time::Duration) {
        let weak = Arc::downgrade(self);
        state
            .loop_task
            .arm(|epoch| spawn_recurring(period, move || trigger_tick(&weak, epoch)));
    }

    fn arm_ttl(self: &Arc<Self>, state: &mut TypingState) {
        let weak = Arc::downgrade(self);
        let ttl = self.settings.ttl();
        state.ttl_task.arm(|epoch| {
            spawn_once(ttl, move || {
                if let Some(inner) = weak.upgrade() {
                    inner.on_ttl(epoch);
                }
            })
        });
    }

    fn on_ttl(&self, epoch: u64) {
        let mut state = self.state.lock();
        if state.sealed || !state.ttl_task.is_current(epoch) {
            return;
        }
        tracing::warn!(target = "live_status::typing", run = %self.label, ttl_ms = self.settings.ttl_ms, "typing indicator TTL reached, sealing");
        self.seal(&mut state, "ttl");
    }

    fn maybe_cleanup(&self, state: &mut TypingState) {
        if state.run_complete && state.dispatch_idle && !state.transitioning {
            self.seal(state, "done");
        }
    }

    fn seal(&self, state: &mut TypingState, reason: &'static str) {
        state.loop_task.cancel();
        state.ttl_task.cancel();
        state.sealed = true;
        state.active = false;
        state.phase = TypingPhase::Idle;
        tracing::debug!(target = "live_status::typing", run = %self.label, reason, "typing controller sealed");
    }
}

fn trigger_tick(weak: &Weak<TypingInner>, epoch: u64) -> bool {
    let Some(inner) = weak.upgrade() else {
        return false;
    };
    let phase = {
        let state = inner.state.lock();
        if state.sealed || !state.loop_task.is_current(epoch) {
            return false;
        }
        state.phase
    };
    inner.gate.fire(phase);
    true
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc,
        },
        time::Duration,
    };

    use futures::FutureExt;
    use parking_lot::Mutex;
    use tokio::time::{sleep, Instant};

    use super::{TriggerFn, TypingController, TypingPhase};
    use crate::{config::TypingSettings, error::PushError, types::ErrorFn};

    type Calls = Arc<Mutex<Vec<(u64, TypingPhase)>>>;

    fn recording_trigger() -> (TriggerFn, Calls) {
        let calls: Calls = Arc::new(Mutex::new(Vec::new()));
        let start = Instant::now();
        let c = calls.clone();
        let trigger: TriggerFn = Arc::new(move |phase: TypingPhase| {
            let c = c.clone();
            async move {
                c.lock().push((start.elapsed().as_millis() as u64, phase));
                Ok::<(), anyhow::Error>(())
            }
            .boxed()
        });
        (trigger, calls)
    }

    fn settings(interval_ms: u64, ttl_ms: u64) -> TypingSettings {
        TypingSettings { interval_ms, ttl_ms }
    }

    #[tokio::test(start_paused = true)]
    async fn thinking_loop_triggers_immediately_and_on_interval() {
        let (trigger, calls) = recording_trigger();
        let typing = TypingController::new("run-1", trigger, None, settings(1000, 60_000));

        typing.start_thinking_loop();
        assert!(typing.is_active());
        sleep(Duration::from_millis(2500)).await;

        let phases: Vec<_> = calls.lock().iter().map(|(_, p)| *p).collect();
        assert_eq!(phases, vec![TypingPhase::Thinking; 3]);
    }

    #[tokio::test(start_paused = true)]
    async fn typing_upgrades_without_restarting_timer() {
        let (trigger, calls) = recording_trigger();
        let typing = TypingController::new("run-2", trigger, None, settings(1000, 60_000));

        typing.start_thinking_loop();
        sleep(Duration::from_millis(1500)).await;
        typing.start_typing_loop();
        assert_eq!(typing.phase(), TypingPhase::Typing);
        sleep(Duration::from_millis(1600)).await;

        let calls = calls.lock().clone();
        assert_eq!(
            calls,
            vec![
                (0, TypingPhase::Thinking),
                (1000, TypingPhase::Thinking),
                (1500, TypingPhase::Typing),
                (2000, TypingPhase::Typing),
                (3000, TypingPhase::Typing),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn ttl_seals_a_hung_run() {
        let (trigger, calls) = recording_trigger();
        let typing = TypingController::new("run-3", trigger, None, settings(1000, 5000));

        typing.start_typing_loop();
        sleep(Duration::from_millis(5100)).await;
        assert!(typing.is_sealed());
        assert!(!typing.is_active());
        let seen = calls.lock().len();

        typing.start_typing_loop();
        typing.transition_to_followup();
        sleep(Duration::from_secs(10)).await;
        assert_eq!(calls.lock().len(), seen);
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_postpones_ttl() {
        let (trigger, _calls) = recording_trigger();
        let typing = TypingController::new("run-4", trigger, None, settings(1000, 5000));

        typing.start_thinking_loop();
        sleep(Duration::from_millis(4000)).await;
        typing.refresh_ttl();
        sleep(Duration::from_millis(4000)).await;
        assert!(!typing.is_sealed());
        sleep(Duration::from_millis(1100)).await;
        assert!(typing.is_sealed());
    }

    #[tokio::test(start_paused = true)]
    async fn cleanup_waits_for_both_done_signals() {
        let (trigger, _calls) = recording_trigger();
        let typing = TypingController::new("run-5", trigger, None, settings(1000, 60_000));

        typing.start_typing_loop();
        typing.mark_run_complete();
        assert!(!typing.is_sealed());
        assert!(typing.is_active());

        typing.mark_dispatch_idle();
        assert!(typing.is_sealed());
        assert_eq!(typing.phase(), TypingPhase::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn followup_transition_uses_capped_interval() {
        let (trigger, calls) = recording_trigger();
        let typing = TypingController::new("run-6", trigger, None, settings(6000, 60_000));

        typing.start_typing_loop();
        sleep(Duration::from_millis(100)).await;
        typing.transition_to_followup();
        assert!(typing.is_transitioning());
        assert_eq!(typing.phase(), TypingPhase::Thinking);

        typing.mark_dispatch_idle();
        assert!(!typing.is_sealed());
        sleep(Duration::from_millis(4500)).await;

        let times: Vec<u64> = calls.lock().iter().map(|(t, _)| *t).collect();
        assert_eq!(times, vec![0, 100, 2100, 4100]);
    }

    #[tokio::test(start_paused = true)]
    async fn reset_for_followup_unseals_with_idle_dispatch() {
        let (trigger, calls) = recording_trigger();
        let typing = TypingController::new("run-7", trigger, None, settings(1000, 60_000));

        typing.start_thinking_loop();
        sleep(Duration::from_millis(10)).await;
        typing.cleanup();
        assert!(typing.is_sealed());

        typing.reset_for_followup();
        assert!(!typing.is_sealed());
        assert!(!typing.is_started());
        typing.start_thinking_loop();
        sleep(Duration::from_millis(10)).await;
        assert_eq!(calls.lock().len(), 2);

        typing.mark_run_complete();
        assert!(typing.is_sealed());
    }

    #[tokio::test(start_paused = true)]
    async fn trigger_failures_are_reported() {
        let failures = Arc::new(AtomicUsize::new(0));
        let f = failures.clone();
        let on_error: ErrorFn = Arc::new(move |err: &PushError| {
            assert_eq!(err.target(), "run-8");
            f.fetch_add(1, Ordering::SeqCst);
        });
        let trigger: TriggerFn = Arc::new(|_phase: TypingPhase| async { Err::<(), _>(anyhow::anyhow!("forbidden")) }.boxed());
        let typing = TypingController::new("run-8", trigger, Some(on_error), settings(1000, 60_000));

        typing.start_thinking_loop();
        sleep(Duration::from_millis(2500)).await;
        assert_eq!(failures.load(Ordering::SeqCst), 3);
        assert!(typing.is_active());
    }

    #[test]
    fn calls_outside_a_runtime_do_not_panic() {
        let (trigger, calls) = recording_trigger();
        let typing = TypingController::new("run-9", trigger, None, settings(1000, 5000));

        typing.start_thinking_loop();
        typing.start_typing_loop();
        typing.transition_to_followup();
        assert!(typing.is_started());
        assert!(calls.lock().is_empty());

        typing.reset_for_followup();
        typing.mark_run_complete();
        assert!(typing.is_sealed());
    }
}
