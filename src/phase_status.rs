//! Phase/counter variant of the thread status manager: shows
//! `reading`, or `thinking`/`reasoning` with a live elapsed-seconds counter.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Weak,
};

use parking_lot::Mutex;

use crate::{
    config::PhaseStatusSettings,
    events::{Event, EventEmitter, StatusVariant},
    gate::PushGate,
    phase::{format_phase, Phase},
    registry::{ManagerRegistry, RegistrySlot},
    timer::{spawn_once, spawn_recurring, TaskSlot},
    types::{AcquireOptions, GraceFn, StatusKey},
};

#[derive(Default)]
struct PhaseState {
    phase: Option<Phase>,
    seconds: u64,
    active_handles: usize,
    in_grace: bool,
    destroyed: bool,
    counter_task: TaskSlot,
    grace_task: TaskSlot,
}

struct PhaseStatusManager {
    slot: RegistrySlot<PhaseStatusManager>,
    gate: PushGate<String>,
    settings: PhaseStatusSettings,
    events: EventEmitter,
    state: Mutex<PhaseState>,
}

impl PhaseStatusManager {
    fn new(
        slot: RegistrySlot<PhaseStatusManager>,
        gate: PushGate<String>,
        settings: PhaseStatusSettings,
        events: EventEmitter,
    ) -> Arc<Self> {
        Arc::new(Self {
            slot,
            gate,
            settings,
            events,
            state: Mutex::new(PhaseState {
                active_handles: 1,
                ..PhaseState::default()
            }),
        })
    }

    fn key(&self) -> &StatusKey {
        self.slot.key()
    }

    fn render(&self, state: &PhaseState) -> Option<String> {
        state
            .phase
            .map(|phase| format_phase(phase, state.seconds, &self.settings.labels))
    }

    fn try_attach(&self) -> bool {
        let mut state = self.state.lock();
        if state.destroyed {
            return false;
        }
        state.active_handles += 1;
        if state.in_grace {
            state.in_grace = false;
            state.grace_task.cancel();
            tracing::debug!(target = "live_status::phase_status", key = %self.key(), "grace cancelled by new activity");
        }
        true
    }

    fn set_status(self: &Arc<Self>, phase: Phase) {
        let mut state = self.state.lock();
        if state.destroyed {
            return;
        }
        state.phase = Some(phase);
        state.seconds = 0;
        state.counter_task.cancel();
        if phase.ticks() {
            let weak = Arc::downgrade(self);
            let period = self.settings.counter_tick();
            state
                .counter_task
                .arm(|epoch| spawn_recurring(period, move || count(&weak, epoch)));
        }
        let text = format_phase(phase, 0, &self.settings.labels);
        drop(state);

        tracing::trace!(target = "live_status::phase_status", key = %self.key(), phase = %phase, "phase set");
        self.gate.fire(text);
    }

    /// Advance the counter by one tick; `None` stops the counter task.
    fn advance(&self, epoch: u64) -> Option<String> {
        let mut state = self.state.lock();
        if state.destroyed || !state.counter_task.is_current(epoch) {
            return None;
        }
        state.seconds += 1;
        self.render(&state)
    }

    fn pause(&self) {
        let mut state = self.state.lock();
        if state.counter_task.cancel() {
            tracing::trace!(target = "live_status::phase_status", key = %self.key(), seconds = state.seconds, "counter paused");
        }
    }

    fn current_text(&self) -> Option<String> {
        let state = self.state.lock();
        if state.destroyed {
            return None;
        }
        self.render(&state)
    }

    fn push_current(&self) -> bool {
        match self.current_text() {
            Some(text) => self.gate.fire(text),
            None => false,
        }
    }

    fn release(self: &Arc<Self>, should_grace: Option<&GraceFn>) {
        {
            let mut state = self.state.lock();
            if state.destroyed || state.active_handles == 0 {
                return;
            }
            state.active_handles -= 1;
            if state.active_handles > 0 {
                return;
            }
        }

        let grace = !self.settings.grace().is_zero() && should_grace.map_or(true, |f| f());

        let mut state = self.state.lock();
        if state.destroyed || state.active_handles > 0 {
            return;
        }
        if state.phase.is_none() {
            drop(state);
            self.destroy(false);
            return;
        }
        if !grace {
            drop(state);
            self.destroy(true);
            return;
        }

        // Frozen so the displayed seconds stop advancing while we wait to clear.
        state.counter_task.cancel();
        let weak = Arc::downgrade(self);
        let delay = self.settings.grace();
        let armed = state.grace_task.arm(|epoch| {
            spawn_once(delay, move || {
                if let Some(manager) = weak.upgrade() {
                    manager.on_grace_elapsed(epoch);
                }
            })
        });
        if !armed {
            drop(state);
            self.destroy(true);
            return;
        }
        state.in_grace = true;
        tracing::debug!(target = "live_status::phase_status", key = %self.key(), grace_ms = self.settings.grace_ms, "last handle released, grace started");
    }

    fn on_grace_elapsed(&self, epoch: u64) {
        {
            let state = self.state.lock();
            if state.destroyed || state.active_handles > 0 || !state.grace_task.is_current(epoch) {
                return;
            }
        }
        self.destroy(true);
    }

    fn destroy(&self, clear: bool) {
        {
            let mut state = self.state.lock();
            if state.destroyed {
                return;
            }
            state.destroyed = true;
            state.in_grace = false;
            state.counter_task.cancel();
            state.grace_task.cancel();
        }

        self.slot.detach();
        tracing::debug!(target = "live_status::phase_status", key = %self.key(), clear, "status manager destroyed");
        self.events.emit(Event::StatusDestroyed {
            key: self.key(),
            variant: StatusVariant::Phase,
            cleared: clear,
        });

        if clear {
            self.gate.spawn_flush(String::new());
        }
    }
}

fn count(weak: &Weak<PhaseStatusManager>, epoch: u64) -> bool {
    let Some(manager) = weak.upgrade() else {
        return false;
    };
    match manager.advance(epoch) {
        Some(text) => {
            manager.gate.fire(text);
            true
        }
        None => false,
    }
}

/// Capability returned by [`PhaseStatusRegistry::acquire`]. Dropping the
/// handle releases it.
pub struct PhaseHandle {
    manager: Arc<PhaseStatusManager>,
    should_grace: Option<GraceFn>,
    released: AtomicBool,
}

impl PhaseHandle {
    pub fn key(&self) -> &StatusKey {
        self.manager.key()
    }

    /// Push `phase` at zero seconds and (re)start the counter when the phase
    /// counts.
    pub fn set_status(&self, phase: Phase) {
        if self.is_released() {
            return;
        }
        self.manager.set_status(phase);
    }

    /// Stop the counter, keeping phase and seconds. Call right after posting
    /// a message, since the channel may auto-clear the indicator then.
    pub fn pause(&self) {
        if self.is_released() {
            return;
        }
        self.manager.pause();
    }

    pub fn release(&self) {
        if self.released.swap(true, Ordering::SeqCst) {
            return;
        }
        self.manager.release(self.should_grace.as_ref());
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }
}

impl Drop for PhaseHandle {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for PhaseHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PhaseHandle")
            .field("key", self.key())
            .field("released", &self.is_released())
            .finish()
    }
}

pub struct PhaseStatusRegistry {
    managers: ManagerRegistry<PhaseStatusManager>,
    events: EventEmitter,
}

impl Default for PhaseStatusRegistry {
    fn default() -> Self {
        Self::new(EventEmitter::disabled())
    }
}

impl PhaseStatusRegistry {
    pub fn new(events: EventEmitter) -> Self {
        Self {
            managers: ManagerRegistry::new(),
            events,
        }
    }

    pub fn acquire(
        &self,
        key: &StatusKey,
        options: AcquireOptions<PhaseStatusSettings>,
    ) -> PhaseHandle {
        let AcquireOptions {
            push,
            on_error,
            settings,
            should_grace,
        } = options;

        let manager = self.managers.acquire_with(
            key,
            |manager| manager.try_attach().then(|| manager.clone()),
            |slot| {
                let gate = PushGate::new(key.to_string(), push, on_error);
                let manager = PhaseStatusManager::new(slot, gate, settings, self.events.clone());
                (manager.clone(), manager)
            },
        );

        PhaseHandle {
            manager,
            should_grace,
            released: AtomicBool::new(false),
        }
    }

    /// True while at least one handle is held; false during grace.
    pub fn is_active(&self, key: &StatusKey) -> bool {
        self.managers
            .get(key)
            .is_some_and(|manager| manager.state.lock().active_handles > 0)
    }

    pub fn current_status(&self, key: &StatusKey) -> Option<String> {
        self.managers.get(key)?.current_text()
    }

    /// Re-send the current text once, e.g. right after the channel
    /// auto-cleared the indicator. Returns whether a push went out.
    pub fn push_current_status(&self, key: &StatusKey) -> bool {
        self.managers
            .get(key)
            .is_some_and(|manager| manager.push_current())
    }

    pub fn is_tracking(&self, key: &StatusKey) -> bool {
        self.managers.contains(key)
    }

    pub fn len(&self) -> usize {
        self.managers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
