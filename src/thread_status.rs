//! Text-variant thread status: one shared push loop per thread, fed by any
//! number of concurrent requesters, with a graced hand-off between them.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Weak,
};

use parking_lot::Mutex;

use crate::{
    config::TextStatusSettings,
    events::{Event, EventEmitter, StatusVariant},
    gate::PushGate,
    registry::{ManagerRegistry, RegistrySlot},
    timer::{spawn_once, spawn_recurring, TaskSlot},
    types::{AcquireOptions, GraceFn, StatusKey},
};

#[derive(Default)]
struct TextState {
    text: String,
    active_handles: usize,
    loop_started: bool,
    in_grace: bool,
    destroyed: bool,
    push_task: TaskSlot,
    grace_task: TaskSlot,
}

struct ThreadStatusManager {
    slot: RegistrySlot<ThreadStatusManager>,
    gate: PushGate<String>,
    settings: TextStatusSettings,
    events: EventEmitter,
    state: Mutex<TextState>,
}

impl ThreadStatusManager {
    fn new(
        slot: RegistrySlot<ThreadStatusManager>,
        gate: PushGate<String>,
        settings: TextStatusSettings,
        events: EventEmitter,
    ) -> Arc<Self> {
        tracing::debug!(target = "live_status::thread_status", key = %slot.key(), "status manager created");
        Arc::new(Self {
            slot,
            gate,
            settings,
            events,
            state: Mutex::new(TextState {
                active_handles: 1,
                ..TextState::default()
            }),
        })
    }

    fn key(&self) -> &StatusKey {
        self.slot.key()
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
            tracing::debug!(target = "live_status::thread_status", key = %self.key(), "grace cancelled by new activity");
        }
        true
    }

    fn set_status(self: &Arc<Self>, text: &str) {
        let mut state = self.state.lock();
        if state.destroyed {
            return;
        }
        state.text = text.to_string();
        if state.loop_started || text.is_empty() {
            return;
        }

        let weak = Arc::downgrade(self);
        let period = self.settings.push_interval();
        if !state
            .push_task
            .arm(|_| spawn_recurring(period, move || tick(&weak)))
        {
            return;
        }
        state.loop_started = true;
        drop(state);

        self.gate.fire(text.to_string());
    }

    /// Text for a loop tick, or `None` once destroyed.
    fn tick_text(&self) -> Option<String> {
        let state = self.state.lock();
        if state.destroyed {
            return None;
        }
        if state.in_grace {
            if let Some(grace_text) = &self.settings.grace_text {
                return Some(grace_text.clone());
            }
        }
        Some(state.text.clone())
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
        if !state.loop_started {
            drop(state);
            self.destroy(false);
            return;
        }
        if !grace {
            drop(state);
            self.destroy(true);
            return;
        }

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
        tracing::debug!(target = "live_status::thread_status", key = %self.key(), grace_ms = self.settings.grace_ms, "last handle released, grace started");
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
            state.push_task.cancel();
            state.grace_task.cancel();
        }

        self.slot.detach();
        tracing::debug!(target = "live_status::thread_status", key = %self.key(), clear, "status manager destroyed");
        self.events.emit(Event::StatusDestroyed {
            key: self.key(),
            variant: StatusVariant::Text,
            cleared: clear,
        });

        if clear {
            self.gate.spawn_flush(String::new());
        }
    }
}

fn tick(weak: &Weak<ThreadStatusManager>) -> bool {
    let Some(manager) = weak.upgrade() else {
        return false;
    };
    match manager.tick_text() {
        Some(text) => {
            manager.gate.fire(text);
            true
        }
        None => false,
    }
}

/// Capability returned by [`ThreadStatusRegistry::acquire`]. Dropping the
/// handle releases it.
pub struct StatusHandle {
    manager: Arc<ThreadStatusManager>,
    should_grace: Option<GraceFn>,
    released: AtomicBool,
}

impl StatusHandle {
    pub fn key(&self) -> &StatusKey {
        self.manager.key()
    }

    /// Update the shared status text. The first non-empty text starts the
    /// push loop. No-op after release.
    pub fn set_status(&self, text: &str) {
        if self.is_released() {
            return;
        }
        self.manager.set_status(text);
    }

    /// Give up this handle. Only the first call has an effect.
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

impl Drop for StatusHandle {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for StatusHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatusHandle")
            .field("key", self.key())
            .field("released", &self.is_released())
            .finish()
    }
}

/// Process-wide map of text-variant status managers keyed by thread.
pub struct ThreadStatusRegistry {
    managers: ManagerRegistry<ThreadStatusManager>,
    events: EventEmitter,
}

impl Default for ThreadStatusRegistry {
    fn default() -> Self {
        Self::new(EventEmitter::disabled())
    }
}

impl ThreadStatusRegistry {
    pub fn new(events: EventEmitter) -> Self {
        Self {
            managers: ManagerRegistry::new(),
            events,
        }
    }

    /// Join the status loop for `key`, creating it if needed.
    pub fn acquire(
        &self,
        key: &StatusKey,
        options: AcquireOptions<TextStatusSettings>,
    ) -> StatusHandle {
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
                let manager = ThreadStatusManager::new(slot, gate, settings, self.events.clone());
                (manager.clone(), manager)
            },
        );

        StatusHandle {
            manager,
            should_grace,
            released: AtomicBool::new(false),
        }
    }

    /// Whether a manager (live or in grace) exists for `key`.
    pub fn is_tracking(&self, key: &StatusKey) -> bool {
        self.managers.contains(key)
    }

    pub fn active_handles(&self, key: &StatusKey) -> usize {
        self.managers
            .get(key)
            .map_or(0, |manager| manager.state.lock().active_handles)
    }

    pub fn current_text(&self, key: &StatusKey) -> Option<String> {
        let manager = self.managers.get(key)?;
        let state = manager.state.lock();
        (!state.text.is_empty()).then(|| state.text.clone())
    }

    pub fn len(&self) -> usize {
        self.managers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn keys(&self) -> Vec<StatusKey> {
        self.managers.keys()
    }
}
