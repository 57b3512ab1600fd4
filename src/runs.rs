//! Registry of active agent runs: at most one visible run per session id,
//! with message injection, advisory abort and wait-for-end.

use std::{collections::HashMap, sync::Arc, time::Duration};

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::oneshot;

use crate::{
    config::RunRegistrySettings,
    events::{Event, EventEmitter},
};

/// Capabilities of one live agent execution, implemented by the execution
/// subsystem.
pub trait RunHandle: Send + Sync {
    /// Inject a message into the running turn. Must not block.
    fn queue_message(&self, text: &str);
    fn is_streaming(&self) -> bool;
    fn is_compacting(&self) -> bool;
    /// Signal the run to stop. Termination is observed via `clear`.
    fn abort(&self);
}

/// Why [`ActiveRunRegistry::queue_message`] refused a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueRejection {
    NoActiveRun,
    NotStreaming,
    Compacting,
}

impl QueueRejection {
    pub fn as_str(self) -> &'static str {
        match self {
            QueueRejection::NoActiveRun => "no_active_run",
            QueueRejection::NotStreaming => "not_streaming",
            QueueRejection::Compacting => "compacting",
        }
    }
}

fn same_handle(a: &Arc<dyn RunHandle>, b: &Arc<dyn RunHandle>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

struct Waiter {
    id: u64,
    tx: oneshot::Sender<bool>,
}

/// Removes a `wait_for_end` waiter however the wait ends. A no-op after
/// `clear` already drained it.
struct WaiterGuard<'a> {
    registry: &'a ActiveRunRegistry,
    session_id: &'a str,
    id: u64,
}

impl Drop for WaiterGuard<'_> {
    fn drop(&mut self) {
        self.registry.remove_waiter(self.session_id, self.id);
    }
}

#[derive(Default)]
struct RunState {
    runs: HashMap<String, Arc<dyn RunHandle>>,
    /// session key -> session id of the current run.
    session_keys: HashMap<String, String>,
    waiters: HashMap<String, Vec<Waiter>>,
    next_waiter_id: u64,
}

pub struct ActiveRunRegistry {
    state: Mutex<RunState>,
    settings: RunRegistrySettings,
    events: EventEmitter,
}

impl Default for ActiveRunRegistry {
    fn default() -> Self {
        Self::new(RunRegistrySettings::default(), EventEmitter::disabled())
    }
}

impl ActiveRunRegistry {
    pub fn new(settings: RunRegistrySettings, events: EventEmitter) -> Self {
        Self {
            state: Mutex::new(RunState::default()),
            settings,
            events,
        }
    }

    /// Register the run for `session_id`. A previous handle is replaced,
    /// never aborted.
    pub fn register(
        &self,
        session_id: &str,
        handle: Arc<dyn RunHandle>,
        session_key: Option<&str>,
    ) {
        let replaced = {
            let mut state = self.state.lock();
            if let Some(key) = session_key {
                state
                    .session_keys
                    .insert(key.to_string(), session_id.to_string());
            }
            state.runs.insert(session_id.to_string(), handle).is_some()
        };

        tracing::debug!(target = "live_status::runs", session_id, session_key = ?session_key, replaced, "run registered");
        self.events.emit(Event::RunRegistered {
            session_id,
            session_key,
            replaced,
        });
    }

    fn handle(&self, session_id: &str) -> Option<Arc<dyn RunHandle>> {
        self.state.lock().runs.get(session_id).cloned()
    }

    /// Inject `text` into the active run. Only accepted while the run is
    /// streaming and not compacting.
    pub fn queue_message(&self, session_id: &str, text: &str) -> bool {
        let reason = match self.handle(session_id) {
            None => QueueRejection::NoActiveRun,
            Some(handle) if !handle.is_streaming() => QueueRejection::NotStreaming,
            Some(handle) if handle.is_compacting() => QueueRejection::Compacting,
            Some(handle) => {
                handle.queue_message(text);
                tracing::debug!(target = "live_status::runs", session_id, chars = text.chars().count(), "message queued into active run");
                return true;
            }
        };

        tracing::debug!(target = "live_status::runs", session_id, reason = reason.as_str(), "queue message rejected");
        self.events.emit(Event::QueueRejected { session_id, reason });
        false
    }

    /// Ask the active run to stop. Does not wait; pair with
    /// [`ActiveRunRegistry::wait_for_end`] when ordering matters.
    pub fn abort(&self, session_id: &str) -> bool {
        let Some(handle) = self.handle(session_id) else {
            return false;
        };
        handle.abort();
        tracing::debug!(target = "live_status::runs", session_id, "abort requested");
        self.events.emit(Event::RunAbort { session_id });
        true
    }

    pub fn is_active(&self, session_id: &str) -> bool {
        self.state.lock().runs.contains_key(session_id)
    }

    pub fn is_streaming(&self, session_id: &str) -> bool {
        self.handle(session_id)
            .is_some_and(|handle| handle.is_streaming())
    }

    /// Current session id for a stable session key, if its run is still
    /// registered.
    pub fn resolve_active_session_id(&self, session_key: &str) -> Option<String> {
        let state = self.state.lock();
        let session_id = state.session_keys.get(session_key)?;
        state
            .runs
            .contains_key(session_id)
            .then(|| session_id.clone())
    }

    /// Remove the run and every session key aliasing it if `handle` is the
    /// one currently registered, and wake every waiter. A stale handle leaves
    /// the registry untouched.
    pub fn clear(&self, session_id: &str, handle: &Arc<dyn RunHandle>) -> bool {
        let waiters = {
            let mut state = self.state.lock();
            let matches = state
                .runs
                .get(session_id)
                .map(|current| same_handle(current, handle));
            match matches {
                Some(true) => {}
                Some(false) => {
                    drop(state);
                    tracing::debug!(target = "live_status::runs", session_id, "stale clear ignored");
                    self.events.emit(Event::StaleClear { session_id });
                    return false;
                }
                None => {
                    drop(state);
                    tracing::debug!(target = "live_status::runs", session_id, "clear for inactive session ignored");
                    return false;
                }
            }

            state.runs.remove(session_id);
            state.session_keys.retain(|_, id| id.as_str() != session_id);
            state.waiters.remove(session_id).unwrap_or_default()
        };

        let woken = waiters.len();
        for waiter in waiters {
            let _ = waiter.tx.send(true);
        }
        tracing::debug!(target = "live_status::runs", session_id, woken, "run cleared");
        self.events.emit(Event::RunCleared {
            session_id,
            waiters: woken,
        });
        true
    }

    /// Wait until the run for `session_id` is cleared. Resolves `true` at
    /// once when nothing is active, `false` when `timeout` elapses first.
    pub async fn wait_for_end(&self, session_id: &str, timeout: Duration) -> bool {
        let (id, rx) = {
            let mut state = self.state.lock();
            if !state.runs.contains_key(session_id) {
                return true;
            }
            state.next_waiter_id += 1;
            let id = state.next_waiter_id;
            let (tx, rx) = oneshot::channel();
            state
                .waiters
                .entry(session_id.to_string())
                .or_default()
                .push(Waiter { id, tx });
            (id, rx)
        };

        // Also covers the caller dropping this future before either outcome.
        let _waiter = WaiterGuard {
            registry: self,
            session_id,
            id,
        };
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(ended)) => ended,
            Ok(Err(_)) => false,
            Err(_) => {
                tracing::debug!(target = "live_status::runs", session_id, timeout_ms = timeout.as_millis() as u64, "wait for run end timed out");
                false
            }
        }
    }

    /// [`ActiveRunRegistry::wait_for_end`] with the configured timeout.
    pub async fn wait_for_end_default(&self, session_id: &str) -> bool {
        self.wait_for_end(session_id, self.settings.wait_timeout())
            .await
    }

    fn remove_waiter(&self, session_id: &str, id: u64) {
        let mut state = self.state.lock();
        if let Some(waiters) = state.waiters.get_mut(session_id) {
            waiters.retain(|waiter| waiter.id != id);
            if waiters.is_empty() {
                state.waiters.remove(session_id);
            }
        }
    }

    pub fn waiter_count(&self, session_id: &str) -> usize {
        self.state
            .lock()
            .waiters
            .get(session_id)
            .map_or(0, Vec::len)
    }

    pub fn active_count(&self) -> usize {
        self.state.lock().runs.len()
    }

    pub fn active_session_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.state.lock().runs.keys().cloned().collect();
        ids.sort();
        ids
    }
}
