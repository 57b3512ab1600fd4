use std::sync::Arc;

use tokio::sync::Mutex;

use crate::{
    error::PushError,
    types::{ErrorFn, PushFn},
};

/// Guards an injected push function so at most one call is in flight.
///
/// Overlapping [`PushGate::fire`] calls are dropped, not queued.
/// [`PushGate::flush`] waits for the in-flight call instead, for pushes that
/// must not be lost (the terminal clear).
pub struct PushGate<T> {
    target: Arc<str>,
    push: PushFn<T>,
    on_error: Option<ErrorFn>,
    in_flight: Arc<Mutex<()>>,
}

impl<T> Clone for PushGate<T> {
    fn clone(&self) -> Self {
        Self {
            target: self.target.clone(),
            push: self.push.clone(),
            on_error: self.on_error.clone(),
            in_flight: self.in_flight.clone(),
        }
    }
}

impl<T> std::fmt::Debug for PushGate<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PushGate")
            .field("target", &self.target)
            .field("busy", &self.is_busy())
            .finish()
    }
}

impl<T> PushGate<T> {
    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn is_busy(&self) -> bool {
        self.in_flight.try_lock().is_err()
    }
}

impl<T> PushGate<T>
where
    T: Send + 'static,
{
    pub fn new(target: impl Into<String>, push: PushFn<T>, on_error: Option<ErrorFn>) -> Self {
        Self {
            target: Arc::from(target.into()),
            push,
            on_error,
            in_flight: Arc::new(Mutex::new(())),
        }
    }

    /// Start a push in the background unless one is already running.
    /// Returns whether the payload was sent.
    pub fn fire(&self, payload: T) -> bool {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!(target = "live_status::gate", key = %self.target, "no runtime, push dropped");
            return false;
        };
        let Ok(guard) = self.in_flight.clone().try_lock_owned() else {
            tracing::trace!(target = "live_status::gate", key = %self.target, "push in flight, tick skipped");
            return false;
        };

        let call = (self.push)(payload);
        let target = self.target.clone();
        let on_error = self.on_error.clone();
        runtime.spawn(async move {
            let result = call.await;
            drop(guard);
            report(&target, on_error.as_ref(), result);
        });
        true
    }

    /// Push after any in-flight call finishes.
    pub async fn flush(&self, payload: T) {
        let guard = self.in_flight.lock().await;
        let result = (self.push)(payload).await;
        drop(guard);
        report(&self.target, self.on_error.as_ref(), result);
    }

    /// [`PushGate::flush`] on a background task. Without a runtime the
    /// payload is dropped with a warning.
    pub fn spawn_flush(&self, payload: T) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!(target = "live_status::gate", key = %self.target, "no runtime, final push dropped");
            return;
        };
        let gate = self.clone();
        runtime.spawn(async move { gate.flush(payload).await });
    }
}

fn report(target: &str, on_error: Option<&ErrorFn>, result: anyhow::Result<()>) {
    let Err(source) = result else {
        return;
    };
    let err = PushError::rejected(target, source);
    tracing::warn!(target = "live_status::gate", key = %target, error = %err, "status push failed");
    if let Some(on_error) = on_error {
        on_error(&err);
    }
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

    use super::PushGate;
    use crate::{
        error::PushError,
        types::{ErrorFn, PushFn},
    };

    fn slow_push(calls: Arc<Mutex<Vec<String>>>, delay: Duration) -> PushFn<String> {
        Arc::new(move |text: String| {
            let calls = calls.clone();
            async move {
                calls.lock().push(text);
                tokio::time::sleep(delay).await;
                Ok::<(), anyhow::Error>(())
            }
            .boxed()
        })
    }

    #[test]
    fn debug_shows_target_and_idle_gate() {
        let gate = PushGate::new("C1:t1", slow_push(Arc::new(Mutex::new(Vec::new())), Duration::ZERO), None);
        let rendered = format!("{:?}", gate);
        assert!(rendered.contains("C1:t1"));
        assert!(rendered.contains("busy: false"));
    }

    #[test]
    fn pushes_without_runtime_are_dropped() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let gate = PushGate::new("k", slow_push(calls.clone(), Duration::ZERO), None);

        assert!(!gate.fire("x".to_string()));
        gate.spawn_flush(String::new());
        assert!(calls.lock().is_empty());
        assert!(!gate.is_busy());
    }

    #[tokio::test(start_paused = true)]
    async fn overlapping_fire_is_dropped() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let gate = PushGate::new("k", slow_push(calls.clone(), Duration::from_millis(500)), None);

        assert!(gate.fire("a".to_string()));
        assert!(gate.is_busy());
        assert!(!gate.fire("b".to_string()));

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert!(!gate.is_busy());
        assert!(gate.fire("c".to_string()));
        tokio::time::sleep(Duration::from_millis(1)).await;

        assert_eq!(*calls.lock(), vec!["a".to_string(), "c".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn flush_waits_for_in_flight_call() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let gate = PushGate::new("k", slow_push(calls.clone(), Duration::from_millis(500)), None);

        assert!(gate.fire("working".to_string()));
        gate.flush(String::new()).await;

        assert_eq!(*calls.lock(), vec!["working".to_string(), String::new()]);
    }

    #[tokio::test(start_paused = true)]
    async fn errors_reach_callback_and_release_gate() {
        let failures = Arc::new(AtomicUsize::new(0));
        let f = failures.clone();
        let on_error: ErrorFn = Arc::new(move |err: &PushError| {
            assert_eq!(err.target(), "C1:t1");
            f.fetch_add(1, Ordering::SeqCst);
        });
        let push: PushFn<String> =
            Arc::new(|_text: String| async { Err::<(), _>(anyhow::anyhow!("channel_not_found")) }.boxed());
        let gate = PushGate::new("C1:t1", push, Some(on_error));

        assert!(gate.fire("x".to_string()));
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert!(gate.fire("y".to_string()));
        gate.flush(String::new()).await;

        assert_eq!(failures.load(Ordering::SeqCst), 3);
    }
}
