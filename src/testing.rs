//! Recording push functions for timer-driven unit tests.

use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use futures::FutureExt;
use parking_lot::Mutex;
use tokio::time::Instant;

use crate::types::PushFn;

#[derive(Clone)]
pub(crate) struct Recorder {
    start: Instant,
    delay: Duration,
    pushes: Arc<Mutex<Vec<(u64, String)>>>,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
}

impl Recorder {
    pub(crate) fn new() -> Self {
        Self::with_delay(Duration::ZERO)
    }

    pub(crate) fn with_delay(delay: Duration) -> Self {
        Self {
            start: Instant::now(),
            delay,
            pushes: Arc::new(Mutex::new(Vec::new())),
            in_flight: Arc::new(AtomicUsize::new(0)),
            max_in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub(crate) fn push_fn(&self) -> PushFn<String> {
        let rec = self.clone();
        Arc::new(move |text: String| {
            let rec = rec.clone();
            async move {
                let now = rec.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                rec.max_in_flight.fetch_max(now, Ordering::SeqCst);
                let at = rec.start.elapsed().as_millis() as u64;
                rec.pushes.lock().push((at, text));
                if !rec.delay.is_zero() {
                    tokio::time::sleep(rec.delay).await;
                }
                rec.in_flight.fetch_sub(1, Ordering::SeqCst);
                Ok::<(), anyhow::Error>(())
            }
            .boxed()
        })
    }

    pub(crate) fn texts(&self) -> Vec<String> {
        self.pushes.lock().iter().map(|(_, t)| t.clone()).collect()
    }

    pub(crate) fn timeline(&self) -> Vec<(u64, String)> {
        self.pushes.lock().clone()
    }

    pub(crate) fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

/// Let spawned push tasks run without moving the paused clock meaningfully.
pub(crate) async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}
