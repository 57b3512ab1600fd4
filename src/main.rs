use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use anyhow::Result;
use clap::Parser;
use futures::FutureExt;
use parking_lot::Mutex;
use tokio::time::{sleep, Instant};
use uuid::Uuid;

use live_status::{
    config::{Config, Scenario},
    events::{init_logging, EventEmitter},
    types::PushFn,
    AcquireOptions, ActiveRunRegistry, Phase, PhaseStatusRegistry, RunHandle, StatusKey,
    ThreadStatusRegistry, TypingController, TypingPhase,
};

const SIM_CHANNEL: &str = "C0SIMULATED";

#[tokio::main]
async fn main() -> Result<()> {
    let cfg = Config::parse();
    init_logging(&cfg)?;
    let events = EventEmitter::new(cfg.json_output);

    match cfg.scenario {
        Scenario::Text => run_text(&cfg, events).await,
        Scenario::Phase => run_phase(&cfg, events).await,
        Scenario::Typing => run_typing(&cfg).await,
        Scenario::Runs => run_runs(&cfg, events).await,
    }
    Ok(())
}

fn logging_push(key: &StatusKey) -> PushFn<String> {
    let start = Instant::now();
    let key = key.to_string();
    Arc::new(move |text: String| {
        let key = key.clone();
        async move {
            tracing::info!(target = "live_status::sim", key = %key, elapsed_ms = start.elapsed().as_millis() as u64, status = %text, "status push");
            Ok::<(), anyhow::Error>(())
        }
        .boxed()
    })
}

fn thread_key() -> StatusKey {
    let thread = format!("{}.000100", chrono::Utc::now().timestamp());
    StatusKey::thread(SIM_CHANNEL, &thread)
}

async fn run_text(cfg: &Config, events: EventEmitter) {
    let registry = ThreadStatusRegistry::new(events);
    let key = thread_key();
    let options = AcquireOptions::new(logging_push(&key)).with_settings(cfg.text_settings());

    let reader = registry.acquire(&key, options.clone());
    reader.set_status("is reading the thread...");
    sleep(Duration::from_millis(1500)).await;

    let writer = registry.acquire(&key, options);
    writer.set_status("is drafting a reply...");
    reader.release();
    sleep(Duration::from_secs(2)).await;

    writer.release();
    tracing::info!(target = "live_status::sim", key = %key, "last handle released");
    sleep(cfg.text_settings().grace() + Duration::from_millis(500)).await;
    tracing::info!(target = "live_status::sim", key = %key, tracking = registry.is_tracking(&key), "text scenario finished");
}

async fn run_phase(cfg: &Config, events: EventEmitter) {
    let registry = PhaseStatusRegistry::new(events);
    let key = thread_key();
    let handle = registry.acquire(
        &key,
        AcquireOptions::new(logging_push(&key)).with_settings(cfg.phase_settings()),
    );

    handle.set_status(Phase::Reading);
    sleep(Duration::from_secs(1)).await;
    handle.set_status(Phase::Thinking);
    sleep(Duration::from_millis(3200)).await;

    // Posting a partial reply makes the channel drop the indicator.
    handle.pause();
    sleep(Duration::from_millis(300)).await;
    registry.push_current_status(&key);

    handle.set_status(Phase::Reasoning);
    sleep(Duration::from_millis(2200)).await;
    handle.release();
    tracing::info!(target = "live_status::sim", key = %key, active = registry.is_active(&key), "phase handle released");
    sleep(cfg.phase_settings().grace() + Duration::from_millis(500)).await;
    tracing::info!(target = "live_status::sim", key = %key, tracking = registry.is_tracking(&key), "phase scenario finished");
}

async fn run_typing(cfg: &Config) {
    let start = Instant::now();
    let run_id = Uuid::new_v4().to_string();
    let trigger_run = run_id.clone();
    let typing = TypingController::new(
        run_id.clone(),
        Arc::new(move |phase: TypingPhase| {
            let run = trigger_run.clone();
            async move {
                tracing::info!(target = "live_status::sim", run = %run, elapsed_ms = start.elapsed().as_millis() as u64, phase = ?phase, "typing trigger");
                Ok::<(), anyhow::Error>(())
            }
            .boxed()
        }),
        None,
        cfg.typing_settings(),
    );

    typing.start_thinking_loop();
    sleep(Duration::from_secs(2)).await;
    typing.start_typing_loop();
    sleep(Duration::from_secs(2)).await;

    typing.mark_run_complete();
    typing.transition_to_followup();
    sleep(Duration::from_secs(3)).await;

    typing.reset_for_followup();
    typing.start_typing_loop();
    sleep(Duration::from_secs(1)).await;
    typing.mark_run_complete();
    tracing::info!(target = "live_status::sim", run = %run_id, sealed = typing.is_sealed(), "typing scenario finished");
}

struct SimRun {
    streaming: AtomicBool,
    compacting: AtomicBool,
    aborted: AtomicBool,
    inbox: Mutex<Vec<String>>,
}

impl SimRun {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            streaming: AtomicBool::new(true),
            compacting: AtomicBool::new(false),
            aborted: AtomicBool::new(false),
            inbox: Mutex::new(Vec::new()),
        })
    }
}

impl RunHandle for SimRun {
    fn queue_message(&self, text: &str) {
        self.inbox.lock().push(text.to_string());
    }

    fn is_streaming(&self) -> bool {
        self.streaming.load(Ordering::SeqCst) && !self.aborted.load(Ordering::SeqCst)
    }

    fn is_compacting(&self) -> bool {
        self.compacting.load(Ordering::SeqCst)
    }

    fn abort(&self) {
        self.aborted.store(true, Ordering::SeqCst);
    }
}

async fn run_runs(cfg: &Config, events: EventEmitter) {
    let registry = Arc::new(ActiveRunRegistry::new(cfg.run_settings(), events));
    let session_key = format!("agent:main:{}", SIM_CHANNEL.to_ascii_lowercase());
    let session_id = Uuid::new_v4().to_string();

    let sim = SimRun::new();
    let run: Arc<dyn RunHandle> = sim.clone();
    registry.register(&session_id, run.clone(), Some(&session_key));

    let accepted = registry.queue_message(&session_id, "also check the logs");
    sim.compacting.store(true, Ordering::SeqCst);
    let during_compaction = registry.queue_message(&session_id, "and the metrics");
    sim.compacting.store(false, Ordering::SeqCst);
    tracing::info!(target = "live_status::sim", accepted, during_compaction, inbox = sim.inbox.lock().len(), "queue attempts");

    let stale: Arc<dyn RunHandle> = SimRun::new();
    let stale_cleared = registry.clear(&session_id, &stale);
    tracing::info!(target = "live_status::sim", stale_cleared, active = registry.is_active(&session_id), "stale clear attempted");

    let waiter = {
        let registry = registry.clone();
        let session_id = session_id.clone();
        tokio::spawn(async move { registry.wait_for_end_default(&session_id).await })
    };

    registry.abort(&session_id);
    sleep(Duration::from_millis(750)).await;
    let resolved = registry.resolve_active_session_id(&session_key);
    tracing::info!(target = "live_status::sim", resolved = ?resolved, "session key resolved while run winds down");

    registry.clear(&session_id, &run);
    match waiter.await {
        Ok(ended) => {
            tracing::info!(target = "live_status::sim", ended, active_runs = registry.active_count(), "runs scenario finished")
        }
        Err(error) => tracing::warn!(target = "live_status::sim", error = %error, "waiter task failed"),
    }
}
