//! Typing controller lifecycle across a dispatch and a follow-up run.

use std::{sync::Arc, time::Duration};

use futures::FutureExt;
use parking_lot::Mutex;
use tokio::time::{sleep, Instant};

use live_status::{config::TypingSettings, typing::TriggerFn, TypingController, TypingPhase};

type Calls = Arc<Mutex<Vec<(u64, TypingPhase)>>>;

fn trigger() -> (TriggerFn, Calls) {
    let calls: Calls = Arc::new(Mutex::new(Vec::new()));
    let start = Instant::now();
    let sink = calls.clone();
    let trigger: TriggerFn = Arc::new(move |phase: TypingPhase| {
        let sink = sink.clone();
        async move {
            sink.lock().push((start.elapsed().as_millis() as u64, phase));
            Ok::<(), anyhow::Error>(())
        }
        .boxed()
    });
    (trigger, calls)
}

#[tokio::test(start_paused = true)]
async fn dispatch_lifecycle_seals_after_both_signals() {
    let (trigger, calls) = trigger();
    let settings = TypingSettings {
        interval_ms: 6000,
        ttl_ms: 120_000,
    };
    let typing = TypingController::new("run-a", trigger, None, settings);

    typing.start_thinking_loop();
    sleep(Duration::from_millis(7000)).await;
    typing.start_typing_loop();
    sleep(Duration::from_millis(6000)).await;

    typing.mark_dispatch_idle();
    assert!(!typing.is_sealed());
    typing.mark_run_complete();
    assert!(typing.is_sealed());
    assert!(!typing.is_active());

    sleep(Duration::from_secs(30)).await;
    assert_eq!(
        *calls.lock(),
        vec![
            (0, TypingPhase::Thinking),
            (6000, TypingPhase::Thinking),
            (7000, TypingPhase::Typing),
            (12000, TypingPhase::Typing),
        ]
    );

    typing.start_typing_loop();
    typing.refresh_ttl();
    sleep(Duration::from_millis(10)).await;
    assert!(typing.is_sealed());
    assert_eq!(calls.lock().len(), 4);
}

#[tokio::test(start_paused = true)]
async fn followup_keeps_indicator_until_next_run_finishes() {
    let (trigger, calls) = trigger();
    let settings = TypingSettings {
        interval_ms: 6000,
        ttl_ms: 120_000,
    };
    let typing = TypingController::new("run-b", trigger, None, settings);

    typing.start_typing_loop();
    sleep(Duration::from_millis(1000)).await;
    typing.mark_run_complete();
    typing.transition_to_followup();
    typing.mark_dispatch_idle();
    assert!(!typing.is_sealed());
    assert!(typing.is_transitioning());

    sleep(Duration::from_millis(4500)).await;
    typing.reset_for_followup();
    assert!(!typing.is_active());
    assert_eq!(typing.phase(), TypingPhase::Idle);

    typing.start_thinking_loop();
    assert!(!typing.is_transitioning());
    sleep(Duration::from_millis(100)).await;
    typing.mark_run_complete();
    assert!(typing.is_sealed());

    let calls = calls.lock().clone();
    assert_eq!(
        calls,
        vec![
            (0, TypingPhase::Typing),
            (1000, TypingPhase::Thinking),
            (3000, TypingPhase::Thinking),
            (5000, TypingPhase::Thinking),
            (5500, TypingPhase::Thinking),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn ttl_is_a_safety_net_for_missing_signals() {
    let (trigger, calls) = trigger();
    let settings = TypingSettings {
        interval_ms: 1000,
        ttl_ms: 3000,
    };
    let typing = TypingController::new("run-c", trigger, None, settings);
    let observer = typing.clone();

    typing.start_thinking_loop();
    sleep(Duration::from_millis(3500)).await;
    assert!(observer.is_sealed());

    let before = calls.lock().len();
    sleep(Duration::from_secs(10)).await;
    assert_eq!(calls.lock().len(), before);

    typing.cleanup();
    assert!(typing.is_sealed());
}
