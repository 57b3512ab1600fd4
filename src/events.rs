use std::io::{self, Write};

use anyhow::Result;
use chrono::Utc;
use serde::Serialize;
use serde_json::{json, Value};
use tracing_subscriber::{fmt, EnvFilter};

use crate::{config::Config, runs::QueueRejection, types::StatusKey};

/// `RUST_LOG` wins over `--log-level`. Logs go to stderr so stdout stays
/// free for the simulator.
pub fn init_logging(cfg: &Config) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&cfg.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

/// Which manager variant a status event came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusVariant {
    Text,
    Phase,
}

/// Lifecycle events of the registries, one JSON line each.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event<'a> {
    RunRegistered {
        session_id: &'a str,
        session_key: Option<&'a str>,
        replaced: bool,
    },
    QueueRejected {
        session_id: &'a str,
        reason: QueueRejection,
    },
    RunAbort {
        session_id: &'a str,
    },
    StaleClear {
        session_id: &'a str,
    },
    RunCleared {
        session_id: &'a str,
        waiters: usize,
    },
    StatusDestroyed {
        key: &'a StatusKey,
        variant: StatusVariant,
        cleared: bool,
    },
}

impl Event<'_> {
    pub fn name(&self) -> &'static str {
        match self {
            Event::RunRegistered { .. } => "run_registered",
            Event::QueueRejected { .. } => "queue_rejected",
            Event::RunAbort { .. } => "run_abort",
            Event::StaleClear { .. } => "stale_clear",
            Event::RunCleared { .. } => "run_cleared",
            Event::StatusDestroyed { .. } => "status_destroyed",
        }
    }

    /// The event's fields plus `type` and an RFC3339 `ts`.
    pub fn to_line(&self) -> Value {
        let mut line = serde_json::to_value(self).unwrap_or_else(|_| json!({ "type": self.name() }));
        if let Some(fields) = line.as_object_mut() {
            fields.insert("ts".to_string(), Value::String(Utc::now().to_rfc3339()));
        }
        line
    }
}

/// Fire-and-forget diagnostic sink. Emits one JSON line per event on stderr
/// when enabled; never affects control flow.
#[derive(Clone, Debug, Default)]
pub struct EventEmitter {
    json_output: bool,
}

impl EventEmitter {
    pub fn new(json_output: bool) -> Self {
        Self { json_output }
    }

    /// An emitter that drops every event.
    pub fn disabled() -> Self {
        Self::new(false)
    }

    pub fn is_enabled(&self) -> bool {
        self.json_output
    }

    pub fn emit(&self, event: Event<'_>) {
        if !self.json_output {
            return;
        }
        let mut stderr = io::stderr().lock();
        let _ = writeln!(stderr, "{}", event.to_line());
    }
}
