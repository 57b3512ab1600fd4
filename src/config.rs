use std::time::Duration;

use clap::{Parser, ValueEnum};
use serde::{Deserialize, Serialize};

use crate::phase::PhaseLabels;

/// Default refresh interval for the text-variant push loop.
pub const DEFAULT_PUSH_INTERVAL_MS: u64 = 10_000;
/// Default grace window after the last handle releases.
pub const DEFAULT_GRACE_MS: u64 = 5_000;
/// Counter resolution of the phase variant.
pub const DEFAULT_COUNTER_TICK_MS: u64 = 1_000;
pub const DEFAULT_TYPING_INTERVAL_MS: u64 = 6_000;
pub const DEFAULT_TYPING_TTL_MS: u64 = 120_000;
/// Upper bound for the trigger interval right after a follow-up transition.
pub const FOLLOWUP_INTERVAL_CAP_MS: u64 = 2_000;
pub const DEFAULT_WAIT_TIMEOUT_MS: u64 = 15_000;

fn default_push_interval_ms() -> u64 {
    DEFAULT_PUSH_INTERVAL_MS
}
fn default_grace_ms() -> u64 {
    DEFAULT_GRACE_MS
}
fn default_counter_tick_ms() -> u64 {
    DEFAULT_COUNTER_TICK_MS
}
fn default_typing_interval_ms() -> u64 {
    DEFAULT_TYPING_INTERVAL_MS
}
fn default_typing_ttl_ms() -> u64 {
    DEFAULT_TYPING_TTL_MS
}
fn default_wait_timeout_ms() -> u64 {
    DEFAULT_WAIT_TIMEOUT_MS
}

/// Settings for a text-variant thread status manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextStatusSettings {
    #[serde(default = "default_push_interval_ms")]
    pub push_interval_ms: u64,
    #[serde(default = "default_grace_ms")]
    pub grace_ms: u64,
    /// Text shown during the grace window. `None` keeps the last status.
    #[serde(default)]
    pub grace_text: Option<String>,
}

impl Default for TextStatusSettings {
    fn default() -> Self {
        Self {
            push_interval_ms: DEFAULT_PUSH_INTERVAL_MS,
            grace_ms: DEFAULT_GRACE_MS,
            grace_text: None,
        }
    }
}

impl TextStatusSettings {
    pub fn push_interval(&self) -> Duration {
        Duration::from_millis(self.push_interval_ms.max(1))
    }

    pub fn grace(&self) -> Duration {
        Duration::from_millis(self.grace_ms)
    }

    pub fn with_grace_ms(mut self, grace_ms: u64) -> Self {
        self.grace_ms = grace_ms;
        self
    }

    pub fn with_push_interval_ms(mut self, push_interval_ms: u64) -> Self {
        self.push_interval_ms = push_interval_ms;
        self
    }

    pub fn with_grace_text(mut self, text: impl Into<String>) -> Self {
        self.grace_text = Some(text.into());
        self
    }
}

/// Settings for a phase/counter-variant thread status manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseStatusSettings {
    #[serde(default = "default_counter_tick_ms")]
    pub counter_tick_ms: u64,
    #[serde(default = "default_grace_ms")]
    pub grace_ms: u64,
    #[serde(default)]
    pub labels: PhaseLabels,
}

impl Default for PhaseStatusSettings {
    fn default() -> Self {
        Self {
            counter_tick_ms: DEFAULT_COUNTER_TICK_MS,
            grace_ms: DEFAULT_GRACE_MS,
            labels: PhaseLabels::default(),
        }
    }
}

impl PhaseStatusSettings {
    pub fn counter_tick(&self) -> Duration {
        Duration::from_millis(self.counter_tick_ms.max(1))
    }

    pub fn grace(&self) -> Duration {
        Duration::from_millis(self.grace_ms)
    }

    pub fn with_grace_ms(mut self, grace_ms: u64) -> Self {
        self.grace_ms = grace_ms;
        self
    }
}

/// Settings for a per-run typing controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypingSettings {
    #[serde(default = "default_typing_interval_ms")]
    pub interval_ms: u64,
    #[serde(default = "default_typing_ttl_ms")]
    pub ttl_ms: u64,
}

impl Default for TypingSettings {
    fn default() -> Self {
        Self {
            interval_ms: DEFAULT_TYPING_INTERVAL_MS,
            ttl_ms: DEFAULT_TYPING_TTL_MS,
        }
    }
}

impl TypingSettings {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.max(1))
    }

    pub fn followup_interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.clamp(1, FOLLOWUP_INTERVAL_CAP_MS))
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunRegistrySettings {
    #[serde(default = "default_wait_timeout_ms")]
    pub wait_timeout_ms: u64,
}

impl Default for RunRegistrySettings {
    fn default() -> Self {
        Self {
            wait_timeout_ms: DEFAULT_WAIT_TIMEOUT_MS,
        }
    }
}

impl RunRegistrySettings {
    pub fn wait_timeout(&self) -> Duration {
        Duration::from_millis(self.wait_timeout_ms)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Scenario {
    /// Two overlapping requesters on one thread, text variant.
    Text,
    /// Reading → thinking → reasoning with a live counter.
    Phase,
    /// Typing controller with a follow-up transition.
    Typing,
    /// Run registry: queueing, stale clears and waiters.
    Runs,
}

#[derive(Debug, Parser, Clone)]
#[command(name = "live-status-sim")]
#[command(about = "Replays scripted status-indicator scenarios against a logging channel")]
pub struct Config {
    #[arg(value_enum)]
    pub scenario: Scenario,

    #[arg(long, default_value_t = DEFAULT_PUSH_INTERVAL_MS)]
    pub push_interval: u64,

    #[arg(long, default_value_t = DEFAULT_GRACE_MS)]
    pub grace: u64,

    #[arg(long)]
    pub grace_text: Option<String>,

    #[arg(long, default_value_t = DEFAULT_TYPING_INTERVAL_MS)]
    pub typing_interval: u64,

    #[arg(long, default_value_t = DEFAULT_TYPING_TTL_MS)]
    pub typing_ttl: u64,

    #[arg(long, default_value_t = DEFAULT_WAIT_TIMEOUT_MS)]
    pub wait_timeout: u64,

    #[arg(long, default_value = "info")]
    pub log_level: String,

    #[arg(long, default_value_t = false)]
    pub json_output: bool,
}

impl Config {
    pub fn text_settings(&self) -> TextStatusSettings {
        TextStatusSettings {
            push_interval_ms: self.push_interval,
            grace_ms: self.grace,
            grace_text: self.grace_text.clone(),
        }
    }

    pub fn phase_settings(&self) -> PhaseStatusSettings {
        PhaseStatusSettings::default().with_grace_ms(self.grace)
    }

    pub fn typing_settings(&self) -> TypingSettings {
        TypingSettings {
            interval_ms: self.typing_interval,
            ttl_ms: self.typing_ttl,
        }
    }

    pub fn run_settings(&self) -> RunRegistrySettings {
        RunRegistrySettings {
            wait_timeout_ms: self.wait_timeout,
        }
    }
}
