use std::fmt;

use serde::{Deserialize, Serialize};

/// Activity phase shown by the phase/counter status variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Reading,
    Thinking,
    Reasoning,
}

impl Phase {
    /// Whether this phase displays a live elapsed-seconds counter.
    pub fn ticks(self) -> bool {
        !matches!(self, Phase::Reading)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Reading => "reading",
            Phase::Thinking => "thinking",
            Phase::Reasoning => "reasoning",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn default_reading() -> String {
    "Reading".to_string()
}
fn default_thinking() -> String {
    "Thinking".to_string()
}
fn default_reasoning() -> String {
    "Reasoning".to_string()
}

/// Display labels per phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseLabels {
    #[serde(default = "default_reading")]
    pub reading: String,
    #[serde(default = "default_thinking")]
    pub thinking: String,
    #[serde(default = "default_reasoning")]
    pub reasoning: String,
}

impl Default for PhaseLabels {
    fn default() -> Self {
        Self {
            reading: default_reading(),
            thinking: default_thinking(),
            reasoning: default_reasoning(),
        }
    }
}

impl PhaseLabels {
    pub fn label(&self, phase: Phase) -> &str {
        match phase {
            Phase::Reading => &self.reading,
            Phase::Thinking => &self.thinking,
            Phase::Reasoning => &self.reasoning,
        }
    }
}

/// Maps a phase and elapsed seconds to the text pushed to the channel.
pub fn format_phase(phase: Phase, seconds: u64, labels: &PhaseLabels) -> String {
    let label = labels.label(phase);
    if phase.ticks() {
        format!("{} {}s", label, seconds)
    } else {
        label.to_string()
    }
}
