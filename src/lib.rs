//! Coordination primitives for ephemeral "thinking…/typing…" indicators and
//! the registry of active agent runs behind them.

pub mod config;
pub mod error;
pub mod events;
pub mod gate;
pub mod phase;
pub mod phase_status;
mod registry;
pub mod runs;
pub mod thread_status;
mod timer;
pub mod types;
pub mod typing;

#[cfg(test)]
mod testing;

pub use error::PushError;
pub use phase::Phase;
pub use phase_status::{PhaseHandle, PhaseStatusRegistry};
pub use runs::{ActiveRunRegistry, QueueRejection, RunHandle};
pub use thread_status::{StatusHandle, ThreadStatusRegistry};
pub use types::{AcquireOptions, StatusKey};
pub use typing::{TypingController, TypingPhase};
