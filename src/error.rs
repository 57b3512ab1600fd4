//! Error types surfaced to caller-supplied error callbacks.

use thiserror::Error;

/// A failure reported by an injected push or trigger function.
///
/// These never propagate out of the coordination layer; they are logged and
/// handed to the `on_error` callback of the manager or controller that issued
/// the call.
#[derive(Error, Debug)]
pub enum PushError {
    /// The external status call rejected.
    #[error("status push for {target} failed: {source}")]
    Rejected {
        /// Key or label of the thread/run the push was issued for.
        target: String,
        #[source]
        source: anyhow::Error,
    },
}

impl PushError {
    pub fn rejected(target: impl Into<String>, source: anyhow::Error) -> Self {
        Self::Rejected {
            target: target.into(),
            source,
        }
    }

    /// The thread/run label the failed push belonged to.
    pub fn target(&self) -> &str {
        match self {
            Self::Rejected { target, .. } => target,
        }
    }
}
