use std::{fmt, sync::Arc};

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

use crate::error::PushError;

/// Injected asynchronous push: `payload -> eventually ()`.
pub type PushFn<T> = Arc<dyn Fn(T) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// Receives push failures. Never called with the push gate held.
pub type ErrorFn = Arc<dyn Fn(&PushError) + Send + Sync>;

/// Evaluated when the last handle releases; `false` clears immediately.
pub type GraceFn = Arc<dyn Fn() -> bool + Send + Sync>;

/// Identifies one conversation thread for the lifetime of the thread.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StatusKey(String);

impl StatusKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Composite key for a thread inside a channel.
    pub fn thread(channel: &str, thread: &str) -> Self {
        Self(format!("{}:{}", channel, thread))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StatusKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for StatusKey {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for StatusKey {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Per-acquire wiring. `push`, `on_error` and `settings` are only used when
/// the acquire creates the manager; `should_grace` belongs to the handle.
pub struct AcquireOptions<S> {
    pub push: PushFn<String>,
    pub on_error: Option<ErrorFn>,
    pub settings: S,
    pub should_grace: Option<GraceFn>,
}

impl<S: Default> AcquireOptions<S> {
    pub fn new(push: PushFn<String>) -> Self {
        Self {
            push,
            on_error: None,
            settings: S::default(),
            should_grace: None,
        }
    }
}

impl<S> AcquireOptions<S> {
    pub fn with_settings(mut self, settings: S) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_on_error(mut self, on_error: ErrorFn) -> Self {
        self.on_error = Some(on_error);
        self
    }

    pub fn with_should_grace(mut self, should_grace: GraceFn) -> Self {
        self.should_grace = Some(should_grace);
        self
    }
}

impl<S: Clone> Clone for AcquireOptions<S> {
    fn clone(&self) -> Self {
        Self {
            push: self.push.clone(),
            on_error: self.on_error.clone(),
            settings: self.settings.clone(),
            should_grace: self.should_grace.clone(),
        }
    }
}

impl<S: fmt::Debug> fmt::Debug for AcquireOptions<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AcquireOptions")
            .field("settings", &self.settings)
            .field("on_error", &self.on_error.is_some())
            .field("should_grace", &self.should_grace.is_some())
            .finish()
    }
}
