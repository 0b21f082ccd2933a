//! Watcher Error Hierarchy
//!
//! Defines the error types surfaced by the change stream and the watchers
//! built on top of it, categorized by when they can happen: while a watcher
//! is being set up, or while it is running.

use config::ConfigError;

#[doc(hidden)]
pub type Result<T> = std::result::Result<T, Error>;

/// Errors are `Clone` so the terminal error of a watcher can be handed to
/// every caller of `wait()`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// The change source terminated a live subscription underneath a running
    /// watcher. Callers may reconstruct the watcher.
    #[error("subscription closed by change source")]
    SubscriptionClosed,

    /// The change source cannot back this kind of watch. BaseWatcher degrades
    /// this into a subscription that never fires.
    #[error("watch not supported: {0}")]
    WatchUnsupported(String),

    /// Any other subscription failure at setup time
    #[error("subscribe failed: {0}")]
    Subscribe(String),

    /// The initial state query of a namespace watcher failed
    #[error("initial query for namespace {namespace} failed: {reason}")]
    InitialQuery { namespace: String, reason: String },

    /// A mapper failed while processing a live batch
    #[error("mapper failed: {0}")]
    Mapper(String),

    /// A single-row hash lookup returned more than one row
    #[error("expected at most one current hash in namespace {namespace}, found {rows}")]
    HashIntegrity { namespace: String, rows: usize },

    /// A MultiWatcher constituent did not deliver its initial event
    #[error("initial event not received: {0}")]
    InitialEvent(String),

    /// The change source handle could not be resolved or has been closed
    #[error("change source unavailable: {0}")]
    SourceUnavailable(String),

    /// Configuration loading or validation failures
    #[error("config error: {0}")]
    Config(String),

    /// Unrecoverable failures
    #[error("Fatal error: {0}")]
    Fatal(String),
}

impl From<ConfigError> for Error {
    fn from(e: ConfigError) -> Self {
        Error::Config(e.to_string())
    }
}

impl Error {
    /// Returns true for the sentinel raised when the source tore down a
    /// running subscription.
    pub fn is_subscription_closed(&self) -> bool {
        matches!(self, Error::SubscriptionClosed)
    }
}
