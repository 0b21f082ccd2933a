use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;
use tracing::warn;

use crate::Error;
use crate::Result;

/// Tuning parameters for the change stream and the watchers built on it
///
/// # Example (TOML)
/// ```toml
/// subscription_buffer_size = 16
/// dispatch_timeout_ms = 5000
/// initial_event_timeout_ms = 10000
/// ```
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct WatchConfig {
    /// Number of change batches each subscription can queue before the
    /// source starts waiting on it
    ///
    /// **Default**: 16
    #[serde(default = "default_subscription_buffer_size")]
    pub subscription_buffer_size: usize,

    /// How long the source waits on a subscription with a full queue before
    /// evicting it. An evicted subscription reports `done`, which the
    /// watcher surfaces as `Error::SubscriptionClosed`.
    ///
    /// **Default**: 5000
    #[serde(default = "default_dispatch_timeout_ms")]
    pub dispatch_timeout_ms: u64,

    /// How long a MultiWatcher waits for each constituent's initial event
    ///
    /// **Default**: 10000
    #[serde(default = "default_initial_event_timeout_ms")]
    pub initial_event_timeout_ms: u64,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            subscription_buffer_size: default_subscription_buffer_size(),
            dispatch_timeout_ms: default_dispatch_timeout_ms(),
            initial_event_timeout_ms: default_initial_event_timeout_ms(),
        }
    }
}

impl WatchConfig {
    /// Validates watch configuration parameters
    pub fn validate(&self) -> Result<()> {
        if self.subscription_buffer_size == 0 {
            return Err(Error::Config(
                "subscription_buffer_size must be greater than 0".into(),
            ));
        }

        if self.subscription_buffer_size > 10_000 {
            warn!(
                "subscription_buffer_size ({}) is very large; every subscription may hold that many batches",
                self.subscription_buffer_size
            );
        }

        if self.dispatch_timeout_ms == 0 {
            return Err(Error::Config("dispatch_timeout_ms must be at least 1ms".into()));
        }

        if self.initial_event_timeout_ms == 0 {
            return Err(Error::Config(
                "initial_event_timeout_ms must be at least 1ms".into(),
            ));
        }

        Ok(())
    }

    pub fn dispatch_timeout(&self) -> Duration {
        Duration::from_millis(self.dispatch_timeout_ms)
    }

    pub fn initial_event_timeout(&self) -> Duration {
        Duration::from_millis(self.initial_event_timeout_ms)
    }
}

const fn default_subscription_buffer_size() -> usize {
    16
}

const fn default_dispatch_timeout_ms() -> u64 {
    5000
}

const fn default_initial_event_timeout_ms() -> u64 {
    10_000
}
