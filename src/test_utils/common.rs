use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::timeout;
use tracing_subscriber::EnvFilter;

use crate::ChangeEvent;
use crate::ChangeType;
use crate::EventMultiplexer;
use crate::WatchConfig;
use crate::Watcher;
use crate::WatcherFactory;

pub const RECV_TIMEOUT: Duration = Duration::from_millis(500);
pub const QUIET_PERIOD: Duration = Duration::from_millis(50);

// This will ensure the subscriber is only initialized once.
static LOGGER_INIT: once_cell::sync::Lazy<()> = once_cell::sync::Lazy::new(|| {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
});

pub fn enable_logger() {
    *LOGGER_INIT;
    println!("setup logger for unit test.");
}

pub fn test_config() -> WatchConfig {
    WatchConfig {
        subscription_buffer_size: 4,
        dispatch_timeout_ms: 100,
        initial_event_timeout_ms: 200,
    }
}

/// In-memory source plus a factory bound to it
pub fn setup_factory() -> (EventMultiplexer, WatcherFactory<EventMultiplexer>) {
    enable_logger();
    let source = EventMultiplexer::new(test_config()).unwrap();
    let factory = WatcherFactory::new(Arc::new(source.clone()), test_config());
    (source, factory)
}

pub fn event(
    change_type: ChangeType,
    namespace: &str,
    changed: &str,
) -> ChangeEvent {
    ChangeEvent::new(change_type, namespace, changed)
}

/// Next value of `watcher`, failing the test if none arrives in time.
pub async fn next_within<T: Debug>(watcher: &mut Watcher<T>) -> T {
    timeout(RECV_TIMEOUT, watcher.next())
        .await
        .expect("timed out waiting for watcher value")
        .expect("watcher closed")
}

/// Asserts `watcher` emits nothing during a short quiet period.
pub async fn assert_no_change<T: Debug>(watcher: &mut Watcher<T>) {
    if let Ok(value) = timeout(QUIET_PERIOD, watcher.next()).await {
        panic!("unexpected watcher value: {value:?}");
    }
}
