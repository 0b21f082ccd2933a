use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use changestream_watcher::EventMultiplexer;
use changestream_watcher::WatchConfig;
use changestream_watcher::Watcher;
use changestream_watcher::WatcherFactory;
use tokio::time::timeout;
use tracing_subscriber::EnvFilter;

pub const RECV_TIMEOUT: Duration = Duration::from_secs(1);

static LOGGER_INIT: once_cell::sync::Lazy<()> = once_cell::sync::Lazy::new(|| {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
});

pub fn enable_logger() {
    *LOGGER_INIT;
}

/// Source and factory sharing one validated config
pub fn start_source(config: WatchConfig) -> (EventMultiplexer, WatcherFactory<EventMultiplexer>) {
    enable_logger();
    let source = EventMultiplexer::new(config.clone()).expect("invalid test config");
    let factory = WatcherFactory::new(Arc::new(source.clone()), config);
    (source, factory)
}

pub async fn next_value<T: Debug>(watcher: &mut Watcher<T>) -> T {
    timeout(RECV_TIMEOUT, watcher.next())
        .await
        .expect("timed out waiting for watcher value")
        .expect("watcher closed")
}
