//! Event-sourced watcher core
//!
//! Consumers subscribe to the change stream of a storage engine and receive
//! coalesced notifications about the rows that changed, instead of polling.
//!
//! ```ignore
//! let source = EventMultiplexer::new(WatchConfig::new()?)?;
//! let factory = WatcherFactory::new(Arc::new(source.clone()), WatchConfig::default());
//!
//! let mut units = factory.new_empty_namespace_watcher("unit", ChangeType::ALL).await?;
//! units.next().await; // initial, empty
//!
//! source.publish(vec![ChangeEvent::new(ChangeType::CREATE, "unit", "app/0")]).await?;
//! assert_eq!(units.next().await, Some(vec!["app/0".to_string()]));
//! ```

mod changestream;
mod config;
mod errors;
mod watcher;

pub use changestream::*;
pub use config::*;
pub use errors::*;
pub use watcher::*;

//-----------------------------------------------------------
// Test utils

#[cfg(test)]
pub mod test_utils;
