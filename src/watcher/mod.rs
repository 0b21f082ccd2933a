//! Watchers over the change stream
//!
//! A watcher turns the ordered batches of one [`crate::Subscription`] into a
//! stream of coalesced values read through [`Changes`]:
//!
//! - [`NotifyWatcher`]: `()` pulses, for namespace, value and arbitrary
//!   filter watches
//! - [`StringsWatcher`]: deduplicated changed identifiers, seeded by an
//!   initial query
//! - hash watchers: a strings watcher that only fires when a derived hash
//!   moves (see [`HashMapper`])
//! - multi watchers: N watchers of one payload merged into one
//!
//! Every watcher pulses once at start. Its tasks run in a [`Scope`]: the
//! first error kills the whole watcher and is reported by
//! [`Watcher::wait`]. All watchers are built through [`WatcherFactory`].

mod base;
mod factory;
mod handle;
mod hash;
mod mailbox;
mod mapper;
mod multi;
mod namespace;
mod notify;
mod scope;

#[cfg(test)]
mod base_test;

pub use base::BaseWatcher;
pub use factory::*;
pub use handle::*;
pub use hash::HashMapper;
pub use hash::HashQuery;
pub use mailbox::Changes;
pub use mapper::*;
pub use multi::*;
pub use scope::*;
