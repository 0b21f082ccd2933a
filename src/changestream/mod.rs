//! Change stream contract
//!
//! The storage engine records every committed row change in a change log.
//! This module defines the consumer side of that log:
//!
//! - [`ChangeEvent`]: one `(change type, namespace, changed)` tuple
//! - [`FilterOption`]: namespace + change type mask + optional predicate
//! - [`Subscription`]: a live registration delivering ordered batches and a
//!   `done` signal when the source terminates it
//! - [`WatchableDb`]: the source that hands out subscriptions
//!
//! [`EventMultiplexer`] is an in-memory source that honours the contract; it
//! backs tests and embedders without a change-log-capable store.
//!
//! # Delivery guarantees
//!
//! - Batches reach a subscription in commit order
//! - A batch only carries events matching the subscription's options
//! - A subscription terminated by the source fires `done` before its channel
//!   closes

mod event;
mod filter;
mod multiplexer;
mod subscription;


pub use event::*;
pub use filter::*;
pub use multiplexer::*;
pub use subscription::*;
