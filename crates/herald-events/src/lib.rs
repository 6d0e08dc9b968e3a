//! Herald Events - in-process typed publish/subscribe.
//!
//! This crate provides:
//! - Type-routed publishing with declared type hierarchies
//! - Per-consumer bounded queues with eviction on overflow
//! - Age and size-or-age batching driven by a shared reaper
//! - Event-level and consumer-level filters
//! - A catch-all sink and an opt-in synchronous dispatch gate
//!
//! # Architecture
//!
//! A [`Subscriber`] declares one [`Entry`] per handler. Registering it with
//! an [`EventBus`] validates every entry and turns each into a consumer with
//! its own queue and worker task. Publishing resolves the event's type and
//! all of its declared ancestors, then offers the event to every consumer
//! indexed under any of them. Publishers never block: a full queue evicts
//! its oldest delivery a bounded number of times before dropping the event.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use herald_events::{Entry, EventBus, Subscriber};
//!
//! struct OrderPlaced {
//!     id: u64,
//! }
//!
//! struct Audit;
//!
//! impl Subscriber for Audit {
//!     fn entries(self: Arc<Self>) -> Vec<Entry> {
//!         vec![Entry::on::<OrderPlaced, _>(|order| {
//!             println!("order {} placed", order.id);
//!             Ok(())
//!         })]
//!     }
//! }
//!
//! # async fn example() {
//! let bus = EventBus::new();
//! bus.register(Arc::new(Audit)).unwrap();
//! bus.publish(OrderPlaced { id: 7 });
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod prelude;

mod batch;
mod bus;
mod catch_all;
mod config;
mod consumer;
mod error;
mod event;
mod filter;
mod gate;
mod hierarchy;
mod queue;
mod reaper;
mod registry;
mod stats;
mod subscriber;
mod validate;

pub use batch::{BatchIter, BatchView};
pub use bus::{BusStats, EventBus, EventBusBuilder, EventCreator};
pub use catch_all::{CatchAllStats, DEFAULT_CATCH_ALL_QUEUE_SIZE};
pub use config::{DEFAULT_QUEUE_SIZE, EventBusConfig};
pub use consumer::{ConsumerStats, DEFAULT_MAX_QUEUE_RETRIES};
pub use error::{
    AllowlistError, HandlerError, HandlerResult, RegistrationError, Violation, ViolationKind,
};
pub use event::{Event, EventType};
pub use filter::{AlwaysFalseFilter, AlwaysTrueFilter, EventFilter, Filter, FnFilter, same_filter};
pub use gate::{ALLOW_ALL_EVENTS, SyncAllowlist, SyncGate};
pub use hierarchy::TypeHierarchy;
pub use stats::{Metric, NoopStats, StatsSink, TracingStats};
pub use subscriber::{
    BatchHandler, BatchingStrategy, ConsumerId, Entry, EventHandler, Handler, Param, Signature,
    Subscriber, SubscriberClass, SubscriberConfig, SubscriberInfo,
};

/// Best-effort text of a caught panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}
