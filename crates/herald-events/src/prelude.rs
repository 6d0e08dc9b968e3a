//! Prelude module - commonly used types for convenient import.
//!
//! Use `use herald_events::prelude::*;` to import all essential types.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use herald_events::prelude::*;
//!
//! struct Tick(u32);
//!
//! struct Clock;
//!
//! impl Subscriber for Clock {
//!     fn entries(self: Arc<Self>) -> Vec<Entry> {
//!         vec![Entry::on::<Tick, _>(|tick| {
//!             println!("tick {}", tick.0);
//!             Ok(())
//!         })]
//!     }
//! }
//!
//! # async fn example() {
//! let bus = EventBus::new();
//! bus.register(Arc::new(Clock)).unwrap();
//! bus.publish(Tick(1));
//! # }
//! ```

// Event bus
pub use crate::{BusStats, EventBus, EventBusBuilder, EventBusConfig, EventCreator};

// Events and types
pub use crate::{Event, EventType, TypeHierarchy};

// Subscribers
pub use crate::{
    BatchView, BatchingStrategy, Entry, HandlerError, HandlerResult, Subscriber, SubscriberConfig,
    SubscriberInfo,
};

// Filters
pub use crate::{AlwaysFalseFilter, AlwaysTrueFilter, EventFilter, Filter, FnFilter};

// Errors
pub use crate::RegistrationError;
