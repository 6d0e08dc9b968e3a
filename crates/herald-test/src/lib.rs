//! Herald Test - Shared test utilities for the Herald event bus.
//!
//! This crate provides fixture event types, recording subscribers and
//! polling helpers that can be used across Herald crates as a
//! dev-dependency.
//!
//! # Usage
//!
//! Add to your crate's `Cargo.toml`:
//!
//! ```toml
//! [dev-dependencies]
//! herald-test.workspace = true
//! ```
//!
//! Then use in your tests:
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use std::time::Duration;
//! use herald_events::{EventBus, EventType};
//! use herald_test::{OrderPlaced, RecordingSubscriber, wait_until};
//!
//! #[tokio::test(flavor = "multi_thread")]
//! async fn test_delivery() {
//!     let bus = EventBus::new();
//!     let recorder = Arc::new(RecordingSubscriber::new().listen(EventType::of::<OrderPlaced>()));
//!     bus.register(recorder.clone()).unwrap();
//!
//!     bus.publish(OrderPlaced::new(1));
//!     assert!(wait_until(Duration::from_secs(2), || recorder.log().len() == 1).await);
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]

pub mod prelude;

pub mod fixtures;
pub mod harness;
pub mod mocks;

pub use fixtures::*;
pub use harness::*;
pub use mocks::*;
