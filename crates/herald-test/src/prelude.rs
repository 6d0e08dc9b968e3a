//! Prelude module - commonly used test helpers for convenient import.
//!
//! Use `use herald_test::prelude::*;` to import the fixtures and recorders.

pub use crate::fixtures::{
    Auditable, Heartbeat, OrderCancelled, OrderEvent, OrderPlaced, declare_order_hierarchy,
};
pub use crate::harness::{DEFAULT_WAIT, init_test_logging, settle, wait_until};
pub use crate::mocks::{
    BatchLog, BatchRecordingSubscriber, EventLog, RecordingStats, RecordingSubscriber,
};
