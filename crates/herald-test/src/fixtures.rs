//! Fixture event types.
//!
//! A small order domain with a declared hierarchy:
//!
//! ```text
//! OrderPlaced    -> OrderEvent, dyn Auditable
//! OrderCancelled -> OrderEvent
//! Heartbeat      (no ancestors)
//! ```

use herald_events::EventBus;

/// Interface implemented by events that end up in the audit trail.
pub trait Auditable: Send + Sync {
    /// Identifier recorded in the audit trail.
    fn audit_id(&self) -> u64;
}

/// Base type of every order event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderEvent {
    /// Order identifier.
    pub order_id: u64,
}

/// An order was placed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderPlaced {
    /// Order identifier.
    pub order_id: u64,
    /// Ordered item.
    pub item: String,
}

impl OrderPlaced {
    /// An order for a generic item.
    #[must_use]
    pub fn new(order_id: u64) -> Self {
        Self {
            order_id,
            item: "widget".to_owned(),
        }
    }
}

impl Auditable for OrderPlaced {
    fn audit_id(&self) -> u64 {
        self.order_id
    }
}

/// An order was cancelled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderCancelled {
    /// Order identifier.
    pub order_id: u64,
    /// Why the order was cancelled.
    pub reason: String,
}

impl OrderCancelled {
    /// A cancellation with a fixed reason.
    #[must_use]
    pub fn new(order_id: u64) -> Self {
        Self {
            order_id,
            reason: "customer request".to_owned(),
        }
    }
}

/// Unrelated event used to check that routing stays within a hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Heartbeat(pub u64);

/// Declare the order hierarchy on `bus`.
pub fn declare_order_hierarchy(bus: &EventBus) {
    bus.declare::<OrderPlaced, OrderEvent>();
    bus.declare::<OrderPlaced, dyn Auditable>();
    bus.declare::<OrderCancelled, OrderEvent>();
}
