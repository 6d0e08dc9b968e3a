//! Error types for the event bus.

use std::fmt;

use thiserror::Error;

use crate::event::EventType;
use crate::subscriber::BatchingStrategy;

/// Failure reported by a subscriber handler.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Result of one handler invocation.
pub type HandlerResult = Result<(), HandlerError>;

/// Errors returned by [`EventBus::register`](crate::EventBus::register).
#[derive(Debug, Error)]
pub enum RegistrationError {
    /// One or more entries of the subscriber are invalid. Nothing was registered.
    #[error(
        "invalid subscriber {subscriber}: {}",
        join_violations(.violations)
    )]
    InvalidSubscriber {
        /// Subscriber type name.
        subscriber: String,
        /// Every violation found, across all entries.
        violations: Vec<Violation>,
    },

    /// The subscriber declared no entries.
    #[error("subscriber {subscriber} declares no entries")]
    NoEntries {
        /// Subscriber type name.
        subscriber: String,
    },

    /// The bus has been shut down.
    #[error("event bus is shut down")]
    ShutDown,
}

impl RegistrationError {
    /// Violations carried by this error, if any.
    #[must_use]
    pub fn violations(&self) -> &[Violation] {
        match self {
            Self::InvalidSubscriber { violations, .. } => violations,
            Self::NoEntries { .. } | Self::ShutDown => &[],
        }
    }
}

fn join_violations(violations: &[Violation]) -> String {
    violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// One invalid aspect of one subscriber entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    /// Description of the offending entry.
    pub entry: String,
    /// What is wrong with it.
    pub kind: ViolationKind,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.entry, self.kind)
    }
}

/// Registration rules an entry can break.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ViolationKind {
    /// Handlers take exactly one parameter.
    #[error("expected exactly one parameter, found {found}")]
    WrongArity {
        /// Declared parameter count.
        found: usize,
    },

    /// A batching strategy was declared for a single-event parameter.
    #[error("batching strategy {strategy} requires an iterable parameter")]
    BatchingRequiresIterable {
        /// Declared strategy.
        strategy: BatchingStrategy,
    },

    /// An iterable parameter without a known element type.
    #[error("iterable parameter has no resolvable element type")]
    UnresolvedElementType,

    /// An iterable parameter without a batching strategy.
    #[error("iterable parameter requires a batching strategy")]
    IterableWithoutBatching,

    /// Size-or-age batching needs room for more than one event.
    #[error("size-or-age batching requires a batch size greater than 1, found {size}")]
    BatchSizeTooSmall {
        /// Declared batch size.
        size: usize,
    },

    /// Age-based batching needs a positive age.
    #[error("age-based batching requires a batch age greater than 0")]
    ZeroBatchAge,

    /// A non-dynamic subscriber declared interest in the root type.
    #[error("subscribing to the root event type is too broad for a non-dynamic subscriber")]
    TooBroad,

    /// A dynamic subscriber's target is not assignable to its parameter.
    #[error("dynamic event type {dynamic} is not assignable to parameter type {param}")]
    NotAssignable {
        /// Target type supplied by the subscriber.
        dynamic: EventType,
        /// Declared parameter type.
        param: EventType,
    },
}

/// Malformed sync allow-list.
#[derive(Debug, Error)]
pub enum AllowlistError {
    /// The JSON document could not be parsed.
    #[error("invalid sync allow-list JSON: {0}")]
    Json(#[from] serde_json::Error),
}
