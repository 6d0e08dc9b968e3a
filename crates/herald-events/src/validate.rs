//! Registration validation.

use tracing::warn;

use crate::error::{RegistrationError, Violation, ViolationKind};
use crate::event::EventType;
use crate::hierarchy::TypeHierarchy;
use crate::subscriber::{BatchingStrategy, Entry, Param, SubscriberClass, SubscriberConfig};

/// An entry together with its effective configuration.
pub(crate) struct ResolvedEntry {
    pub(crate) entry: Entry,
    pub(crate) config: SubscriberConfig,
    pub(crate) label: String,
}

/// Check every entry of a subscriber, collecting all violations.
///
/// # Errors
///
/// Returns [`RegistrationError::InvalidSubscriber`] listing every violation
/// when at least one entry is invalid.
pub(crate) fn validate_entries(
    class: SubscriberClass,
    dynamic: Option<EventType>,
    entries: &[ResolvedEntry],
    hierarchy: &TypeHierarchy,
) -> Result<(), RegistrationError> {
    let mut violations = Vec::new();

    for resolved in entries {
        let mut report = |kind| {
            violations.push(Violation {
                entry: resolved.label.clone(),
                kind,
            });
        };

        let params = resolved.entry.signature().params();
        let [param] = params else {
            report(ViolationKind::WrongArity {
                found: params.len(),
            });
            continue;
        };

        for kind in check_batching(*param, &resolved.config) {
            report(kind);
        }

        if let Some(target) = param.target() {
            match dynamic {
                None if target.is_root() => report(ViolationKind::TooBroad),
                Some(dynamic) if !hierarchy.is_assignable(dynamic, target) => {
                    report(ViolationKind::NotAssignable {
                        dynamic,
                        param: target,
                    });
                },
                _ => {},
            }
        }

        let config = &resolved.config;
        if config.sync_if_allowed
            && (config.batching != BatchingStrategy::None || config.queue_size.is_some())
        {
            warn!(
                subscriber = %class,
                entry = %resolved.label,
                batching = %config.batching,
                queue_size = ?config.queue_size,
                "Sync-preferring entry declares batching or a queue size; \
                 these only apply while sync dispatch is disallowed"
            );
        }
    }

    if violations.is_empty() {
        Ok(())
    } else {
        Err(RegistrationError::InvalidSubscriber {
            subscriber: class.name().to_string(),
            violations,
        })
    }
}

fn check_batching(param: Param, config: &SubscriberConfig) -> Vec<ViolationKind> {
    let mut found = Vec::new();

    match (config.batching, param) {
        (BatchingStrategy::None, Param::Iterable(_)) => {
            found.push(ViolationKind::IterableWithoutBatching);
        },
        (BatchingStrategy::None, Param::Event(_)) => {},
        (strategy, Param::Event(_)) => {
            found.push(ViolationKind::BatchingRequiresIterable { strategy });
        },
        (_, Param::Iterable(None)) => found.push(ViolationKind::UnresolvedElementType),
        (_, Param::Iterable(Some(_))) => {},
    }

    if config.batching == BatchingStrategy::SizeOrAge && config.batch_size <= 1 {
        found.push(ViolationKind::BatchSizeTooSmall {
            size: config.batch_size,
        });
    }
    if config.batching != BatchingStrategy::None && config.batch_age_ms == 0 {
        found.push(ViolationKind::ZeroBatchAge);
    }

    found
}
