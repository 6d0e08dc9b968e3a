//! Configuration validation.
//!
//! Checks that deserialized [`Config`](crate::Config) values are within
//! acceptable ranges and that per-subscription overrides are deliverable.

use crate::error::{ConfigError, ConfigResult};
use crate::types::{BatchingMode, Config, SubscriberSection};

/// Upper bound for `bus.max_queue_retries`.
pub const MAX_QUEUE_RETRIES_UPPER_BOUND: usize = 1000;

/// Validate a deserialized configuration.
///
/// # Errors
///
/// Returns the first validation error found.
pub fn validate(config: &Config) -> ConfigResult<()> {
    validate_bus(config)?;
    validate_allowlist(config)?;
    validate_subscribers(config)?;
    validate_logging(config)?;
    Ok(())
}

fn invalid(field: impl Into<String>, message: impl Into<String>) -> ConfigError {
    ConfigError::ValidationError {
        field: field.into(),
        message: message.into(),
    }
}

fn validate_bus(config: &Config) -> ConfigResult<()> {
    let bus = &config.bus;

    if bus.default_queue_size == 0 {
        return Err(invalid(
            "bus.default_queue_size",
            "default_queue_size must be at least 1",
        ));
    }

    if bus.catch_all_queue_size == 0 {
        return Err(invalid(
            "bus.catch_all_queue_size",
            "catch_all_queue_size must be at least 1",
        ));
    }

    if bus.max_queue_retries > MAX_QUEUE_RETRIES_UPPER_BOUND {
        return Err(invalid(
            "bus.max_queue_retries",
            format!(
                "max_queue_retries ({}) exceeds maximum allowed value ({MAX_QUEUE_RETRIES_UPPER_BOUND})",
                bus.max_queue_retries
            ),
        ));
    }

    Ok(())
}

fn validate_allowlist(config: &Config) -> ConfigResult<()> {
    for (subscriber, events) in &config.bus.sync_allowlist {
        if subscriber.trim().is_empty() {
            return Err(invalid(
                "bus.sync_allowlist",
                "subscriber names must not be empty",
            ));
        }
        if events.iter().any(|event| event.trim().is_empty()) {
            return Err(invalid(
                format!("bus.sync_allowlist.{subscriber}"),
                "event type names must not be empty",
            ));
        }
    }
    Ok(())
}

fn validate_subscribers(config: &Config) -> ConfigResult<()> {
    for (key, section) in &config.bus.subscribers {
        validate_subscriber(&format!("bus.subscribers.{key}"), section)?;
    }
    Ok(())
}

fn validate_subscriber(field: &str, section: &SubscriberSection) -> ConfigResult<()> {
    if section.queue_size == Some(0) {
        return Err(invalid(
            format!("{field}.queue_size"),
            "queue_size must be at least 1 when set",
        ));
    }

    if section.batching != BatchingMode::None && section.batch_age_ms == 0 {
        return Err(invalid(
            format!("{field}.batch_age_ms"),
            "batching requires a positive batch_age_ms",
        ));
    }

    if section.batching == BatchingMode::SizeOrAge && section.batch_size <= 1 {
        return Err(invalid(
            format!("{field}.batch_size"),
            format!(
                "size_or_age batching requires batch_size above 1, got {}",
                section.batch_size
            ),
        ));
    }

    Ok(())
}

fn validate_logging(config: &Config) -> ConfigResult<()> {
    let valid_levels = ["trace", "debug", "info", "warn", "error"];
    if !valid_levels.contains(&config.logging.level.as_str()) {
        return Err(invalid(
            "logging.level",
            format!(
                "unsupported log level '{}'; expected one of: {}",
                config.logging.level,
                valid_levels.join(", ")
            ),
        ));
    }

    let valid_formats = ["pretty", "compact", "json", "full"];
    if !valid_formats.contains(&config.logging.format.as_str()) {
        return Err(invalid(
            "logging.format",
            format!(
                "unsupported log format '{}'; expected one of: {}",
                config.logging.format,
                valid_formats.join(", ")
            ),
        ));
    }

    let valid_targets = ["stdout", "stderr"];
    if !valid_targets.contains(&config.logging.target.as_str()) {
        return Err(invalid(
            "logging.target",
            format!(
                "unsupported log target '{}'; expected one of: {}",
                config.logging.target,
                valid_targets.join(", ")
            ),
        ));
    }

    Ok(())
}

#[cfg(test)]
#[allow(clippy::arithmetic_side_effects)]
mod tests {
    use super::*;

    fn field_of(result: ConfigResult<()>) -> String {
        match result {
            Err(ConfigError::ValidationError { field, .. }) => field,
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate(&Config::default()).is_ok());
    }

    #[test]
    fn test_zero_queue_sizes() {
        let mut config = Config::default();
        config.bus.default_queue_size = 0;
        assert_eq!(field_of(validate(&config)), "bus.default_queue_size");

        let mut config = Config::default();
        config.bus.catch_all_queue_size = 0;
        assert_eq!(field_of(validate(&config)), "bus.catch_all_queue_size");
    }

    #[test]
    fn test_retry_upper_bound() {
        let mut config = Config::default();
        config.bus.max_queue_retries = MAX_QUEUE_RETRIES_UPPER_BOUND;
        assert!(validate(&config).is_ok());
        config.bus.max_queue_retries = MAX_QUEUE_RETRIES_UPPER_BOUND + 1;
        assert_eq!(field_of(validate(&config)), "bus.max_queue_retries");
    }

    #[test]
    fn test_subscriber_batching_rules() {
        let mut config = Config::default();
        config.bus.subscribers.insert(
            "Audit.flush".to_owned(),
            SubscriberSection {
                batching: BatchingMode::SizeOrAge,
                batch_age_ms: 100,
                batch_size: 1,
                ..SubscriberSection::default()
            },
        );
        assert_eq!(
            field_of(validate(&config)),
            "bus.subscribers.Audit.flush.batch_size"
        );

        let mut config = Config::default();
        config.bus.subscribers.insert(
            "flush".to_owned(),
            SubscriberSection {
                batching: BatchingMode::Age,
                ..SubscriberSection::default()
            },
        );
        assert_eq!(
            field_of(validate(&config)),
            "bus.subscribers.flush.batch_age_ms"
        );
    }

    #[test]
    fn test_subscriber_zero_queue() {
        let mut config = Config::default();
        config.bus.subscribers.insert(
            "flush".to_owned(),
            SubscriberSection {
                queue_size: Some(0),
                ..SubscriberSection::default()
            },
        );
        assert_eq!(
            field_of(validate(&config)),
            "bus.subscribers.flush.queue_size"
        );
    }

    #[test]
    fn test_empty_allowlist_names() {
        let mut config = Config::default();
        config
            .bus
            .sync_allowlist
            .insert("Audit".to_owned(), vec![" ".to_owned()]);
        assert_eq!(field_of(validate(&config)), "bus.sync_allowlist.Audit");
    }

    #[test]
    fn test_invalid_logging() {
        let mut config = Config::default();
        config.logging.level = "verbose".to_owned();
        assert_eq!(field_of(validate(&config)), "logging.level");

        let mut config = Config::default();
        config.logging.format = "xml".to_owned();
        assert_eq!(field_of(validate(&config)), "logging.format");

        let mut config = Config::default();
        config.logging.target = "syslog".to_owned();
        assert_eq!(field_of(validate(&config)), "logging.target");
    }
}
