//! Environment variable fallbacks.
//!
//! Env vars are a fallback, not an override: they only fill fields that the
//! config file left unset.

use std::collections::HashMap;
use std::hash::BuildHasher;

use tracing::debug;

use crate::error::{ConfigError, ConfigResult};

/// Prefix of every variable this crate reads.
pub const ENV_PREFIX: &str = "HERALD_";

#[derive(Clone, Copy)]
enum Kind {
    Text,
    Integer,
    Boolean,
}

struct EnvMapping {
    var_name: &'static str,
    field_path: &'static str,
    kind: Kind,
}

const ENV_MAPPINGS: &[EnvMapping] = &[
    EnvMapping {
        var_name: "HERALD_LOG_LEVEL",
        field_path: "logging.level",
        kind: Kind::Text,
    },
    EnvMapping {
        var_name: "HERALD_LOG_FORMAT",
        field_path: "logging.format",
        kind: Kind::Text,
    },
    EnvMapping {
        var_name: "HERALD_ALLOW_SYNC_SUBSCRIBERS",
        field_path: "bus.allow_sync_subscribers",
        kind: Kind::Boolean,
    },
    EnvMapping {
        var_name: "HERALD_MAX_QUEUE_RETRIES",
        field_path: "bus.max_queue_retries",
        kind: Kind::Integer,
    },
    EnvMapping {
        var_name: "HERALD_DEFAULT_QUEUE_SIZE",
        field_path: "bus.default_queue_size",
        kind: Kind::Integer,
    },
];

/// Snapshot of the `HERALD_*` variables of the current process.
#[must_use]
pub fn collect_env_vars() -> HashMap<String, String> {
    std::env::vars()
        .filter(|(name, _)| name.starts_with(ENV_PREFIX))
        .collect()
}

/// Fill fields absent from `file` with values from `env_vars`, writing them
/// into `merged`.
///
/// Returns the number of variables applied.
///
/// # Errors
///
/// Returns [`ConfigError::EnvError`] if a variable cannot be read as the
/// kind of value its field holds.
pub fn apply_env_fallbacks<S: BuildHasher>(
    merged: &mut toml::Value,
    file: Option<&toml::Value>,
    env_vars: &HashMap<String, String, S>,
) -> ConfigResult<usize> {
    let mut count: usize = 0;

    for mapping in ENV_MAPPINGS {
        if file.is_some_and(|file| has_field(file, mapping.field_path)) {
            continue;
        }
        let Some(raw) = env_vars.get(mapping.var_name) else {
            continue;
        };

        debug!(
            var = mapping.var_name,
            field = mapping.field_path,
            "applying env var fallback"
        );
        let value = coerce(mapping, raw)?;
        set_field(merged, mapping.field_path, value);
        count = count.saturating_add(1);
    }

    Ok(count)
}

fn coerce(mapping: &EnvMapping, raw: &str) -> ConfigResult<toml::Value> {
    let raw = raw.trim();
    let invalid = |expected: &str| ConfigError::EnvError {
        var_name: mapping.var_name.to_owned(),
        message: format!("expected {expected}, got '{raw}'"),
    };

    match mapping.kind {
        Kind::Text => Ok(toml::Value::String(raw.to_owned())),
        Kind::Integer => raw
            .parse::<i64>()
            .ok()
            .filter(|n| *n >= 0)
            .map(toml::Value::Integer)
            .ok_or_else(|| invalid("a non-negative integer")),
        Kind::Boolean => match raw.to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Ok(toml::Value::Boolean(true)),
            "false" | "0" | "no" | "off" => Ok(toml::Value::Boolean(false)),
            _ => Err(invalid("a boolean")),
        },
    }
}

fn has_field(root: &toml::Value, path: &str) -> bool {
    path.split('.')
        .try_fold(root, |current, segment| current.get(segment))
        .is_some()
}

fn set_field(root: &mut toml::Value, path: &str, value: toml::Value) {
    let mut segments = path.split('.').peekable();
    let mut current = root;

    while let Some(segment) = segments.next() {
        let toml::Value::Table(table) = current else {
            return;
        };
        if segments.peek().is_none() {
            table.insert(segment.to_owned(), value);
            return;
        }
        current = table
            .entry(segment.to_owned())
            .or_insert(toml::Value::Table(toml::map::Map::new()));
    }
}
