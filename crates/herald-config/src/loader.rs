//! Config file loading.
//!
//! Implements the `Config::load()` algorithm:
//! 1. Parse the embedded `defaults.toml` as the base
//! 2. Merge the config file, if one is given
//! 3. Apply env var fallbacks for fields the file left unset
//! 4. Deserialize the merged tree into [`Config`]
//! 5. Validate

use std::collections::HashMap;
use std::hash::BuildHasher;
use std::path::Path;

use tracing::{debug, info};

use crate::env::{apply_env_fallbacks, collect_env_vars};
use crate::error::{ConfigError, ConfigResult};
use crate::types::Config;
use crate::validate;

/// Embedded default configuration.
const DEFAULTS_TOML: &str = include_str!("defaults.toml");

/// Maximum allowed config file size (1 MB).
const MAX_CONFIG_FILE_SIZE: u64 = 1_048_576;

/// Load configuration from the embedded defaults, an optional file, and the
/// `HERALD_*` environment.
///
/// # Errors
///
/// Returns a [`ConfigError`] if the file cannot be read or parsed, an env
/// var is malformed, or the result fails validation.
pub fn load(path: Option<&Path>) -> ConfigResult<Config> {
    load_with_env(path, &collect_env_vars())
}

/// Same as [`load`] with an explicit environment.
///
/// # Errors
///
/// Same as [`load`].
pub fn load_with_env<S: BuildHasher>(
    path: Option<&Path>,
    env_vars: &HashMap<String, String, S>,
) -> ConfigResult<Config> {
    let mut merged: toml::Value = parse(DEFAULTS_TOML, "<embedded defaults>")?;

    let file = match path {
        Some(path) => {
            let overlay = read_file(path)?;
            deep_merge(&mut merged, &overlay);
            info!(path = %path.display(), "loaded config file");
            Some(overlay)
        },
        None => None,
    };

    let env_count = apply_env_fallbacks(&mut merged, file.as_ref(), env_vars)?;
    if env_count > 0 {
        debug!(count = env_count, "applied environment variable fallbacks");
    }

    let config: Config =
        merged
            .try_into()
            .map_err(|e: toml::de::Error| ConfigError::ParseError {
                path: "<merged config>".to_owned(),
                source: e,
            })?;

    validate::validate(&config)?;
    Ok(config)
}

/// Load a config from a specific file path, without defaults layering or
/// env fallbacks. Missing fields take their `Default` values.
///
/// # Errors
///
/// Returns a [`ConfigError`] if the file cannot be read, parsed or
/// validated.
pub fn load_file(path: &Path) -> ConfigResult<Config> {
    let content = read_to_string(path)?;
    let config: Config = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
        path: path.display().to_string(),
        source: e,
    })?;
    validate::validate(&config)?;
    Ok(config)
}

/// Parse and validate configuration from a TOML string.
///
/// # Errors
///
/// Returns a [`ConfigError`] if the TOML is malformed or fails validation.
pub fn from_toml_str(content: &str) -> ConfigResult<Config> {
    let config: Config = toml::from_str(content).map_err(|e| ConfigError::ParseError {
        path: "<string>".to_owned(),
        source: e,
    })?;
    validate::validate(&config)?;
    Ok(config)
}

fn parse(content: &str, origin: &str) -> ConfigResult<toml::Value> {
    toml::from_str(content).map_err(|e| ConfigError::ParseError {
        path: origin.to_owned(),
        source: e,
    })
}

fn read_file(path: &Path) -> ConfigResult<toml::Value> {
    let content = read_to_string(path)?;
    parse(&content, &path.display().to_string())
}

/// Read a file, rejecting anything over the size limit.
fn read_to_string(path: &Path) -> ConfigResult<String> {
    let read_err = |e| ConfigError::ReadError {
        path: path.display().to_string(),
        source: e,
    };

    let metadata = std::fs::metadata(path).map_err(read_err)?;
    check_size(path, metadata.len())?;

    let content = std::fs::read_to_string(path).map_err(read_err)?;
    // The file may have grown since the metadata check.
    check_size(path, u64::try_from(content.len()).unwrap_or(u64::MAX))?;

    Ok(content)
}

fn check_size(path: &Path, len: u64) -> ConfigResult<()> {
    if len > MAX_CONFIG_FILE_SIZE {
        return Err(ConfigError::ValidationError {
            field: path.display().to_string(),
            message: format!(
                "config file is {len} bytes, exceeding the {MAX_CONFIG_FILE_SIZE} byte limit"
            ),
        });
    }
    Ok(())
}

/// Merge `overlay` into `base`. Tables merge key by key; anything else is
/// replaced.
fn deep_merge(base: &mut toml::Value, overlay: &toml::Value) {
    match (base, overlay) {
        (toml::Value::Table(base), toml::Value::Table(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(key) {
                    Some(existing) => deep_merge(existing, value),
                    None => {
                        base.insert(key.clone(), value.clone());
                    },
                }
            }
        },
        (slot, value) => *slot = value.clone(),
    }
}

#[cfg(test)]
#[allow(clippy::arithmetic_side_effects)]
mod tests {
    use super::*;
    use crate::types::BatchingMode;

    fn no_env() -> HashMap<String, String> {
        HashMap::new()
    }

    fn write_config(content: &str) -> (tempfile::TempDir, std::path::PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("herald.toml");
        std::fs::write(&path, content).unwrap();
        (dir, path)
    }

    #[test]
    fn test_defaults_deserialize_to_default_config() {
        let config: Config = toml::from_str(DEFAULTS_TOML).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_load_without_file() {
        let config = load_with_env(None, &no_env()).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_load_merges_file_over_defaults() {
        let (_dir, path) = write_config(
            r#"
            [bus]
            max_queue_retries = 2

            [bus.subscribers.flush]
            batching = "age"
            batch_age_ms = 50

            [logging]
            directives = ["herald_events=debug"]
        "#,
        );
        let config = load_with_env(Some(&path), &no_env()).unwrap();

        assert_eq!(config.bus.max_queue_retries, 2);
        assert_eq!(config.bus.default_queue_size, 1000);
        assert_eq!(config.bus.subscribers["flush"].batching, BatchingMode::Age);
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.logging.directives, vec!["herald_events=debug"]);
    }

    #[test]
    fn test_env_fallback_only_for_unset_fields() {
        let (_dir, path) = write_config("[bus]\ndefault_queue_size = 10\n");
        let env: HashMap<String, String> = [
            ("HERALD_DEFAULT_QUEUE_SIZE", "99"),
            ("HERALD_MAX_QUEUE_RETRIES", "7"),
            ("HERALD_LOG_FORMAT", "json"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_owned(), v.to_owned()))
        .collect();

        let config = load_with_env(Some(&path), &env).unwrap();
        assert_eq!(config.bus.default_queue_size, 10);
        assert_eq!(config.bus.max_queue_retries, 7);
        assert_eq!(config.logging.format, "json");
    }

    #[test]
    fn test_env_values_are_validated() {
        let env: HashMap<String, String> =
            HashMap::from([("HERALD_LOG_LEVEL".to_owned(), "loud".to_owned())]);
        let result = load_with_env(None, &env);
        assert!(matches!(result, Err(ConfigError::ValidationError { .. })));
    }

    #[test]
    fn test_load_file_nonexistent() {
        let result = load_file(Path::new("/nonexistent/herald.toml"));
        assert!(matches!(result, Err(ConfigError::ReadError { .. })));
    }

    #[test]
    fn test_load_file_parse_error() {
        let (_dir, path) = write_config("[bus\n");
        assert!(matches!(
            load_file(&path),
            Err(ConfigError::ParseError { .. })
        ));
    }

    #[test]
    fn test_from_toml_str_validates() {
        let result = from_toml_str("[bus]\ndefault_queue_size = 0\n");
        assert!(matches!(result, Err(ConfigError::ValidationError { .. })));
    }

    #[test]
    fn test_oversized_config_rejected() {
        let data = "x = \"".to_owned() + &"a".repeat(1_100_000) + "\"";
        let (_dir, path) = write_config(&data);

        let result = load_file(&path);
        assert!(
            matches!(result, Err(ConfigError::ValidationError { .. })),
            "Expected ValidationError for oversized config, got: {result:?}"
        );
    }

    #[test]
    fn test_size_limit_checked_before_reading() {
        let (_dir, path) = write_config("");
        assert!(read_to_string(&path).unwrap().is_empty());

        assert!(check_size(&path, MAX_CONFIG_FILE_SIZE).is_ok());
        assert!(matches!(
            check_size(&path, MAX_CONFIG_FILE_SIZE + 1),
            Err(ConfigError::ValidationError { .. })
        ));

        let dir = tempfile::tempdir().unwrap();
        let sparse = dir.path().join("sparse.toml");
        let file = std::fs::File::create(&sparse).unwrap();
        file.set_len(MAX_CONFIG_FILE_SIZE * 64).unwrap();
        let result = load_with_env(Some(&sparse), &no_env());
        assert!(
            matches!(result, Err(ConfigError::ValidationError { ref field, .. }) if field.contains("sparse.toml")),
            "Expected ValidationError for oversized config, got: {result:?}"
        );
    }

    #[test]
    fn test_deep_merge_replaces_leaves() {
        let mut base: toml::Value = toml::from_str("[a]\nx = 1\ny = 2\n").unwrap();
        let overlay: toml::Value = toml::from_str("[a]\ny = 3\nz = 4\n").unwrap();
        deep_merge(&mut base, &overlay);
        assert_eq!(base["a"]["x"].as_integer(), Some(1));
        assert_eq!(base["a"]["y"].as_integer(), Some(3));
        assert_eq!(base["a"]["z"].as_integer(), Some(4));
    }
}
