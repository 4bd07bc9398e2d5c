//! Hashing pipeline configuration, loaded from TOML with built-in
//! defaults for every field and environment-variable overrides layered
//! on top — the file-then-env-then-default merge order the teacher's
//! `aura_core::config::loader` models with `ConfigSource`/`ConfigPriority`,
//! collapsed here to a single concrete merge since this subsystem has no
//! CLI surface of its own per its external interface contract.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Tunables recognized by the hash manager and its workers.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct HashConfig {
    /// Upper bound on worker count.
    pub max_hashing_threads: u32,
    /// `0` = unlimited per volume; `1` = one worker per device; `>1` = cap.
    pub hashers_per_volume: u32,
    /// Rate limit per worker, in MiB/s. `0` = unlimited.
    pub max_hash_speed_mib: u32,
    /// LRU cache size hint passed to each KV engine, in MiB.
    pub db_cache_size_mib: u64,
    /// Whether successful completions log a line per file.
    pub log_hashing: bool,
}

impl Default for HashConfig {
    fn default() -> Self {
        Self {
            max_hashing_threads: 4,
            hashers_per_volume: 1,
            max_hash_speed_mib: 0,
            db_cache_size_mib: 64,
            log_hashing: false,
        }
    }
}

/// Names of the environment variables [`HashConfig::apply_env_overrides`]
/// recognizes, one per field.
const ENV_MAX_HASHING_THREADS: &str = "HASHSTORE_MAX_HASHING_THREADS";
const ENV_HASHERS_PER_VOLUME: &str = "HASHSTORE_HASHERS_PER_VOLUME";
const ENV_MAX_HASH_SPEED_MIB: &str = "HASHSTORE_MAX_HASH_SPEED_MIB";
const ENV_DB_CACHE_MIB: &str = "HASHSTORE_DB_CACHE_MIB";
const ENV_LOG_HASHING: &str = "HASHSTORE_LOG_HASHING";

impl HashConfig {
    /// Load configuration from a TOML file (defaults for any field the
    /// file omits, or for a missing file entirely), then apply
    /// environment-variable overrides on top, then validate. This is the
    /// merge order every caller should use; `load_from_file` and
    /// `apply_env_overrides` are exposed separately for callers (and
    /// tests) that want just one layer.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load_from_file(path)?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file, filling in defaults for any
    /// field the file omits. A missing file is not an error — it's
    /// equivalent to an empty one.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_owned(),
            source,
        })?;

        let config: Self = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_owned(),
            source,
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Override individual fields from the `HASHSTORE_*` environment
    /// variables listed in the external interface contract, when set.
    /// A variable present but unparseable is a validation error rather
    /// than a silent fallback to the file/default value.
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(v) = parse_env(ENV_MAX_HASHING_THREADS)? {
            self.max_hashing_threads = v;
        }
        if let Some(v) = parse_env(ENV_HASHERS_PER_VOLUME)? {
            self.hashers_per_volume = v;
        }
        if let Some(v) = parse_env(ENV_MAX_HASH_SPEED_MIB)? {
            self.max_hash_speed_mib = v;
        }
        if let Some(v) = parse_env(ENV_DB_CACHE_MIB)? {
            self.db_cache_size_mib = v;
        }
        if let Some(v) = parse_env(ENV_LOG_HASHING)? {
            self.log_hashing = v;
        }
        Ok(())
    }

    /// Reject nonsensical values before they reach placement logic.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_hashing_threads == 0 {
            return Err(ConfigError::Invalid(
                "max_hashing_threads must be at least 1".to_owned(),
            ));
        }
        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(name: &str) -> Result<Option<T>, ConfigError> {
    match std::env::var(name) {
        Ok(raw) => raw
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Invalid(format!("{name} has an invalid value: {raw:?}"))),
        Err(std::env::VarError::NotPresent) => Ok(None),
        Err(std::env::VarError::NotUnicode(_)) => {
            Err(ConfigError::Invalid(format!("{name} is not valid unicode")))
        }
    }
}
