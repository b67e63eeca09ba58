//! # Config - ShardKV store configuration
//!
//! All settings come from environment variables with defaults:
//!
//! ```text
//! SHARDKV_DIR                store directory (manifest + block files) (default: "data")
//! SHARDKV_PARTS              number of parts                          (default: 8)
//! SHARDKV_BLOCKS             blocks per part                          (default: 8)
//! SHARDKV_COUNT              sets both counts when the above are unset
//! SHARDKV_PERSIST            write manifest and block files           (default: "true")
//! SHARDKV_WRITE_PERIOD_SECS  write-back interval in seconds           (default: 10)
//! ```
//!
//! `SHARDKV_COUNT` reproduces the square topology (N parts of N blocks) of
//! older deployments. The part and block counts are otherwise independent.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_DIR: &str = "data";
pub const DEFAULT_PARTS: usize = 8;
pub const DEFAULT_BLOCKS: usize = 8;
pub const DEFAULT_WRITE_PERIOD_SECS: u64 = 10;

/// Errors raised while reading or validating configuration.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{var}: expected {expected}, got {value:?}")]
    Invalid {
        var: String,
        expected: &'static str,
        value: String,
    },

    #[error("{0} must be greater than zero")]
    Zero(&'static str),
}

/// Topology and persistence settings for a store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    /// Directory holding the manifest and the `blocks/` subdirectory.
    pub dir: PathBuf,
    /// Number of parts generated on first run.
    pub parts: usize,
    /// Number of blocks generated per part on first run.
    pub blocks: usize,
    /// When `false`, nothing is read from or written to `dir`.
    pub persist: bool,
    /// Interval for the background write-back loop.
    pub write_period: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from(DEFAULT_DIR),
            parts: DEFAULT_PARTS,
            blocks: DEFAULT_BLOCKS,
            persist: true,
            write_period: Duration::from_secs(DEFAULT_WRITE_PERIOD_SECS),
        }
    }
}

impl StoreConfig {
    /// Builds a config from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    /// Builds a config from an arbitrary variable lookup.
    ///
    /// Used by [`StoreConfig::from_env`] and by tests that must not touch the
    /// process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let count: Option<usize> = parse_var(&lookup, "SHARDKV_COUNT", "an integer")?;
        let parts = parse_var(&lookup, "SHARDKV_PARTS", "an integer")?
            .or(count)
            .unwrap_or(defaults.parts);
        let blocks = parse_var(&lookup, "SHARDKV_BLOCKS", "an integer")?
            .or(count)
            .unwrap_or(defaults.blocks);
        let persist = parse_var(&lookup, "SHARDKV_PERSIST", "true or false")?
            .unwrap_or(defaults.persist);
        let write_period = parse_var::<u64, _>(&lookup, "SHARDKV_WRITE_PERIOD_SECS", "seconds")?
            .map(Duration::from_secs)
            .unwrap_or(defaults.write_period);
        let dir = lookup("SHARDKV_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.dir);

        let cfg = Self {
            dir,
            parts,
            blocks,
            persist,
            write_period,
        };
        cfg.validate()?;
        Ok(cfg)
    }

    /// Rejects topologies that could not route a single key.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.parts == 0 {
            return Err(ConfigError::Zero("part count"));
        }
        if self.blocks == 0 {
            return Err(ConfigError::Zero("block count"));
        }
        Ok(())
    }

    /// Total number of blocks the topology will hold, saturating at `usize::MAX`.
    #[must_use]
    pub fn total_blocks(&self) -> usize {
        self.parts.saturating_mul(self.blocks)
    }
}

fn parse_var<T, F>(lookup: &F, var: &str, expected: &'static str) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(var) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Invalid {
                var: var.to_string(),
                expected,
                value: raw,
            }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn defaults_when_nothing_set() {
        let cfg = StoreConfig::from_lookup(lookup_from(&[])).unwrap();
        assert_eq!(cfg, StoreConfig::default());
        assert_eq!(cfg.total_blocks(), DEFAULT_PARTS * DEFAULT_BLOCKS);
    }

    #[test]
    fn total_blocks_saturates() {
        let cfg = StoreConfig {
            parts: usize::MAX,
            blocks: 2,
            ..StoreConfig::default()
        };
        assert_eq!(cfg.total_blocks(), usize::MAX);
    }

    #[test]
    fn count_sets_square_topology() {
        let cfg = StoreConfig::from_lookup(lookup_from(&[("SHARDKV_COUNT", "4")])).unwrap();
        assert_eq!(cfg.parts, 4);
        assert_eq!(cfg.blocks, 4);
    }

    #[test]
    fn specific_counts_override_count() {
        let cfg = StoreConfig::from_lookup(lookup_from(&[
            ("SHARDKV_COUNT", "4"),
            ("SHARDKV_PARTS", "2"),
            ("SHARDKV_BLOCKS", "16"),
        ]))
        .unwrap();
        assert_eq!(cfg.parts, 2);
        assert_eq!(cfg.blocks, 16);
    }

    #[test]
    fn reads_dir_persist_and_period() {
        let cfg = StoreConfig::from_lookup(lookup_from(&[
            ("SHARDKV_DIR", "/tmp/shardkv"),
            ("SHARDKV_PERSIST", "false"),
            ("SHARDKV_WRITE_PERIOD_SECS", "3"),
        ]))
        .unwrap();
        assert_eq!(cfg.dir, PathBuf::from("/tmp/shardkv"));
        assert!(!cfg.persist);
        assert_eq!(cfg.write_period, Duration::from_secs(3));
    }

    #[test]
    fn invalid_number_is_an_error() {
        let err = StoreConfig::from_lookup(lookup_from(&[("SHARDKV_PARTS", "many")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { ref var, .. } if var == "SHARDKV_PARTS"));
    }

    #[test]
    fn invalid_bool_is_an_error() {
        let err = StoreConfig::from_lookup(lookup_from(&[("SHARDKV_PERSIST", "yes")])).unwrap_err();
        assert!(err.to_string().contains("SHARDKV_PERSIST"));
    }

    #[test]
    fn zero_counts_are_rejected() {
        assert_eq!(
            StoreConfig::from_lookup(lookup_from(&[("SHARDKV_BLOCKS", "0")])).unwrap_err(),
            ConfigError::Zero("block count")
        );
        assert_eq!(
            StoreConfig::from_lookup(lookup_from(&[("SHARDKV_PARTS", "0")])).unwrap_err(),
            ConfigError::Zero("part count")
        );
    }
}
