//! Chain configuration
//!
//! All values are fixed for the lifetime of a generator; changing the salt or
//! the initial nonce means starting a new chain.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{HashletError, HashletResult};

/// Default seed nonce for the genesis link
pub const DEFAULT_INITIAL_NONCE: &str = "0";

/// Default salt mixed into every digest
pub const DEFAULT_SALT: &str = "blossom";

/// Default pause between links
pub const DEFAULT_INTERVAL_MS: u64 = 100;

/// Default number of links kept under `/history`
pub const DEFAULT_HISTORY_CAPACITY: usize = 64;

/// Largest accepted `history_capacity`
pub const MAX_HISTORY_CAPACITY: usize = 1 << 20;

/// A publish older than `stall_factor * interval` is reported as a stall
pub const DEFAULT_STALL_FACTOR: u32 = 50;

/// Generator configuration
///
/// Loaded from JSON with [`ChainConfig::load`]; missing fields take their
/// defaults.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChainConfig {
    /// Nonce of the genesis link
    pub initial_nonce: String,
    /// Salt appended to every nonce before hashing
    pub salt: String,
    /// Milliseconds between published links
    pub interval_ms: u64,
    /// Links retained in the trailing history (current link included)
    pub history_capacity: usize,
    /// Multiple of the interval after which the generator counts as stalled
    pub stall_factor: u32,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            initial_nonce: DEFAULT_INITIAL_NONCE.to_string(),
            salt: DEFAULT_SALT.to_string(),
            interval_ms: DEFAULT_INTERVAL_MS,
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            stall_factor: DEFAULT_STALL_FACTOR,
        }
    }
}

impl ChainConfig {
    /// Read a JSON config file and validate it
    pub fn load<P: AsRef<Path>>(path: P) -> HashletResult<Self> {
        let file = File::open(path.as_ref())?;
        let config: ChainConfig = serde_json::from_reader(BufReader::new(file))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the generator cannot run with
    pub fn validate(&self) -> HashletResult<()> {
        if self.initial_nonce.is_empty() {
            return Err(HashletError::InvalidConfig(
                "initial_nonce must not be empty".into(),
            ));
        }
        if self.interval_ms == 0 {
            return Err(HashletError::InvalidConfig(
                "interval_ms must be at least 1".into(),
            ));
        }
        if self.history_capacity == 0 {
            return Err(HashletError::InvalidConfig(
                "history_capacity must be at least 1".into(),
            ));
        }
        if self.history_capacity > MAX_HISTORY_CAPACITY {
            return Err(HashletError::InvalidConfig(format!(
                "history_capacity must be at most {}",
                MAX_HISTORY_CAPACITY
            )));
        }
        if self.stall_factor == 0 {
            return Err(HashletError::InvalidConfig(
                "stall_factor must be at least 1".into(),
            ));
        }
        Ok(())
    }

    #[inline]
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    /// Age of the last publish at which [`HashletError::GeneratorStalled`] is raised
    pub fn stall_threshold(&self) -> Duration {
        self.interval().saturating_mul(self.stall_factor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = ChainConfig::default();
        assert_eq!(config.initial_nonce, "0");
        assert_eq!(config.salt, "blossom");
        assert_eq!(config.interval(), Duration::from_millis(100));
        assert_eq!(config.history_capacity, 64);
        assert_eq!(config.stall_threshold(), Duration::from_secs(5));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_out_of_range_values() {
        let bad = [
            ChainConfig { interval_ms: 0, ..Default::default() },
            ChainConfig { history_capacity: 0, ..Default::default() },
            ChainConfig { stall_factor: 0, ..Default::default() },
            ChainConfig { initial_nonce: String::new(), ..Default::default() },
            ChainConfig { history_capacity: MAX_HISTORY_CAPACITY + 1, ..Default::default() },
            ChainConfig { history_capacity: usize::MAX, ..Default::default() },
        ];
        for config in bad {
            assert!(matches!(config.validate(), Err(HashletError::InvalidConfig(_))));
        }
    }

    #[test]
    fn test_max_history_capacity_is_allowed() {
        let config = ChainConfig {
            history_capacity: MAX_HISTORY_CAPACITY,
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_rejects_huge_history() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"history_capacity": {}}}"#, u64::MAX).unwrap();
        assert!(matches!(
            ChainConfig::load(file.path()),
            Err(HashletError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_empty_salt_is_allowed() {
        let config = ChainConfig { salt: String::new(), ..Default::default() };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_partial_json() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"salt": "pepper", "interval_ms": 10}}"#).unwrap();

        let config = ChainConfig::load(file.path()).unwrap();
        assert_eq!(config.salt, "pepper");
        assert_eq!(config.interval_ms, 10);
        assert_eq!(config.initial_nonce, DEFAULT_INITIAL_NONCE);
        assert_eq!(config.history_capacity, DEFAULT_HISTORY_CAPACITY);
    }

    #[test]
    fn test_load_rejects_invalid() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"history_capacity": 0}}"#).unwrap();
        assert!(matches!(
            ChainConfig::load(file.path()),
            Err(HashletError::InvalidConfig(_))
        ));

        let mut garbage = tempfile::NamedTempFile::new().unwrap();
        write!(garbage, "not json").unwrap();
        assert!(matches!(ChainConfig::load(garbage.path()), Err(HashletError::Json(_))));
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let result = ChainConfig::load(dir.path().join("absent.json"));
        assert!(matches!(result, Err(HashletError::Io(_))));
    }
}
