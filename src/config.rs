//! Configuration for the history store

use serde::{Deserialize, Serialize};

/// Default number of most-recent ledger sequences to retain.
pub const DEFAULT_HISTORY_WINDOW: u32 = 256;

/// Default number of ledgers evicted per save; bounds `save_validated_ledger`
/// latency regardless of backlog.
pub const DEFAULT_EVICTION_BATCH: usize = 128;

/// Concurrency strategy, fixed at construction time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// One reader/writer lock over ordered maps; linearizable across indexes
    CoarseLock,
    /// Independent concurrent maps per index; eventual cross-index consistency
    LockFree,
}

/// History store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Ledger sequences guaranteed retained behind the newest current ledger
    pub history_window: u32,

    /// Maximum ledgers evicted per current-ledger save
    pub eviction_batch: usize,

    /// Concurrency strategy
    pub strategy: Strategy,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            history_window: DEFAULT_HISTORY_WINDOW,
            eviction_batch: DEFAULT_EVICTION_BATCH,
            strategy: Strategy::CoarseLock,
        }
    }
}

impl StoreConfig {
    /// Load from file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: StoreConfig = toml::from_str(&content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from environment variables
    pub fn from_env() -> crate::Result<Self> {
        let mut config = StoreConfig::default();

        if let Ok(window) = std::env::var("LEDGER_HISTORY_WINDOW") {
            config.history_window = window
                .parse()
                .map_err(|e| crate::Error::Config(format!("LEDGER_HISTORY_WINDOW: {}", e)))?;
        }

        if let Ok(batch) = std::env::var("LEDGER_EVICTION_BATCH") {
            config.eviction_batch = batch
                .parse()
                .map_err(|e| crate::Error::Config(format!("LEDGER_EVICTION_BATCH: {}", e)))?;
        }

        if let Ok(strategy) = std::env::var("LEDGER_STORE_STRATEGY") {
            config.strategy = match strategy.as_str() {
                "coarse_lock" => Strategy::CoarseLock,
                "lock_free" => Strategy::LockFree,
                other => {
                    return Err(crate::Error::Config(format!(
                        "LEDGER_STORE_STRATEGY: unknown strategy {:?}",
                        other
                    )))
                }
            };
        }

        config.validate()?;
        Ok(config)
    }

    /// Check configuration invariants
    pub fn validate(&self) -> crate::Result<()> {
        if self.eviction_batch == 0 {
            return Err(crate::Error::Config(
                "eviction_batch must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = StoreConfig::default();
        assert_eq!(config.history_window, DEFAULT_HISTORY_WINDOW);
        assert_eq!(config.eviction_batch, DEFAULT_EVICTION_BATCH);
        assert_eq!(config.strategy, Strategy::CoarseLock);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "history_window = 5\neviction_batch = 2\nstrategy = \"lock_free\""
        )
        .unwrap();

        let config = StoreConfig::from_file(file.path()).unwrap();
        assert_eq!(config.history_window, 5);
        assert_eq!(config.eviction_batch, 2);
        assert_eq!(config.strategy, Strategy::LockFree);
    }

    #[test]
    fn test_zero_batch_rejected() {
        let config = StoreConfig {
            eviction_batch: 0,
            ..StoreConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
