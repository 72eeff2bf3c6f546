//! Ledger engine configuration.

use std::time::Duration;

/// Main ledger configuration.
#[derive(Debug, Clone)]
pub struct LedgerConfig {
    /// Deadline for acquiring every lock an operation needs.
    pub lock_timeout: Duration,
    /// History page size when the caller gives none.
    pub history_default_limit: usize,
    /// Largest history page a caller may request.
    pub history_max_limit: usize,
    /// Maximum length of a transaction reference.
    pub max_reference_len: usize,
    /// Prune idle lock entries once the lock table grows past this.
    pub lock_prune_threshold: usize,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            lock_timeout: Duration::from_secs(5),
            history_default_limit: 50,
            history_max_limit: 100,
            max_reference_len: 140,
            lock_prune_threshold: 10_000,
        }
    }
}

impl LedgerConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(ms) = std::env::var("LEDGER_LOCK_TIMEOUT_MS") {
            if let Ok(ms) = ms.parse() {
                config.lock_timeout = Duration::from_millis(ms);
            }
        }

        if let Ok(limit) = std::env::var("LEDGER_HISTORY_DEFAULT_LIMIT") {
            if let Ok(limit) = limit.parse() {
                config.history_default_limit = limit;
            }
        }

        if let Ok(limit) = std::env::var("LEDGER_HISTORY_MAX_LIMIT") {
            if let Ok(limit) = limit.parse() {
                config.history_max_limit = limit;
            }
        }

        if let Ok(len) = std::env::var("LEDGER_MAX_REFERENCE_LEN") {
            if let Ok(len) = len.parse() {
                config.max_reference_len = len;
            }
        }

        if let Ok(threshold) = std::env::var("LEDGER_LOCK_PRUNE_THRESHOLD") {
            if let Ok(threshold) = threshold.parse() {
                config.lock_prune_threshold = threshold;
            }
        }

        config
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.lock_timeout.is_zero() {
            return Err("Lock timeout cannot be 0".to_string());
        }

        if self.history_max_limit == 0 {
            return Err("History max limit cannot be 0".to_string());
        }

        if self.history_default_limit == 0 {
            return Err("History default limit cannot be 0".to_string());
        }

        if self.history_default_limit > self.history_max_limit {
            return Err("History default limit cannot exceed max limit".to_string());
        }

        if self.max_reference_len == 0 {
            return Err("Max reference length cannot be 0".to_string());
        }

        Ok(())
    }

    /// Clamp a requested history page size to the configured bounds.
    pub fn history_limit(&self, requested: Option<usize>) -> usize {
        requested
            .unwrap_or(self.history_default_limit)
            .min(self.history_max_limit)
            .max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = LedgerConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_config() {
        let mut config = LedgerConfig::default();
        config.history_default_limit = config.history_max_limit + 1;
        assert!(config.validate().is_err());

        let mut config = LedgerConfig::default();
        config.lock_timeout = Duration::ZERO;
        assert!(config.validate().is_err());

        let config = LedgerConfig {
            history_max_limit: 0,
            history_default_limit: 0,
            ..LedgerConfig::default()
        };
        assert_eq!(
            config.validate(),
            Err("History max limit cannot be 0".to_string())
        );
    }

    #[test]
    fn test_history_limit_with_zero_max() {
        let config = LedgerConfig {
            history_max_limit: 0,
            ..LedgerConfig::default()
        };
        assert_eq!(config.history_limit(None), 1);
        assert_eq!(config.history_limit(Some(10)), 1);
    }

    #[test]
    fn test_history_limit_clamped() {
        let config = LedgerConfig::default();
        assert_eq!(config.history_limit(None), 50);
        assert_eq!(config.history_limit(Some(500)), 100);
        assert_eq!(config.history_limit(Some(0)), 1);
        assert_eq!(config.history_limit(Some(20)), 20);
    }
}
