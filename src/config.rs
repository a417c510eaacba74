//! Operator configuration for trail runs.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::detector::DEFAULT_CORROBORATION_BONUS;
use crate::error::{ConfigError, ValidationError};
use crate::resolver::DEFAULT_NAME_THRESHOLD;

/// Absolute maximum number of searches per run, whatever the configuration says.
pub const HARD_SEARCH_CEILING: u32 = 100;

/// Tunables for a `TrailFollower`.
///
/// Every field has a default, so a TOML file only needs the keys it changes:
///
/// ```
/// use kintrail::TrailConfig;
///
/// let config = TrailConfig::from_toml_str("workers = 2\nsearch_ceiling = 500").unwrap();
/// assert_eq!(config.workers, 2);
/// assert_eq!(config.effective_search_ceiling(), 100);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrailConfig {
    /// Search worker threads.
    pub workers: usize,
    /// Maximum queued searches.
    pub queue_capacity: usize,
    /// Deadline for one search, counted from dispatch.
    pub search_timeout_ms: u64,
    /// Searches per run including the seed. Clamped to `HARD_SEARCH_CEILING`.
    pub search_ceiling: u32,
    /// Minimum name similarity for merges and seed subject matching.
    pub name_threshold: f32,
    /// Strength added per corroborating indicator.
    pub corroboration_bonus: f32,
}

impl Default for TrailConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            queue_capacity: 64,
            search_timeout_ms: 10_000,
            search_ceiling: 40,
            name_threshold: DEFAULT_NAME_THRESHOLD,
            corroboration_bonus: DEFAULT_CORROBORATION_BONUS,
        }
    }
}

impl TrailConfig {
    /// Parses and validates a TOML document.
    ///
    /// # Errors
    ///
    /// `ConfigError::Parse` for malformed TOML, `ConfigError::Invalid` for
    /// out-of-range values.
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(input)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a TOML file.
    ///
    /// # Errors
    ///
    /// `ConfigError::Io` if the file cannot be read, otherwise as `from_toml_str`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    /// Checks value ranges.
    ///
    /// # Errors
    ///
    /// Returns the first out-of-range value found.
    pub fn validate(&self) -> Result<(), ValidationError> {
        for (field, value) in [
            ("name_threshold", self.name_threshold),
            ("corroboration_bonus", self.corroboration_bonus),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ValidationError::ThresholdOutOfRange {
                    field: field.to_string(),
                    value,
                });
            }
        }
        if self.workers == 0 {
            return Err(ValidationError::InvalidConfig {
                reason: "workers must be at least 1".to_string(),
            });
        }
        if self.queue_capacity == 0 {
            return Err(ValidationError::InvalidConfig {
                reason: "queue_capacity must be at least 1".to_string(),
            });
        }
        if self.search_timeout_ms == 0 {
            return Err(ValidationError::InvalidConfig {
                reason: "search_timeout_ms must be positive".to_string(),
            });
        }
        if self.search_ceiling == 0 {
            return Err(ValidationError::InvalidConfig {
                reason: "search_ceiling must allow the seed search".to_string(),
            });
        }
        Ok(())
    }

    /// The search ceiling actually enforced.
    #[must_use]
    pub fn effective_search_ceiling(&self) -> u32 {
        self.search_ceiling.clamp(1, HARD_SEARCH_CEILING)
    }

    #[must_use]
    pub const fn search_timeout(&self) -> Duration {
        Duration::from_millis(self.search_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = TrailConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.effective_search_ceiling(), 40);
        assert_eq!(config.search_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = TrailConfig::from_toml_str("name_threshold = 0.85").unwrap();
        assert_eq!(config.name_threshold, 0.85);
        assert_eq!(config.workers, 4);
        assert_eq!(config.queue_capacity, 64);
    }

    #[test]
    fn test_out_of_range_threshold_rejected() {
        let err = TrailConfig::from_toml_str("name_threshold = 1.5").unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid(ValidationError::ThresholdOutOfRange { .. })
        ));
    }

    #[test]
    fn test_zero_workers_rejected() {
        let err = TrailConfig::from_toml_str("workers = 0").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(ValidationError::InvalidConfig { .. })));
    }

    #[test]
    fn test_malformed_toml() {
        let err = TrailConfig::from_toml_str("workers = [").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_missing_file() {
        let err = TrailConfig::load("/nonexistent/kintrail.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
