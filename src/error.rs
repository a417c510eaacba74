//! Error types for kintrail.
//!
//! All errors are strongly typed using thiserror. Only validation and
//! configuration failures abort a trail run; source failures are recorded
//! in the search trail and the run continues.

use thiserror::Error;

/// Validation errors that occur during input validation.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("Seed query has no identifying field (name, phone or address required)")]
    EmptySeedQuery,

    #[error("Record carries no identifying field (name, phone or address)")]
    EmptyRecord,

    #[error("Required field '{field}' is missing")]
    MissingField {
        field: String,
    },

    #[error("Threshold '{field}' = {value} is out of range [0.0, 1.0]")]
    ThresholdOutOfRange {
        field: String,
        value: f32,
    },

    #[error("Invalid configuration: {reason}")]
    InvalidConfig {
        reason: String,
    },
}

/// Failures reported by a search gateway.
///
/// The trail follower treats every variant as "zero results, continue".
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SourceError {
    #[error("Source unavailable: {message}")]
    SourceUnavailable {
        message: String,
    },

    #[error("Rate limited by source{}", retry_hint(.retry_after_ms))]
    RateLimited {
        retry_after_ms: Option<u64>,
    },

    #[error("Search timed out after {duration_ms}ms")]
    Timeout {
        duration_ms: u64,
    },
}

fn retry_hint(retry_after_ms: &Option<u64>) -> String {
    retry_after_ms
        .map(|ms| format!(" (retry after {ms}ms)"))
        .unwrap_or_default()
}

impl SourceError {
    /// Creates an unavailable-source error.
    #[must_use]
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::SourceUnavailable {
            message: message.into(),
        }
    }

    /// Short snake_case label used in trail entries and logs.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::SourceUnavailable { .. } => "source_unavailable",
            Self::RateLimited { .. } => "rate_limited",
            Self::Timeout { .. } => "timeout",
        }
    }
}

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Config rejected: {0}")]
    Invalid(#[from] ValidationError),
}

/// Top-level error type for kintrail.
#[derive(Debug, Error)]
pub enum TrailError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Internal error: {message}")]
    Internal {
        message: String,
    },
}

impl TrailError {
    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns true if this is a validation error.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Returns true if this is a configuration error.
    #[must_use]
    pub const fn is_config(&self) -> bool {
        matches!(self, Self::Config(_))
    }

    /// Returns true if retrying the same call could succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Validation(_) | Self::Config(_) => false, // Input won't change on retry
            Self::Internal { .. } => false,
        }
    }
}

/// Result type alias for kintrail operations.
pub type TrailResult<T> = Result<T, TrailError>;
