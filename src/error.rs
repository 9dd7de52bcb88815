//! Error types for configuration, exchange access and ledger bookkeeping

use thiserror::Error;

/// Configuration problems. Always fatal before the first tick.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Unknown strategy: '{name}'. Available: {available}")]
    UnknownStrategy { name: String, available: String },

    #[error("Unknown preset: '{name}'. Available: {available}")]
    UnknownPreset { name: String, available: String },

    #[error("Invalid value for {field}: {reason}")]
    Invalid { field: String, reason: String },

    #[error("Invalid override '{0}', expected section.key=value")]
    MalformedOverride(String),

    #[error("Missing credential: {0}")]
    MissingCredential(&'static str),
}

impl ConfigError {
    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Failures talking to the market data source or order gateway
#[derive(Debug, Error)]
pub enum ExchangeError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error {status}: {body}")]
    Api { status: u16, body: String },

    #[error("Failed to parse response: {0}")]
    Parse(String),

    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Unsupported operation: {0}")]
    Unsupported(String),
}

/// Inconsistent ledger state. Logged and skipped by the loop.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Position index {index} does not exist ({open} open)")]
    PositionNotFound { index: usize, open: usize },
}
