//! Settings error types.

use thiserror::Error;

/// Errors that can occur when loading or validating settings.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// A configuration source could not be read or extracted.
    #[error("failed to load settings: {0}")]
    Extract(#[from] Box<figment::Error>),
    /// The `.env` file exists but could not be parsed.
    #[error("failed to load .env file: {0}")]
    Dotenv(#[from] dotenvy::Error),
    /// `DOMAIN_NAME` was not provided (or is blank).
    #[error("DOMAIN_NAME must be set (environment or .env)")]
    MissingDomainName,
    /// A settings value was invalid (e.g., out of range).
    #[error("invalid settings value: {0}")]
    InvalidValue(String),
}

impl From<figment::Error> for SettingsError {
    fn from(err: figment::Error) -> Self {
        Self::Extract(Box::new(err))
    }
}

/// Result type for settings operations.
pub type Result<T> = std::result::Result<T, SettingsError>;
