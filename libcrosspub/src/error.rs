//! Error types for Crosspub

use thiserror::Error;

pub type Result<T> = std::result::Result<T, CrosspubError>;

#[derive(Error, Debug)]
pub enum CrosspubError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DbError),

    #[error("Vault error: {0}")]
    Vault(#[from] VaultError),

    #[error("Adapter error: {0}")]
    Adapter(#[from] AdapterError),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl CrosspubError {
    /// Returns the appropriate exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            CrosspubError::InvalidInput(_) => 3,
            CrosspubError::Vault(_) => 2,
            CrosspubError::Adapter(_) => 1,
            CrosspubError::Config(_) => 1,
            CrosspubError::Database(_) => 1,
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Missing required field: {0}")]
    MissingField(String),
}

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Database operation failed: {0}")]
    SqlxError(#[from] sqlx::Error),

    #[error("Migration failed: {0}")]
    MigrationError(#[from] sqlx::migrate::MigrateError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Failures of the credential vault.
///
/// `MissingMasterKey` is fatal at startup in production deployments.
/// `Unrecognized` and `Unauthentic` only occur outside migration mode, where
/// the graceful decrypt fallbacks are disabled.
#[derive(Error, Debug, Clone)]
pub enum VaultError {
    #[error("No master encryption secret configured for a production deployment")]
    MissingMasterKey,

    #[error("Stored credential is not a recognized envelope: {0}")]
    Unrecognized(String),

    #[error("Envelope failed authentication: {0}")]
    Unauthentic(String),

    #[error("Encryption failed: {0}")]
    Crypto(String),
}

/// Per-channel failures surfaced while dispatching or refreshing.
///
/// These map one-to-one onto recorded outcomes: `Precondition` and `Provider`
/// become failed publish result rows, `Refresh` becomes a failure audit row.
#[derive(Error, Debug, Clone)]
pub enum AdapterError {
    #[error("Precondition failed: {0}")]
    Precondition(String),

    #[error("Provider rejected publish: {0}")]
    Provider(String),

    #[error("Credential refresh failed: {0}")]
    Refresh(String),

    #[error("No adapter registered for platform: {0}")]
    NotRegistered(String),
}
