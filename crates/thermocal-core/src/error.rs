use thiserror::Error;

/// Top-level error type for thermocal.
///
/// Subsystem crates define their own error enums and wrap this type with
/// `#[from]` so that `?` works across crate boundaries.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ThermocalError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(String),

    /// A persisted value could not be mapped back onto a closed enum.
    #[error("Data integrity error: {0}")]
    DataIntegrity(String),

    #[error("Invalid state transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<toml::de::Error> for ThermocalError {
    fn from(err: toml::de::Error) -> Self {
        ThermocalError::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for ThermocalError {
    fn from(err: toml::ser::Error) -> Self {
        ThermocalError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for ThermocalError {
    fn from(err: serde_json::Error) -> Self {
        ThermocalError::Serialization(err.to_string())
    }
}

/// A specialized `Result` type for thermocal operations.
pub type Result<T> = std::result::Result<T, ThermocalError>;
