//! Device subsystem errors.

use thermocal_core::{AuthError, ThermocalError};

#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    /// A 401 survived one token refresh and retry.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Rate limit exceeded: {0}")]
    RateLimitExceeded(String),

    #[error("API error {status}: {body}")]
    Api { status: u16, body: String },

    #[error("Redirect without Location header")]
    Redirect,

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Malformed response: {0}")]
    Malformed(String),

    #[error("Topology error: {0}")]
    Topology(String),

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Core(#[from] ThermocalError),
}

impl DeviceError {
    /// Errors that make any further device call in this cycle pointless.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            DeviceError::Unauthorized(_)
                | DeviceError::RateLimitExceeded(_)
                | DeviceError::Transport(_)
                | DeviceError::Auth(_)
                | DeviceError::Core(_)
        )
    }
}

impl From<reqwest::Error> for DeviceError {
    fn from(e: reqwest::Error) -> Self {
        DeviceError::Transport(e.to_string())
    }
}
