//! Bearer-token capability consumed by the calendar and device clients.
//!
//! The OAuth consent flow itself happens outside thermocal; clients only need
//! a current access token and a way to force a refresh after a 401.

use async_trait::async_trait;

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Token not found at {0}")]
    TokenNotFound(String),
    #[error("Token expired and cannot be refreshed")]
    Expired,
    #[error("Token refresh failed: {0}")]
    RefreshFailed(String),
    #[error("Token storage error: {0}")]
    Storage(String),
}

#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// Current access token, refreshed first if the stored one has expired.
    async fn access_token(&self) -> Result<String, AuthError>;

    /// Force a refresh regardless of the stored expiry.
    async fn refresh(&self) -> Result<String, AuthError>;
}

/// Fixed token, for tests and for tokens minted outside the process.
#[derive(Debug, Clone)]
pub struct StaticToken(pub String);

#[async_trait]
impl TokenProvider for StaticToken {
    async fn access_token(&self) -> Result<String, AuthError> {
        Ok(self.0.clone())
    }

    async fn refresh(&self) -> Result<String, AuthError> {
        Ok(self.0.clone())
    }
}
