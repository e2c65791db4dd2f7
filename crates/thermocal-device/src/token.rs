//! OAuth token file provider.
//!
//! Reads an authorized-user token JSON (the format written by Google's
//! client libraries), refreshes it through the token endpoint when it is
//! about to expire, and writes the refreshed token back to the same file.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::info;

use thermocal_core::{AuthError, TokenProvider};

/// Refresh this long before the recorded expiry.
const EXPIRY_MARGIN_SECS: i64 = 60;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredToken {
    #[serde(alias = "access_token")]
    pub token: String,
    pub refresh_token: Option<String>,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
    pub client_id: String,
    #[serde(default)]
    pub client_secret: Option<String>,
    #[serde(default)]
    pub scopes: Vec<String>,
    /// RFC 3339 expiry.
    #[serde(default)]
    pub expiry: Option<String>,
}

fn default_token_uri() -> String {
    "https://oauth2.googleapis.com/token".to_string()
}

impl StoredToken {
    /// A token with no parseable expiry counts as expired.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match self
            .expiry
            .as_deref()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        {
            Some(expiry) => expiry <= now + Duration::seconds(EXPIRY_MARGIN_SECS),
            None => true,
        }
    }
}

pub struct FileTokenProvider {
    path: PathBuf,
    http: reqwest::Client,
    cached: Mutex<Option<StoredToken>>,
}

impl FileTokenProvider {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            http: reqwest::Client::new(),
            cached: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<StoredToken, AuthError> {
        if !self.path.exists() {
            return Err(AuthError::TokenNotFound(self.path.display().to_string()));
        }
        let content = std::fs::read_to_string(&self.path)
            .map_err(|e| AuthError::Storage(format!("{}: {}", self.path.display(), e)))?;
        serde_json::from_str(&content)
            .map_err(|e| AuthError::Storage(format!("{}: {}", self.path.display(), e)))
    }

    fn save(&self, token: &StoredToken) -> Result<(), AuthError> {
        let storage = |e: std::io::Error| AuthError::Storage(e.to_string());

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(storage)?;
        }
        let content =
            serde_json::to_string_pretty(token).map_err(|e| AuthError::Storage(e.to_string()))?;
        std::fs::write(&self.path, content).map_err(storage)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&self.path, std::fs::Permissions::from_mode(0o600))
                .map_err(storage)?;
        }
        Ok(())
    }

    async fn exchange(&self, token: &StoredToken) -> Result<StoredToken, AuthError> {
        let refresh_token = token.refresh_token.as_deref().ok_or(AuthError::Expired)?;

        let mut form = vec![
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", token.client_id.as_str()),
        ];
        if let Some(secret) = token.client_secret.as_deref() {
            form.push(("client_secret", secret));
        }

        let response = self
            .http
            .post(&token.token_uri)
            .form(&form)
            .send()
            .await
            .map_err(|e| AuthError::RefreshFailed(e.to_string()))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| AuthError::RefreshFailed(e.to_string()))?;
        if !status.is_success() {
            return Err(AuthError::RefreshFailed(format!("HTTP {}: {}", status, body)));
        }

        apply_refresh_response(token, &body, Utc::now())
    }

    async fn refresh_locked(
        &self,
        cached: &mut Option<StoredToken>,
    ) -> Result<String, AuthError> {
        let current = match cached.take() {
            Some(token) => token,
            None => self.load()?,
        };
        let refreshed = self.exchange(&current).await?;
        self.save(&refreshed)?;
        info!(path = %self.path.display(), "Access token refreshed");

        let access = refreshed.token.clone();
        *cached = Some(refreshed);
        Ok(access)
    }
}

/// Merge a token endpoint response into the stored token.
fn apply_refresh_response(
    token: &StoredToken,
    body: &str,
    now: DateTime<Utc>,
) -> Result<StoredToken, AuthError> {
    let value: serde_json::Value =
        serde_json::from_str(body).map_err(|e| AuthError::RefreshFailed(e.to_string()))?;
    let access = value["access_token"]
        .as_str()
        .ok_or_else(|| AuthError::RefreshFailed("No access_token in response".into()))?;
    let expires_in = value["expires_in"].as_i64().unwrap_or(3600);

    let mut refreshed = token.clone();
    refreshed.token = access.to_string();
    refreshed.expiry = Some((now + Duration::seconds(expires_in)).to_rfc3339());
    if let Some(rotated) = value["refresh_token"].as_str() {
        refreshed.refresh_token = Some(rotated.to_string());
    }
    Ok(refreshed)
}

#[async_trait]
impl TokenProvider for FileTokenProvider {
    async fn access_token(&self) -> Result<String, AuthError> {
        let mut cached = self.cached.lock().await;
        if cached.is_none() {
            *cached = Some(self.load()?);
        }
        if let Some(token) = cached.as_ref() {
            if !token.is_expired(Utc::now()) {
                return Ok(token.token.clone());
            }
        }
        self.refresh_locked(&mut cached).await
    }

    async fn refresh(&self) -> Result<String, AuthError> {
        let mut cached = self.cached.lock().await;
        self.refresh_locked(&mut cached).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn token(expiry: Option<&str>) -> StoredToken {
        StoredToken {
            token: "access".into(),
            refresh_token: Some("refresh".into()),
            token_uri: default_token_uri(),
            client_id: "client".into(),
            client_secret: None,
            scopes: vec![],
            expiry: expiry.map(str::to_string),
        }
    }

    // =====================================================================
    // Token state
    // =====================================================================

    #[test]
    fn test_expiry_margin() {
        let now = Utc.with_ymd_and_hms(2024, 1, 10, 12, 0, 0).unwrap();
        assert!(!token(Some("2024-01-10T12:05:00Z")).is_expired(now));
        assert!(token(Some("2024-01-10T12:00:30Z")).is_expired(now));
        assert!(token(Some("garbage")).is_expired(now));
        assert!(token(None).is_expired(now));
    }

    #[test]
    fn test_apply_refresh_response() {
        let now = Utc.with_ymd_and_hms(2024, 1, 10, 12, 0, 0).unwrap();
        let refreshed = apply_refresh_response(
            &token(None),
            r#"{"access_token": "new", "expires_in": 1800}"#,
            now,
        )
        .unwrap();
        assert_eq!(refreshed.token, "new");
        assert_eq!(refreshed.refresh_token.as_deref(), Some("refresh"));
        assert!(!refreshed.is_expired(now));
        assert!(refreshed.is_expired(now + Duration::minutes(30)));

        assert!(apply_refresh_response(&token(None), "{}", now).is_err());
    }

    // =====================================================================
    // Provider
    // =====================================================================

    #[tokio::test]
    async fn test_reads_valid_token_without_refresh() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("token.json");
        let expiry = (Utc::now() + Duration::hours(1)).to_rfc3339();
        std::fs::write(
            &path,
            format!(
                r#"{{"token": "abc", "refresh_token": "r", "client_id": "c", "expiry": "{}"}}"#,
                expiry
            ),
        )
        .unwrap();

        let provider = FileTokenProvider::new(&path);
        assert_eq!(provider.access_token().await.unwrap(), "abc");
    }

    #[tokio::test]
    async fn test_missing_file() {
        let tmp = tempfile::tempdir().unwrap();
        let provider = FileTokenProvider::new(tmp.path().join("absent.json"));
        assert!(matches!(
            provider.access_token().await,
            Err(AuthError::TokenNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_expired_without_refresh_token() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("token.json");
        std::fs::write(&path, r#"{"token": "abc", "client_id": "c"}"#).unwrap();

        let provider = FileTokenProvider::new(&path);
        assert!(matches!(
            provider.access_token().await,
            Err(AuthError::Expired)
        ));
    }

    #[cfg(unix)]
    #[test]
    fn test_save_restricts_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("nested").join("token.json");
        let provider = FileTokenProvider::new(&path);
        provider.save(&token(Some("2024-01-10T12:00:00Z"))).unwrap();

        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
        assert_eq!(provider.load().unwrap().token, "access");
    }
}
