//! Authenticated client for the device-management API.
//!
//! Every call carries a bearer token, follows a single 307, refreshes the
//! token and retries once on 401, and then waits out the request interval so
//! consecutive calls stay under the API's rate limit.

use std::sync::Arc;
use std::time::Duration;

use reqwest::Method;
use serde_json::{json, Value};
use tracing::{debug, warn};

use thermocal_core::config::DeviceConfig;
use thermocal_core::{Clock, TokenProvider};

use crate::commands::DeviceCommand;
use crate::error::DeviceError;
use crate::transport::{HttpRequest, HttpResponse, Transport};

pub struct DeviceClient {
    transport: Arc<dyn Transport>,
    tokens: Arc<dyn TokenProvider>,
    clock: Arc<dyn Clock>,
    base_url: String,
    request_interval: Duration,
}

impl DeviceClient {
    pub fn new(
        config: &DeviceConfig,
        transport: Arc<dyn Transport>,
        tokens: Arc<dyn TokenProvider>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            transport,
            tokens,
            clock,
            base_url: config.enterprise_url(),
            request_interval: Duration::from_millis(config.request_interval_ms),
        }
    }

    /// Issue one API call and return its JSON body.
    ///
    /// `path` is relative to the enterprise URL (e.g. `/devices`).
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        payload: Option<Value>,
    ) -> Result<Value, DeviceError> {
        let url = format!("{}{}", self.base_url, path);
        let mut token = self.tokens.access_token().await?;
        let mut refreshed = false;

        let response = loop {
            let request = HttpRequest {
                method: method.clone(),
                url: url.clone(),
                bearer: token.clone(),
                body: payload.clone(),
            };
            let response = self.send_following_redirect(request).await?;

            if response.status == 401 && !refreshed {
                warn!(%url, "Device API returned 401, refreshing token");
                token = self.tokens.refresh().await?;
                refreshed = true;
                continue;
            }
            break response;
        };

        let value = match response.status {
            401 => return Err(DeviceError::Unauthorized(response.body)),
            429 => return Err(DeviceError::RateLimitExceeded(response.body)),
            _ if !response.is_success() => {
                return Err(DeviceError::Api {
                    status: response.status,
                    body: response.body,
                })
            }
            _ if response.body.trim().is_empty() => json!({}),
            _ => serde_json::from_str(&response.body)
                .map_err(|e| DeviceError::Malformed(format!("{}: {}", url, e)))?,
        };

        self.clock.sleep(self.request_interval).await;
        Ok(value)
    }

    /// Send once; on a 307 re-issue the identical request to `Location`.
    /// A redirect from the second hop is returned as-is.
    async fn send_following_redirect(
        &self,
        mut request: HttpRequest,
    ) -> Result<HttpResponse, DeviceError> {
        let response = self.transport.send(&request).await?;
        if response.status != 307 {
            return Ok(response);
        }

        let location = response.location.ok_or(DeviceError::Redirect)?;
        debug!(from = %request.url, to = %location, "Following device API redirect");
        request.url = location;
        self.transport.send(&request).await
    }

    pub async fn devices(&self) -> Result<Value, DeviceError> {
        self.request(Method::GET, "/devices", None).await
    }

    pub async fn structures(&self) -> Result<Value, DeviceError> {
        self.request(Method::GET, "/structures", None).await
    }

    pub async fn structure(&self, id: &str) -> Result<Value, DeviceError> {
        self.request(Method::GET, &format!("/structures/{}", id), None)
            .await
    }

    pub async fn execute_command(&self, command: &DeviceCommand) -> Result<Value, DeviceError> {
        let path = format!("{}:executeCommand", device_path(&command.device_name));
        self.request(Method::POST, &path, Some(command.envelope()))
            .await
    }
}

/// `enterprises/P/devices/D` -> `/devices/D`.
fn device_path(device_name: &str) -> String {
    match device_name.find("devices/") {
        Some(idx) => format!("/{}", &device_name[idx..]),
        None => format!("/devices/{}", device_name),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::scripted::ScriptedTransport;
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use thermocal_core::{AuthError, ManualClock};
    use thermocal_core::types::EcoMode;

    /// Hands out `token-N`, bumping N on every refresh.
    #[derive(Default)]
    struct CountingTokens {
        refreshes: AtomicUsize,
    }

    #[async_trait]
    impl TokenProvider for CountingTokens {
        async fn access_token(&self) -> Result<String, AuthError> {
            Ok(format!("token-{}", self.refreshes.load(Ordering::SeqCst)))
        }

        async fn refresh(&self) -> Result<String, AuthError> {
            let n = self.refreshes.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(format!("token-{}", n))
        }
    }

    struct Fixture {
        transport: Arc<ScriptedTransport>,
        tokens: Arc<CountingTokens>,
        clock: Arc<ManualClock>,
        client: DeviceClient,
    }

    fn fixture() -> Fixture {
        let config = DeviceConfig {
            project_id: "proj".into(),
            api_base: "https://sdm.test/v1".into(),
            request_interval_ms: 2000,
            ..DeviceConfig::default()
        };
        let transport = Arc::new(ScriptedTransport::new());
        let tokens = Arc::new(CountingTokens::default());
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 1, 10, 12, 0, 0).unwrap(),
        ));
        let client = DeviceClient::new(&config, transport.clone(), tokens.clone(), clock.clone());
        Fixture {
            transport,
            tokens,
            clock,
            client,
        }
    }

    // =====================================================================
    // Success paths
    // =====================================================================

    #[tokio::test]
    async fn test_success_attaches_bearer_and_waits() {
        let fx = fixture();
        fx.transport.push(200, r#"{"devices": []}"#);

        let body = fx.client.devices().await.unwrap();
        assert_eq!(body, json!({"devices": []}));

        let requests = fx.transport.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].url, "https://sdm.test/v1/enterprises/proj/devices");
        assert_eq!(requests[0].bearer, "token-0");
        assert_eq!(fx.clock.sleeps(), vec![Duration::from_millis(2000)]);
    }

    #[tokio::test]
    async fn test_empty_body_is_empty_object() {
        let fx = fixture();
        fx.transport.push(200, "");
        assert_eq!(fx.client.structures().await.unwrap(), json!({}));
    }

    #[tokio::test]
    async fn test_structure_by_id() {
        let fx = fixture();
        fx.transport.push(200, r#"{"name": "enterprises/proj/structures/s1"}"#);

        let body = fx.client.structure("s1").await.unwrap();
        assert_eq!(body["name"], "enterprises/proj/structures/s1");
        assert_eq!(
            fx.transport.requests()[0].url,
            "https://sdm.test/v1/enterprises/proj/structures/s1"
        );
    }

    // =====================================================================
    // Auth and status errors
    // =====================================================================

    #[tokio::test]
    async fn test_401_then_200_retries_once_with_fresh_token() {
        let fx = fixture();
        fx.transport.push(401, "expired").push(200, "{}");

        fx.client.devices().await.unwrap();

        let requests = fx.transport.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].bearer, "token-0");
        assert_eq!(requests[1].bearer, "token-1");
        assert_eq!(fx.tokens.refreshes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_401_twice_is_unauthorized() {
        let fx = fixture();
        fx.transport.push(401, "expired").push(401, "still expired");

        let err = fx.client.devices().await.unwrap_err();
        assert!(matches!(err, DeviceError::Unauthorized(ref body) if body == "still expired"));
        assert_eq!(fx.transport.requests().len(), 2);
        assert_eq!(fx.tokens.refreshes.load(Ordering::SeqCst), 1);
        assert!(fx.clock.sleeps().is_empty());
    }

    #[tokio::test]
    async fn test_429_is_not_retried() {
        let fx = fixture();
        fx.transport.push(429, "quota");

        let err = fx.client.devices().await.unwrap_err();
        assert!(matches!(err, DeviceError::RateLimitExceeded(_)));
        assert_eq!(fx.transport.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_4xx_is_api_error() {
        let fx = fixture();
        fx.transport.push(400, "bad command");

        let err = fx.client.devices().await.unwrap_err();
        match err {
            DeviceError::Api { status, body } => {
                assert_eq!(status, 400);
                assert_eq!(body, "bad command");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    // =====================================================================
    // Redirects
    // =====================================================================

    #[tokio::test]
    async fn test_307_is_followed_once_with_same_request() {
        let fx = fixture();
        let command = DeviceCommand::set_eco("enterprises/proj/devices/d1", "Hall", EcoMode::Off);
        fx.transport
            .push_redirect("https://sdm-alt.test/v1/enterprises/proj/devices/d1:executeCommand")
            .push(200, "{}");

        fx.client.execute_command(&command).await.unwrap();

        let requests = fx.transport.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(
            requests[0].url,
            "https://sdm.test/v1/enterprises/proj/devices/d1:executeCommand"
        );
        assert_eq!(
            requests[1].url,
            "https://sdm-alt.test/v1/enterprises/proj/devices/d1:executeCommand"
        );
        assert_eq!(requests[1].method, Method::POST);
        assert_eq!(requests[1].body, Some(command.envelope()));
    }

    #[tokio::test]
    async fn test_second_redirect_is_not_followed() {
        let fx = fixture();
        fx.transport
            .push_redirect("https://a.test/devices")
            .push_redirect("https://b.test/devices");

        let err = fx.client.devices().await.unwrap_err();
        assert!(matches!(err, DeviceError::Api { status: 307, .. }));
        assert_eq!(fx.transport.requests().len(), 2);
    }

    #[tokio::test]
    async fn test_redirect_without_location() {
        let fx = fixture();
        fx.transport.push(307, "");

        let err = fx.client.devices().await.unwrap_err();
        assert!(matches!(err, DeviceError::Redirect));
    }

    // =====================================================================
    // Response bodies
    // =====================================================================

    #[tokio::test]
    async fn test_invalid_json_is_malformed() {
        let fx = fixture();
        fx.transport.push(200, "<html>");
        let err = fx.client.devices().await.unwrap_err();
        assert!(matches!(err, DeviceError::Malformed(_)));
    }

    #[test]
    fn test_device_path() {
        assert_eq!(device_path("enterprises/p/devices/abc"), "/devices/abc");
        assert_eq!(device_path("abc"), "/devices/abc");
    }
}
