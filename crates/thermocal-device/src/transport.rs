//! HTTP transport seam for the device client.
//!
//! Redirects are never followed here; the client decides what a 307 means.

use async_trait::async_trait;
use reqwest::Method;
use serde_json::Value;

use crate::error::DeviceError;

#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub bearer: String,
    pub body: Option<Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    pub status: u16,
    /// `Location` header, when present.
    pub location: Option<String>,
    pub body: String,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: &HttpRequest) -> Result<HttpResponse, DeviceError>;
}

/// Production transport backed by a `reqwest::Client`.
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new() -> Result<Self, DeviceError> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .timeout(std::time::Duration::from_secs(30))
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: &HttpRequest) -> Result<HttpResponse, DeviceError> {
        let mut builder = self
            .client
            .request(request.method.clone(), &request.url)
            .bearer_auth(&request.bearer);
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let location = response
            .headers()
            .get(reqwest::header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response.text().await?;

        Ok(HttpResponse {
            status,
            location,
            body,
        })
    }
}

/// Replays canned responses in order and records every request.
#[cfg(test)]
pub(crate) mod scripted {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use super::*;

    #[derive(Default)]
    pub struct ScriptedTransport {
        responses: Mutex<VecDeque<HttpResponse>>,
        requests: Mutex<Vec<HttpRequest>>,
    }

    impl ScriptedTransport {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn push(&self, status: u16, body: &str) -> &Self {
            self.push_response(HttpResponse {
                status,
                location: None,
                body: body.to_string(),
            })
        }

        pub fn push_redirect(&self, location: &str) -> &Self {
            self.push_response(HttpResponse {
                status: 307,
                location: Some(location.to_string()),
                body: String::new(),
            })
        }

        pub fn push_response(&self, response: HttpResponse) -> &Self {
            self.responses.lock().unwrap().push_back(response);
            self
        }

        pub fn requests(&self) -> Vec<HttpRequest> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn send(&self, request: &HttpRequest) -> Result<HttpResponse, DeviceError> {
            self.requests.lock().unwrap().push(request.clone());
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| DeviceError::Transport("script exhausted".into()))
        }
    }
}
