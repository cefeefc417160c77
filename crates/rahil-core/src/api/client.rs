//! API client for communicating with the attendance REST API.
//!
//! `ApiClient::call` is the single entry point: it sends one request,
//! attaches the bearer token when given, and maps the response onto
//! `Ok(body)` or an `ApiError`. Callers decode the body themselves.

use std::time::Duration;

use reqwest::{header, Client};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use super::{ApiError, ApiRequest, RequestBody};

/// Default server for local development
pub const DEFAULT_BASE_URL: &str = "http://localhost:8080";

/// HTTP request timeout in seconds.
/// A timed-out call is reported as a network error.
pub const REQUEST_TIMEOUT_SECS: u64 = 30;

const JSON_CONTENT_TYPE: &str = "application/json";

/// API client for the attendance service.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone, Debug)]
pub struct ApiClient {
    client: Client,
    base_url: String,
}

impl ApiClient {
    /// Create a new API client with the default timeout
    pub fn new(base_url: impl Into<String>) -> Result<Self, ApiError> {
        Self::with_timeout(base_url, Duration::from_secs(REQUEST_TIMEOUT_SECS))
    }

    pub fn with_timeout(base_url: impl Into<String>, timeout: Duration) -> Result<Self, ApiError> {
        let client = Client::builder().timeout(timeout).build()?;
        let base_url = base_url.into().trim_end_matches('/').to_string();

        Ok(Self { client, base_url })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }

    /// Perform one request/response cycle and classify the outcome.
    ///
    /// * 2xx - the raw response body
    /// * 401 - `ApiError::Unauthorized`, regardless of body
    /// * other statuses - `ApiError::Server` with the body's `error` message if any
    /// * no response (DNS, connect, timeout) - `ApiError::Network`
    pub async fn call(&self, request: &ApiRequest, token: Option<&str>) -> Result<Vec<u8>, ApiError> {
        let url = self.url(&request.path);
        let mut builder = self.client.request(request.method.clone(), &url);

        if let Some(token) = token.filter(|t| !t.is_empty()) {
            builder = builder.bearer_auth(token);
        }

        builder = match &request.body {
            RequestBody::Empty => builder.header(header::CONTENT_TYPE, JSON_CONTENT_TYPE),
            RequestBody::Json(value) => builder
                .header(header::CONTENT_TYPE, JSON_CONTENT_TYPE)
                .body(serde_json::to_vec(value)?),
            RequestBody::Multipart(file) => builder.multipart(file.to_form()?),
        };

        let response = builder.send().await.map_err(|e| {
            warn!(method = %request.method, path = %request.path, error = %e, "Request did not reach the server");
            ApiError::Network(e)
        })?;

        let status = response.status();
        debug!(method = %request.method, path = %request.path, status = status.as_u16(), "API response");

        let body = response.bytes().await?;
        if status.is_success() {
            Ok(body.to_vec())
        } else {
            let err = ApiError::from_status(status, &body);
            if !err.is_unauthorized() {
                debug!(
                    path = %request.path,
                    body = %ApiError::truncate_body(&String::from_utf8_lossy(&body)),
                    "Request rejected"
                );
            }
            Err(err)
        }
    }
}

/// Decode a JSON response body into the expected type
pub fn decode<T: DeserializeOwned>(body: &[u8]) -> Result<T, ApiError> {
    Ok(serde_json::from_slice(body)?)
}

/// Extract the uploaded image URL from an upload response.
///
/// Accepts `image_url`, then `imageUrl`, then a URL embedded in a free-text
/// `message` field.
pub fn parse_image_url(body: &[u8]) -> Result<String, ApiError> {
    let value: serde_json::Value = serde_json::from_slice(body)?;

    for key in ["image_url", "imageUrl"] {
        if let Some(url) = value.get(key).and_then(|v| v.as_str()).filter(|u| !u.is_empty()) {
            return Ok(url.to_string());
        }
    }

    if let Some(url) = value
        .get("message")
        .and_then(|v| v.as_str())
        .and_then(extract_url)
    {
        return Ok(url);
    }

    Err(ApiError::InvalidResponse(
        "upload response did not contain an image URL".to_string(),
    ))
}

fn extract_url(text: &str) -> Option<String> {
    let start = ["http://", "https://"]
        .iter()
        .filter_map(|scheme| text.find(scheme))
        .min()?;
    let url: String = text[start..]
        .chars()
        .take_while(|c| !c.is_whitespace())
        .collect();
    let url = url.trim_end_matches(['.', ',', ';', ')', '"', '\'']);
    Some(url.to_string())
}
