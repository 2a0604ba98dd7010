//! Backends — HTTP clients for the external generation services.
//!
//! DESIGN
//! ======
//! One module per service. Every client borrows the pooled `reqwest::Client`
//! from `AppState` and an [`Endpoint`] built from the user's settings; an
//! empty base URL is reported as [`BackendError::NotConfigured`] before any
//! request goes out. Wire types stay private to each module and parsing is
//! split into pure functions so it can be tested without a server.
//!
//! Connection tests share the [`ConnectionProbe`] seam so the status route
//! can run them side by side.

pub mod colab;
pub mod comfyui;
pub mod gdrive;
pub mod huggingface;
pub mod sdwebui;
pub mod waifu2x;
pub mod wan22;

use futures::future::join_all;
use serde::Serialize;
use serde::de::DeserializeOwned;

// =============================================================================
// ERROR
// =============================================================================

/// Errors produced by backend client operations.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// No base URL (or credential) is configured for the backend.
    #[error("{backend} endpoint not configured")]
    NotConfigured { backend: &'static str },

    /// The HTTP request could not be sent or the body could not be read.
    #[error("{backend} request failed: {message}")]
    Request { backend: &'static str, message: String },

    /// The request exceeded its deadline.
    #[error("{backend} request timed out")]
    Timeout { backend: &'static str },

    /// The backend answered with a non-success HTTP status.
    #[error("{backend} API error: {status}")]
    Status { backend: &'static str, status: u16, body: String },

    /// The backend answered 2xx but the body was not what we expected.
    #[error("{backend} response parse failed: {message}")]
    Parse { backend: &'static str, message: String },

    /// The backend answered but reported a failure of its own.
    #[error("{0}")]
    Rejected(String),

    /// The caller's input failed validation before any request was sent.
    #[error("{0}")]
    InvalidRequest(String),

    /// The backend refused the credential.
    #[error("{0}")]
    Unauthorized(String),

    /// A Hugging Face model is still loading.
    #[error("Model is loading{}", estimated_time.map(|t| format!(", estimated time {t:.0}s")).unwrap_or_default())]
    ModelLoading { estimated_time: Option<f64> },

    /// The underlying HTTP client could not be constructed.
    #[error("HTTP client build failed: {0}")]
    HttpClientBuild(String),
}

impl crate::error::ErrorCode for BackendError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::NotConfigured { .. } => "E_BACKEND_NOT_CONFIGURED",
            Self::Request { .. } => "E_BACKEND_REQUEST",
            Self::Timeout { .. } => "E_BACKEND_TIMEOUT",
            Self::Status { .. } => "E_BACKEND_STATUS",
            Self::Parse { .. } => "E_BACKEND_PARSE",
            Self::Rejected(_) => "E_BACKEND_REJECTED",
            Self::InvalidRequest(_) => "E_INVALID_REQUEST",
            Self::Unauthorized(_) => "E_UNAUTHORIZED",
            Self::ModelLoading { .. } => "E_MODEL_LOADING",
            Self::HttpClientBuild(_) => "E_HTTP_CLIENT_BUILD",
        }
    }

    fn retryable(&self) -> bool {
        matches!(
            self,
            Self::Request { .. }
                | Self::Timeout { .. }
                | Self::ModelLoading { .. }
                | Self::Status { status: 429 | 500..=599, .. }
        )
    }
}

pub(crate) fn request_error(backend: &'static str, err: &reqwest::Error) -> BackendError {
    if err.is_timeout() {
        BackendError::Timeout { backend }
    } else {
        BackendError::Request { backend, message: err.to_string() }
    }
}

pub(crate) fn parse_error(backend: &'static str, err: impl std::fmt::Display) -> BackendError {
    BackendError::Parse { backend, message: err.to_string() }
}

// =============================================================================
// ENDPOINT
// =============================================================================

/// Base URL plus optional bearer token for one backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub backend: &'static str,
    base_url: String,
    auth_token: Option<String>,
}

impl Endpoint {
    /// # Errors
    ///
    /// Returns [`BackendError::NotConfigured`] when `base_url` is blank.
    pub fn new(backend: &'static str, base_url: &str, auth_token: Option<&str>) -> Result<Self, BackendError> {
        let base_url = base_url.trim().trim_end_matches('/');
        if base_url.is_empty() {
            return Err(BackendError::NotConfigured { backend });
        }
        Ok(Self {
            backend,
            base_url: base_url.to_string(),
            auth_token: auth_token
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(str::to_string),
        })
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    #[must_use]
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// `raw` percent-encoded as one path segment, so ids cannot add segments
    /// or a query to the upstream URL.
    #[must_use]
    pub fn segment(raw: &str) -> String {
        let Ok(mut url) = reqwest::Url::parse("http://segment.local/") else {
            return String::new();
        };
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.clear().push(raw);
        }
        url.path().trim_start_matches('/').to_string()
    }

    /// Attach the bearer token, if any.
    #[must_use]
    pub fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.auth_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    pub(crate) async fn get_text(&self, http: &reqwest::Client, path: &str) -> Result<String, BackendError> {
        let response = self
            .authorize(http.get(self.url(path)))
            .send()
            .await
            .map_err(|e| request_error(self.backend, &e))?;
        read_text(self.backend, response).await
    }

    pub(crate) async fn get_json<T: DeserializeOwned>(&self, http: &reqwest::Client, path: &str) -> Result<T, BackendError> {
        let text = self.get_text(http, path).await?;
        serde_json::from_str(&text).map_err(|e| parse_error(self.backend, e))
    }

    pub(crate) async fn post_json<T: DeserializeOwned>(
        &self,
        http: &reqwest::Client,
        path: &str,
        body: &impl Serialize,
    ) -> Result<T, BackendError> {
        let response = self
            .authorize(http.post(self.url(path)))
            .json(body)
            .send()
            .await
            .map_err(|e| request_error(self.backend, &e))?;
        read_json(self.backend, response).await
    }

    pub(crate) async fn get_envelope<T: DeserializeOwned>(
        &self,
        http: &reqwest::Client,
        path: &str,
        fallback: &str,
    ) -> Result<T, BackendError> {
        let response = self
            .authorize(http.get(self.url(path)))
            .send()
            .await
            .map_err(|e| request_error(self.backend, &e))?;
        read_envelope(self.backend, response, fallback).await
    }

    pub(crate) async fn post_envelope<T: DeserializeOwned>(
        &self,
        http: &reqwest::Client,
        path: &str,
        body: &impl Serialize,
        fallback: &str,
    ) -> Result<T, BackendError> {
        let response = self
            .authorize(http.post(self.url(path)))
            .json(body)
            .send()
            .await
            .map_err(|e| request_error(self.backend, &e))?;
        read_envelope(self.backend, response, fallback).await
    }
}

/// Read a response body as text, turning non-2xx into [`BackendError::Status`].
pub(crate) async fn read_text(backend: &'static str, response: reqwest::Response) -> Result<String, BackendError> {
    let status = response.status();
    let text = response.text().await.map_err(|e| request_error(backend, &e))?;
    if !status.is_success() {
        return Err(BackendError::Status { backend, status: status.as_u16(), body: text });
    }
    Ok(text)
}

pub(crate) async fn read_json<T: DeserializeOwned>(backend: &'static str, response: reqwest::Response) -> Result<T, BackendError> {
    let text = read_text(backend, response).await?;
    serde_json::from_str(&text).map_err(|e| parse_error(backend, e))
}

/// Parse a `{success, error, ...}` body. A body reporting `success: false`
/// becomes [`BackendError::Rejected`] carrying the server's own message,
/// whatever the HTTP status was.
pub(crate) fn parse_envelope<T: DeserializeOwned>(
    backend: &'static str,
    status: u16,
    text: &str,
    fallback: &str,
) -> Result<T, BackendError> {
    let value: serde_json::Value = match serde_json::from_str(text) {
        Ok(value) => value,
        Err(_) if !(200..300).contains(&status) => {
            return Err(BackendError::Status { backend, status, body: text.to_string() });
        }
        Err(e) => return Err(parse_error(backend, e)),
    };
    if value.get("success").and_then(serde_json::Value::as_bool) == Some(false) {
        let message = value.get("error").and_then(serde_json::Value::as_str).unwrap_or(fallback);
        return Err(BackendError::Rejected(message.to_string()));
    }
    if !(200..300).contains(&status) {
        return Err(BackendError::Status { backend, status, body: text.to_string() });
    }
    serde_json::from_value(value).map_err(|e| parse_error(backend, e))
}

pub(crate) async fn read_envelope<T: DeserializeOwned>(
    backend: &'static str,
    response: reqwest::Response,
    fallback: &str,
) -> Result<T, BackendError> {
    let status = response.status().as_u16();
    let text = response.text().await.map_err(|e| request_error(backend, &e))?;
    parse_envelope(backend, status, &text, fallback)
}

// =============================================================================
// CONNECTION PROBES
// =============================================================================

/// A backend that can check it is reachable without doing real work.
#[async_trait::async_trait]
pub trait ConnectionProbe: Send + Sync {
    fn name(&self) -> &'static str;

    async fn check(&self) -> Result<(), BackendError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionStatus {
    pub backend: &'static str,
    pub connected: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Run every probe concurrently. Results keep the input order.
pub async fn probe_all(probes: &[Box<dyn ConnectionProbe>]) -> Vec<ConnectionStatus> {
    let checks = probes.iter().map(|probe| async move {
        let result = probe.check().await;
        if let Err(e) = &result {
            tracing::debug!(backend = probe.name(), error = %e, "connection probe failed");
        }
        ConnectionStatus { backend: probe.name(), connected: result.is_ok(), error: result.err().map(|e| e.to_string()) }
    });
    join_all(checks).await
}

#[cfg(test)]
#[path = "mod_test.rs"]
mod tests;
