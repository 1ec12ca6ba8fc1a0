//! Request/response seam to the remote store.
//!
//! Everything the SDK sends goes through [`RemoteStore::request`], so tests
//! can substitute an in-memory implementation for [`HttpStore`].

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::config::ClientConfig;

/// API version prefix for every store path.
pub const API_PREFIX: &str = "/1.1";

/// HTTP verb of a store request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
}

impl From<Method> for reqwest::Method {
    fn from(method: Method) -> Self {
        match method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
            Method::Delete => reqwest::Method::DELETE,
        }
    }
}

/// Per-request credential overrides.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthOption {
    /// Sign the request with the master key instead of the app key.
    UseMasterKey,
    /// Act on behalf of the user owning this session.
    SessionToken(String),
}

/// One serialized call to the store.
#[derive(Debug, Clone, PartialEq)]
pub struct StoreRequest {
    pub method: Method,
    /// Path below the server URL, starting with [`API_PREFIX`].
    pub path: String,
    /// Query-string parameters in insertion order.
    pub params: Vec<(String, String)>,
    pub body: Option<serde_json::Value>,
    pub use_master_key: bool,
    pub session_token: Option<String>,
}

impl StoreRequest {
    #[must_use]
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            params: Vec::new(),
            body: None,
            use_master_key: false,
            session_token: None,
        }
    }

    #[must_use]
    pub fn with_params(mut self, params: Vec<(String, String)>) -> Self {
        self.params = params;
        self
    }

    #[must_use]
    pub fn with_body(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Applies auth options; later options override earlier ones.
    #[must_use]
    pub fn with_auth(mut self, options: &[AuthOption]) -> Self {
        for option in options {
            match option {
                AuthOption::UseMasterKey => self.use_master_key = true,
                AuthOption::SessionToken(token) => self.session_token = Some(token.clone()),
            }
        }
        self
    }

    /// Looks up a query parameter by name.
    #[must_use]
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

/// Errors from a store round trip.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store request failed: {0}")]
    Transport(#[from] reqwest::Error),
    /// The store answered with a non-success status.
    #[error("store returned {status}: {message} (code {code})")]
    Api {
        status: u16,
        code: i64,
        message: String,
    },
    #[error("unable to parse response: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("master key requested but not configured")]
    MissingMasterKey,
}

/// Generic request/response access to the remote store.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Sends one request and returns the decoded JSON response body.
    /// An empty body decodes to `null`.
    async fn request(&self, request: StoreRequest) -> Result<serde_json::Value, StoreError>;
}

#[derive(Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    error: String,
}

/// [`RemoteStore`] over HTTP with `reqwest`.
#[derive(Clone)]
pub struct HttpStore {
    http: reqwest::Client,
    config: ClientConfig,
}

impl std::fmt::Debug for HttpStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpStore")
            .field("server_url", &self.config.server_url)
            .field("app_id", &self.config.app_id)
            .finish_non_exhaustive()
    }
}

impl HttpStore {
    /// # Errors
    ///
    /// Returns [`StoreError::Transport`] if the HTTP client cannot be built.
    pub fn new(config: ClientConfig) -> Result<Self, StoreError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self { http, config })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.server_url.trim_end_matches('/'), path)
    }

    fn key_header(&self, use_master_key: bool) -> Result<String, StoreError> {
        if use_master_key {
            let master = self
                .config
                .master_key
                .as_deref()
                .ok_or(StoreError::MissingMasterKey)?;
            Ok(format!("{master},master"))
        } else {
            Ok(self.config.app_key.clone())
        }
    }
}

#[async_trait]
impl RemoteStore for HttpStore {
    async fn request(&self, request: StoreRequest) -> Result<serde_json::Value, StoreError> {
        debug!(method = ?request.method, path = %request.path, "store request");

        let mut builder = self
            .http
            .request(request.method.into(), self.url(&request.path))
            .header("X-LC-Id", &self.config.app_id)
            .header("X-LC-Key", self.key_header(request.use_master_key)?);
        if let Some(token) = &request.session_token {
            builder = builder.header("X-LC-Session", token);
        }
        if !request.params.is_empty() {
            builder = builder.query(&request.params);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await?;
        let status = response.status();
        let bytes = response.bytes().await?;

        if !status.is_success() {
            let body: ApiErrorBody = serde_json::from_slice(&bytes).unwrap_or(ApiErrorBody {
                code: 0,
                error: String::from_utf8_lossy(&bytes).into_owned(),
            });
            return Err(StoreError::Api {
                status: status.as_u16(),
                code: body.code,
                message: body.error,
            });
        }

        if bytes.is_empty() {
            return Ok(serde_json::Value::Null);
        }
        Ok(serde_json::from_slice(&bytes)?)
    }
}
