use std::sync::Arc;

use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::trace;

use crate::config::BackendConfig;
use crate::error::{self, PetcareError, PetcareResult};

/// Shared HTTP plumbing for the hosted backend
///
/// Holds one `reqwest::Client` (with the configured timeout) and stamps the
/// project's `apikey` header on every request.
#[derive(Clone)]
pub struct RestClient {
    client: Client,
    base_url: String,
    anon_key: String,
}

impl RestClient {
    pub fn new(config: &BackendConfig) -> PetcareResult<Self> {
        config.validate()?;

        let mut headers = HeaderMap::new();
        let key = HeaderValue::from_str(&config.anon_key)
            .map_err(|e| error::config_invalid("backend.anon_key", &e.to_string()))?;
        headers.insert("apikey", key);

        let client = Client::builder()
            .timeout(config.request_timeout())
            .default_headers(headers)
            .build()
            .map_err(|e| error::internal(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            anon_key: config.anon_key.clone(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn anon_key(&self) -> &str {
        &self.anon_key
    }

    /// Absolute URL for a path such as `/auth/v1/token`
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = self.url(path);
        trace!(%method, %url, "Backend request");
        self.client.request(method, url)
    }

    /// Request carrying `Authorization: Bearer <token>`
    pub fn authorized(&self, method: Method, path: &str, token: &str) -> RequestBuilder {
        self.request(method, path)
            .header(AUTHORIZATION, format!("Bearer {}", token))
    }
}

/// Access token shared between the auth adapter and the record store
///
/// The auth adapter writes it whenever the session changes; the store reads
/// it per request and falls back to the anon key when nobody is signed in.
#[derive(Debug, Clone, Default)]
pub struct BearerToken(Arc<RwLock<Option<String>>>);

impl BearerToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self) -> Option<String> {
        self.0.read().await.clone()
    }

    pub async fn set(&self, token: Option<String>) {
        *self.0.write().await = token;
    }
}

/// Error payload of the auth and REST endpoints
///
/// The two services disagree on field names, so every known variant is
/// accepted and nothing is required.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApiErrorBody {
    #[serde(default)]
    pub code: Option<serde_json::Value>,
    #[serde(default)]
    pub error_code: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub error_description: Option<String>,
    #[serde(default)]
    pub msg: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub details: Option<String>,
    #[serde(default)]
    pub hint: Option<String>,
}

impl ApiErrorBody {
    pub fn parse(body: &str) -> Self {
        serde_json::from_str(body).unwrap_or_default()
    }

    /// Machine-readable code, if the service sent one
    pub fn code(&self) -> Option<String> {
        let code = match &self.code {
            Some(serde_json::Value::String(s)) => Some(s.clone()),
            Some(serde_json::Value::Number(n)) => Some(n.to_string()),
            _ => None,
        };
        code.or_else(|| self.error_code.clone())
            .or_else(|| self.error.clone())
    }

    /// Best human-readable description
    pub fn summary(&self) -> String {
        self.error_description
            .clone()
            .or_else(|| self.msg.clone())
            .or_else(|| self.message.clone())
            .or_else(|| self.details.clone())
            .or_else(|| self.error.clone())
            .unwrap_or_else(|| "unknown error".to_string())
    }

    /// True if any of the code fields equals `code`
    pub fn has_code(&self, code: &str) -> bool {
        let numeric_or_string = match &self.code {
            Some(serde_json::Value::String(s)) => s == code,
            Some(serde_json::Value::Number(n)) => n.to_string() == code,
            _ => false,
        };
        numeric_or_string
            || self.error_code.as_deref() == Some(code)
            || self.error.as_deref() == Some(code)
    }

    pub fn mentions(&self, needle: &str) -> bool {
        let needle = needle.to_lowercase();
        [&self.error_description, &self.msg, &self.message, &self.details]
            .iter()
            .filter_map(|field| field.as_deref())
            .any(|text| text.to_lowercase().contains(&needle))
    }
}

/// A non-success response, kept for error mapping
#[derive(Debug, Clone)]
pub struct ApiFailure {
    pub status: StatusCode,
    pub body: ApiErrorBody,
}

impl ApiFailure {
    pub fn describe(&self) -> String {
        match self.body.code() {
            Some(code) => format!("HTTP {} [{}]: {}", self.status.as_u16(), code, self.body.summary()),
            None => format!("HTTP {}: {}", self.status.as_u16(), self.body.summary()),
        }
    }
}

/// Split a response into its decoded success body or an [`ApiFailure`]
///
/// Transport errors are mapped with `on_transport`, so the caller decides
/// which adapter-level code they carry.
pub async fn read_json<T, F>(
    response: Result<Response, reqwest::Error>,
    on_transport: F,
) -> PetcareResult<Result<T, ApiFailure>>
where
    T: DeserializeOwned,
    F: Fn(reqwest::Error) -> PetcareError,
{
    let response = response.map_err(&on_transport)?;
    let status = response.status();
    let text = response.text().await.map_err(&on_transport)?;

    if !status.is_success() {
        return Ok(Err(ApiFailure {
            status,
            body: ApiErrorBody::parse(&text),
        }));
    }

    let value = serde_json::from_str(&text)
        .map_err(|e| error::response_invalid(&format!("HTTP {} body", status.as_u16()), e))?;
    Ok(Ok(value))
}

/// Like [`read_json`] for endpoints whose success body is ignored
pub async fn read_empty<F>(
    response: Result<Response, reqwest::Error>,
    on_transport: F,
) -> PetcareResult<Result<(), ApiFailure>>
where
    F: Fn(reqwest::Error) -> PetcareError,
{
    let response = response.map_err(&on_transport)?;
    let status = response.status();
    if status.is_success() {
        return Ok(Ok(()));
    }

    let text = response.text().await.map_err(&on_transport)?;
    Ok(Err(ApiFailure {
        status,
        body: ApiErrorBody::parse(&text),
    }))
}
