//! HTTP/REST connector (reqwest, rustls).
//!
//! `address` is the base URL. References are absolute URLs, or are resolved against the
//! address with standard URL-join rules (so a base that should act as a directory needs a
//! trailing `/`).

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE, LAST_MODIFIED};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use url::Url;

use crate::error::{IngestionError, IngestionResult};
use crate::types::{FileMetadata, SourceDescriptor};

use super::{NamePattern, file_name_of};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_CONTENT_TYPE: &str = "application/json";

/// Credentials attached to every request.
#[derive(Clone, PartialEq, Eq, Default)]
pub enum HttpAuth {
    #[default]
    None,
    Bearer(String),
    Basic {
        username: String,
        password: Option<String>,
    },
}

impl std::fmt::Debug for HttpAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => f.write_str("None"),
            Self::Bearer(_) => f.write_str("Bearer(..)"),
            Self::Basic { username, .. } => f.debug_struct("Basic").field("username", username).finish_non_exhaustive(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpConfig {
    pub base_url: Url,
    pub auth: HttpAuth,
    /// Per-request timeout.
    pub timeout: Duration,
    /// Endpoint returning a JSON array of references.
    pub list_endpoint: Option<Url>,
    pub headers: BTreeMap<String, String>,
}

impl HttpConfig {
    /// Options: `HttpAuthType` (none|bearer|basic), `HttpBearerToken`, `HttpUsername`,
    /// `HttpPassword`, `HttpTimeoutSeconds` (30), `HttpListEndpoint`, `HttpCustomHeaders`.
    pub fn from_source(source: &SourceDescriptor) -> IngestionResult<Self> {
        let base_url = Url::parse(source.address().trim()).map_err(|e| {
            IngestionError::invalid_argument(format!("invalid http address '{}': {e}", source.address()))
        })?;
        if !matches!(base_url.scheme(), "http" | "https") {
            return Err(IngestionError::invalid_argument(format!(
                "http address '{base_url}' must use http or https"
            )));
        }

        let auth_type = source.option_string("HttpAuthType")?.unwrap_or_default();
        let auth = match auth_type.trim().to_ascii_lowercase().as_str() {
            "" | "none" => HttpAuth::None,
            "bearer" => match source.option_string("HttpBearerToken")?.filter(|t| !t.is_empty()) {
                Some(token) => HttpAuth::Bearer(token),
                None => HttpAuth::None,
            },
            "basic" => match source.option_string("HttpUsername")?.filter(|u| !u.is_empty()) {
                Some(username) => HttpAuth::Basic {
                    username,
                    password: source.option_string("HttpPassword")?,
                },
                None => HttpAuth::None,
            },
            other => {
                return Err(IngestionError::invalid_argument(format!(
                    "option 'HttpAuthType' must be none, bearer or basic (got '{other}')"
                )));
            }
        };

        let list_endpoint = match source.option_string("HttpListEndpoint")?.filter(|e| !e.trim().is_empty()) {
            Some(endpoint) => Some(resolve_url(&base_url, &endpoint)?),
            None => None,
        };

        Ok(Self {
            auth,
            timeout: source
                .option_u64("HttpTimeoutSeconds")?
                .filter(|s| *s > 0)
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_TIMEOUT),
            list_endpoint,
            headers: source.option_map("HttpCustomHeaders")?.unwrap_or_default(),
            base_url,
        })
    }

    pub fn resolve(&self, reference: &str) -> IngestionResult<Url> {
        resolve_url(&self.base_url, reference)
    }
}

fn resolve_url(base: &Url, reference: &str) -> IngestionResult<Url> {
    let reference = reference.trim();
    match Url::parse(reference) {
        Ok(url) => Ok(url),
        Err(url::ParseError::RelativeUrlWithoutBase) => base
            .join(reference)
            .map_err(|e| IngestionError::invalid_argument(format!("cannot resolve '{reference}' against {base}: {e}"))),
        Err(e) => Err(IngestionError::invalid_argument(format!("invalid url '{reference}': {e}"))),
    }
}

/// Shares one connection pool across all HTTP sources.
#[derive(Debug, Clone)]
pub struct HttpConnector {
    client: Client,
}

impl HttpConnector {
    pub fn new() -> IngestionResult<Self> {
        let client = Client::builder()
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| IngestionError::connection("http client", e))?;
        Ok(Self::with_client(client))
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    pub async fn read(
        &self,
        source: &SourceDescriptor,
        reference: &str,
        cancel: &CancellationToken,
    ) -> IngestionResult<Vec<u8>> {
        let config = HttpConfig::from_source(source)?;
        let url = config.resolve(reference)?;
        let data = self.fetch(&config, Method::GET, &url, cancel).await?;
        info!(url = %url, bytes = data.len(), "fetched http resource");
        Ok(data)
    }

    /// References from `HttpListEndpoint` whose last path segment matches `pattern`; without a
    /// list endpoint the base address is the only reference.
    ///
    /// Query strings and fragments are not part of the name, so `report.csv?page=2` matches
    /// `*.csv`. Entries keep their original text.
    pub async fn list(
        &self,
        source: &SourceDescriptor,
        pattern: &str,
        cancel: &CancellationToken,
    ) -> IngestionResult<Vec<String>> {
        let config = HttpConfig::from_source(source)?;
        let matcher = NamePattern::new(pattern)?;
        let Some(endpoint) = config.list_endpoint.clone() else {
            debug!(address = source.address(), "no list endpoint configured; listing the address itself");
            return Ok(vec![source.address().to_string()]);
        };

        let body = self.fetch(&config, Method::GET, &endpoint, cancel).await?;
        let entries: Vec<String> = serde_json::from_slice(&body).map_err(|e| {
            IngestionError::format("json", format!("list endpoint {endpoint} did not return an array of strings: {e}"))
        })?;
        let references: Vec<String> = entries
            .into_iter()
            .filter(|entry| matcher.matches(listed_file_name(entry)))
            .collect();
        info!(endpoint = %endpoint, count = references.len(), "listed http references");
        Ok(references)
    }

    pub(crate) async fn probe(&self, source: &SourceDescriptor, cancel: &CancellationToken) -> IngestionResult<()> {
        let config = HttpConfig::from_source(source)?;
        let url = config.base_url.clone();
        self.send(&config, Method::GET, &url, cancel).await.map(|_| ())
    }

    pub async fn describe(
        &self,
        source: &SourceDescriptor,
        reference: &str,
        cancel: &CancellationToken,
    ) -> IngestionResult<FileMetadata> {
        let config = HttpConfig::from_source(source)?;
        let url = config.resolve(reference)?;
        let response = self.send(&config, Method::HEAD, &url, cancel).await?;
        let headers = response.headers();
        let header = |name: reqwest::header::HeaderName| headers.get(name).and_then(|v| v.to_str().ok());

        Ok(FileMetadata {
            path: url.to_string(),
            name: file_name_of(url.path()).to_string(),
            size_bytes: header(CONTENT_LENGTH).and_then(|v| v.trim().parse().ok()).unwrap_or(0),
            last_modified_utc: header(LAST_MODIFIED)
                .and_then(|v| DateTime::parse_from_rfc2822(v.trim()).ok())
                .map(|d| d.with_timezone(&Utc))
                .unwrap_or_else(Utc::now),
            created_utc: None,
            content_type: header(CONTENT_TYPE)
                .and_then(|v| v.split(';').next())
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .unwrap_or(DEFAULT_CONTENT_TYPE)
                .to_string(),
            extra: Default::default(),
        })
    }

    fn request(&self, config: &HttpConfig, method: Method, url: &Url) -> RequestBuilder {
        let mut request = self.client.request(method, url.clone()).timeout(config.timeout);
        for (name, value) in &config.headers {
            request = request.header(name.as_str(), value.as_str());
        }
        match &config.auth {
            HttpAuth::None => request,
            HttpAuth::Bearer(token) => request.bearer_auth(token),
            HttpAuth::Basic { username, password } => request.basic_auth(username, password.as_ref()),
        }
    }

    /// Send a request and map non-success statuses into the error taxonomy.
    async fn send(
        &self,
        config: &HttpConfig,
        method: Method,
        url: &Url,
        cancel: &CancellationToken,
    ) -> IngestionResult<Response> {
        let operation = format!("{method} {url}");
        let request = self.request(config, method, url);
        let started = Instant::now();
        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(IngestionError::cancelled(operation)),
            sent = request.send() => sent.map_err(|e| map_reqwest_error(e, &operation, started))?,
        };

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        debug!(url = %url, %status, "http request failed");
        match status {
            StatusCode::NOT_FOUND | StatusCode::GONE => Err(IngestionError::not_found(url.as_str())),
            _ => Err(IngestionError::connection(url.as_str(), format!("HTTP {status}"))),
        }
    }

    async fn fetch(
        &self,
        config: &HttpConfig,
        method: Method,
        url: &Url,
        cancel: &CancellationToken,
    ) -> IngestionResult<Vec<u8>> {
        let operation = format!("{method} {url}");
        let started = Instant::now();
        let response = self.send(config, method, url, cancel).await?;
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(IngestionError::cancelled(operation)),
            body = response.bytes() => body
                .map(|b| b.to_vec())
                .map_err(|e| map_reqwest_error(e, &operation, started)),
        }
    }
}

/// File name of a listed reference, ignoring any query string or fragment.
fn listed_file_name(entry: &str) -> &str {
    let path = entry.split(['?', '#']).next().unwrap_or(entry);
    file_name_of(path)
}

fn map_reqwest_error(e: reqwest::Error, operation: &str, started: Instant) -> IngestionError {
    if e.is_timeout() {
        IngestionError::Timeout {
            operation: operation.to_string(),
            elapsed: started.elapsed(),
        }
    } else if e.is_builder() {
        IngestionError::invalid_argument(format!("{operation}: {e}"))
    } else {
        IngestionError::connection(operation, e)
    }
}
