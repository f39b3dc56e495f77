use anyhow::Context;
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Header football-data.org reads the API key from.
pub const AUTH_HEADER: &str = "X-Auth-Token";

const USER_AGENT: &str = concat!("live-scores-engine/", env!("CARGO_PKG_VERSION"));

/// Largest `Retry-After` honoured; anything above is read as this.
pub const MAX_RETRY_AFTER: Duration = Duration::from_secs(3600);

/// Raw HTTP response, before any status classification.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
    /// Parsed `Retry-After` header, when present in seconds form
    pub retry_after: Option<Duration>,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("{0}")]
    Other(String),
}

/// Issues authenticated GET requests. Classification of the response is the
/// client's job; a transport only fails when no response arrived at all.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn get(&self, url: &Url, auth_token: &str) -> Result<HttpResponse, TransportError>;
}

/// reqwest-backed transport with a per-request timeout.
pub struct ReqwestTransport {
    http: Client,
}

impl ReqwestTransport {
    pub fn new(request_timeout: Duration) -> anyhow::Result<Self> {
        let http = Client::builder()
            .timeout(request_timeout)
            .user_agent(USER_AGENT)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(ReqwestTransport { http })
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn get(&self, url: &Url, auth_token: &str) -> Result<HttpResponse, TransportError> {
        let resp = self
            .http
            .get(url.clone())
            .header(AUTH_HEADER, auth_token)
            .send()
            .await
            .map_err(classify_reqwest_error)?;

        let status = resp.status().as_u16();
        let retry_after = resp
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_retry_after);
        let body = resp.text().await.map_err(classify_reqwest_error)?;

        Ok(HttpResponse {
            status,
            body,
            retry_after,
        })
    }
}

/// Seconds form only; HTTP-date values are ignored.
fn parse_retry_after(value: &str) -> Option<Duration> {
    let secs = value.trim().parse::<u64>().ok()?;
    Some(Duration::from_secs(secs).min(MAX_RETRY_AFTER))
}

fn classify_reqwest_error(err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout
    } else if err.is_connect() {
        TransportError::Connect(err.to_string())
    } else {
        TransportError::Other(err.to_string())
    }
}
