use anyhow::Context;
use chrono::{NaiveDate, Utc};
use rand::Rng;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

use super::cache::{cache_key, ResponseCache};
use super::error::ApiError;
use super::parse::{parse_competitions, parse_match, parse_matches, parse_team, Competition, Team};
use super::rate_limiter::{RateLimiter, RateLimiterConfig, RateLimiterStatus, MAX_DEFERRAL};
use super::transport::{HttpTransport, ReqwestTransport, TransportError};
use crate::db::models::{MatchId, MatchSnapshot, MatchStatus};

pub const DEFAULT_BASE_URL: &str = "https://api.football-data.org/v4";

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub base_url: String,
    pub api_key: String,
    /// Longest a single call waits for local rate-limit admission
    pub acquire_timeout: Duration,
    /// Total attempts for retryable failures (5xx, timeouts, connection errors)
    pub max_attempts: u32,
    /// First retry delay; doubles on every further attempt
    pub backoff_base: Duration,
    pub request_timeout: Duration,
    pub matches_cache_ttl: Duration,
    pub competitions_cache_ttl: Duration,
    pub team_cache_ttl: Duration,
}

impl ClientConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        ClientConfig {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: api_key.into(),
            acquire_timeout: Duration::from_secs(60),
            max_attempts: 3,
            backoff_base: Duration::from_secs(1),
            request_timeout: Duration::from_secs(10),
            matches_cache_ttl: Duration::from_secs(300),
            competitions_cache_ttl: Duration::from_secs(3600),
            team_cache_ttl: Duration::from_secs(3600),
        }
    }
}

/// Rate-limited, caching client for the football-data.org v4 API.
///
/// Every outbound attempt (retries included) is admitted by the shared
/// [`RateLimiter`]; cache hits consume no budget.
#[derive(Clone)]
pub struct FootballDataClient {
    config: Arc<ClientConfig>,
    transport: Arc<dyn HttpTransport>,
    limiter: Arc<RateLimiter>,
    cache: Arc<ResponseCache>,
}

/// Rate-limiter status plus cache occupancy.
#[derive(Debug, Clone, Serialize)]
pub struct ClientStatus {
    #[serde(flatten)]
    pub rate_limiter: RateLimiterStatus,
    pub cache_entries: usize,
}

/// Filters for [`FootballDataClient::matches`]. Dates are inclusive.
#[derive(Debug, Clone, Default)]
pub struct MatchQuery {
    pub competition: Option<String>,
    pub status: Option<MatchStatus>,
    pub date_from: Option<NaiveDate>,
    pub date_to: Option<NaiveDate>,
}

impl MatchQuery {
    fn params(&self) -> Vec<(&'static str, String)> {
        let mut params = Vec::new();
        if let Some(c) = &self.competition {
            params.push(("competitions", c.clone()));
        }
        if let Some(s) = &self.status {
            params.push(("status", s.as_str().to_string()));
        }
        if let Some(d) = self.date_from {
            params.push(("dateFrom", d.format("%Y-%m-%d").to_string()));
        }
        if let Some(d) = self.date_to {
            params.push(("dateTo", d.format("%Y-%m-%d").to_string()));
        }
        params
    }
}

enum RetryableFailure {
    Server(u16),
    Transport(TransportError),
}

impl RetryableFailure {
    fn describe(&self) -> String {
        match self {
            RetryableFailure::Server(s) => format!("server returned {}", s),
            RetryableFailure::Transport(e) => e.to_string(),
        }
    }
}

impl FootballDataClient {
    pub fn new(config: ClientConfig, limiter: RateLimiterConfig) -> anyhow::Result<Self> {
        let transport = Arc::new(ReqwestTransport::new(config.request_timeout)?);
        Self::with_transport(config, limiter, transport)
    }

    pub fn with_transport(
        config: ClientConfig,
        limiter: RateLimiterConfig,
        transport: Arc<dyn HttpTransport>,
    ) -> anyhow::Result<Self> {
        if config.api_key.trim().is_empty() {
            anyhow::bail!("football-data API key is not configured");
        }
        Url::parse(&config.base_url)
            .with_context(|| format!("Invalid API base URL: {}", config.base_url))?;

        info!(
            "Football-data client ready ({} req/{:?}, min spacing {:?})",
            limiter.capacity, limiter.refill_period, limiter.min_spacing
        );
        Ok(FootballDataClient {
            config: Arc::new(config),
            transport,
            limiter: Arc::new(RateLimiter::new(limiter)),
            cache: Arc::new(ResponseCache::new()),
        })
    }

    pub fn rate_limit_status(&self) -> ClientStatus {
        ClientStatus {
            rate_limiter: self.limiter.status(),
            cache_entries: self.cache.len(),
        }
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
        info!("Response cache cleared");
    }

    /// GET `endpoint` with `params`.
    ///
    /// A non-expired cached response is returned without touching the rate
    /// limiter unless `force_refresh` is set. A `cache_ttl` of zero disables
    /// caching for this call entirely.
    pub async fn fetch(
        &self,
        endpoint: &str,
        params: &[(&str, &str)],
        cache_ttl: Duration,
        force_refresh: bool,
    ) -> Result<Value, ApiError> {
        let key = cache_key(endpoint, params);
        if !force_refresh && !cache_ttl.is_zero() {
            if let Some(hit) = self.cache.get(&key) {
                debug!("Cache hit: {}", key);
                return Ok(hit);
            }
        }

        let url = self.build_url(endpoint, params)?;
        let value = self.send_with_retry(endpoint, &url).await?;
        if !cache_ttl.is_zero() {
            self.cache.insert(key, value.clone(), cache_ttl);
        }
        Ok(value)
    }

    fn build_url(&self, endpoint: &str, params: &[(&str, &str)]) -> Result<Url, ApiError> {
        let raw = format!("{}{}", self.config.base_url.trim_end_matches('/'), endpoint);
        let mut url = Url::parse(&raw).map_err(|e| ApiError::Rejected {
            endpoint: endpoint.to_string(),
            status: 0,
            message: format!("invalid URL: {}", e),
        })?;
        if !params.is_empty() {
            url.query_pairs_mut().extend_pairs(params);
        }
        Ok(url)
    }

    async fn send_with_retry(&self, endpoint: &str, url: &Url) -> Result<Value, ApiError> {
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt = 0;
        let mut last_failure: Option<String> = None;

        loop {
            attempt += 1;
            let wait = self.limiter.wait_time();
            if !wait.is_zero() {
                debug!("{} waits {:?} for rate-limit admission", endpoint, wait);
            }
            if !self.limiter.acquire(self.config.acquire_timeout).await {
                return Err(ApiError::RateLimitExhausted {
                    endpoint: endpoint.to_string(),
                    waited: self.config.acquire_timeout,
                    last_failure,
                });
            }

            debug!("→ GET {} (attempt {}/{})", url, attempt, max_attempts);
            let failure = match self.transport.get(url, &self.config.api_key).await {
                Ok(resp) => match resp.status {
                    200..=299 => {
                        debug!("← {} OK", resp.status);
                        return serde_json::from_str(&resp.body).map_err(|e| ApiError::Decode {
                            endpoint: endpoint.to_string(),
                            status: resp.status,
                            message: e.to_string(),
                        });
                    }
                    401 => {
                        return Err(ApiError::Authentication {
                            endpoint: endpoint.to_string(),
                            status: 401,
                        })
                    }
                    403 => {
                        return Err(ApiError::Authorization {
                            endpoint: endpoint.to_string(),
                            status: 403,
                        })
                    }
                    404 => {
                        return Err(ApiError::NotFound {
                            endpoint: endpoint.to_string(),
                        })
                    }
                    429 => {
                        let refill = self.limiter.config().refill_period;
                        let backoff = resp
                            .retry_after
                            .map_or(refill, |r| r.max(refill))
                            .min(MAX_DEFERRAL);
                        self.limiter.defer(backoff);
                        warn!("Remote rate limit hit on {}; deferring {:?}", endpoint, backoff);
                        return Err(ApiError::RateLimitRejected {
                            endpoint: endpoint.to_string(),
                            backoff,
                        });
                    }
                    s if s >= 500 => RetryableFailure::Server(s),
                    s => {
                        return Err(ApiError::Rejected {
                            endpoint: endpoint.to_string(),
                            status: s,
                            message: truncate(&resp.body, 200),
                        })
                    }
                },
                Err(e) => RetryableFailure::Transport(e),
            };

            if attempt >= max_attempts {
                return Err(match failure {
                    RetryableFailure::Server(status) => ApiError::Server {
                        endpoint: endpoint.to_string(),
                        status,
                        attempts: attempt,
                    },
                    RetryableFailure::Transport(e) => ApiError::Transient {
                        endpoint: endpoint.to_string(),
                        attempts: attempt,
                        message: e.to_string(),
                    },
                });
            }

            let delay = backoff_delay(self.config.backoff_base, attempt);
            match &failure {
                RetryableFailure::Server(s) => warn!(
                    "{} returned {}; retrying in {:?} ({}/{})",
                    endpoint, s, delay, attempt, max_attempts
                ),
                RetryableFailure::Transport(e) => warn!(
                    "{} failed: {}; retrying in {:?} ({}/{})",
                    endpoint, e, delay, attempt, max_attempts
                ),
            }
            last_failure = Some(failure.describe());
            tokio::time::sleep(delay).await;
        }
    }

    // ── Endpoints ─────────────────────────────────────────────────────────────

    pub async fn competitions(&self) -> Result<Vec<Competition>, ApiError> {
        self.competitions_filtered(&[]).await
    }

    /// Competition list narrowed by raw API filters such as `areas`.
    pub async fn competitions_filtered(
        &self,
        filters: &[(&str, &str)],
    ) -> Result<Vec<Competition>, ApiError> {
        let raw = self
            .fetch("/competitions", filters, self.config.competitions_cache_ttl, false)
            .await?;
        Ok(parse_competitions(&raw))
    }

    /// Matches across competitions. LIVE queries are never cached.
    pub async fn matches(&self, query: &MatchQuery) -> Result<Vec<MatchSnapshot>, ApiError> {
        let owned = query.params();
        let params: Vec<(&str, &str)> = owned.iter().map(|(k, v)| (*k, v.as_str())).collect();
        let live = query.status.as_ref().is_some_and(MatchStatus::is_live);
        let ttl = if live {
            Duration::ZERO
        } else {
            self.config.matches_cache_ttl
        };
        let raw = self.fetch("/matches", &params, ttl, live).await?;
        let fallback = query.competition.as_deref().unwrap_or("UNKNOWN");
        Ok(parse_matches(&raw, fallback, Utc::now()))
    }

    pub async fn live_matches(&self) -> Result<Vec<MatchSnapshot>, ApiError> {
        self.matches(&MatchQuery {
            status: Some(MatchStatus::Live),
            ..Default::default()
        })
        .await
    }

    pub async fn competition_matches(
        &self,
        code: &str,
        status: Option<&MatchStatus>,
        force_refresh: bool,
    ) -> Result<Vec<MatchSnapshot>, ApiError> {
        let endpoint = format!("/competitions/{}/matches", code);
        let mut params = Vec::new();
        if let Some(s) = status {
            params.push(("status", s.as_str()));
        }
        let live = status.is_some_and(MatchStatus::is_live);
        let ttl = if live {
            Duration::ZERO
        } else {
            self.config.matches_cache_ttl
        };
        let raw = self.fetch(&endpoint, &params, ttl, force_refresh || live).await?;
        Ok(parse_matches(&raw, code, Utc::now()))
    }

    /// Single-match detail; never cached.
    pub async fn match_detail(&self, match_id: MatchId) -> Result<Option<MatchSnapshot>, ApiError> {
        let endpoint = format!("/matches/{}", match_id);
        let raw = self.fetch(&endpoint, &[], Duration::ZERO, true).await?;
        Ok(parse_match(&raw, "UNKNOWN", Utc::now()))
    }

    /// Team profile (venue, founding year, running competitions).
    pub async fn team(&self, team_id: i64) -> Result<Option<Team>, ApiError> {
        let endpoint = format!("/teams/{}", team_id);
        let raw = self
            .fetch(&endpoint, &[], self.config.team_cache_ttl, false)
            .await?;
        Ok(parse_team(&raw))
    }
}

/// `base * 2^(attempt-1)` plus up to 25% jitter.
fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let exp = base.saturating_mul(1u32 << (attempt.saturating_sub(1)).min(16));
    let jitter = rand::thread_rng().gen_range(0.0..=0.25);
    exp + exp.mul_f64(jitter)
}

fn truncate(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((i, _)) => format!("{}…", &s[..i]),
        None => s.to_string(),
    }
}

/// Format check only: football-data keys are 32 hex characters, but anything
/// shorter than 10 characters is certainly not a key.
pub fn validate_api_key(api_key: &str) -> bool {
    let key = api_key.trim();
    key.len() >= 10 && key.chars().all(|c| c.is_ascii_alphanumeric())
}
