//! football-data.org v4 access: admission control, response caching, retry
//! and typed failures.

pub mod cache;
pub mod client;
pub mod error;
pub mod parse;
pub mod rate_limiter;
pub mod transport;

#[cfg(test)]
pub mod testing;

pub use client::{validate_api_key, ClientConfig, ClientStatus, FootballDataClient, MatchQuery};
pub use error::ApiError;
pub use rate_limiter::RateLimiterConfig;
