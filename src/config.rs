use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

use crate::football_data::client::DEFAULT_BASE_URL;
use crate::football_data::{validate_api_key, ClientConfig, RateLimiterConfig};
use crate::live_scores::PollCadence;

/// Upper bounds keep every configured wait well inside instant arithmetic.
const MAX_ACQUIRE_TIMEOUT_SECS: u64 = 3600;
const MAX_REQUEST_TIMEOUT_SECS: u64 = 300;
const MAX_RATE_LIMIT_PERIOD_SECS: u64 = 24 * 3600;

/// Rate-limited live football score poller
#[derive(Parser, Debug, Clone)]
#[command(name = "live-scores", version, about)]
pub struct Config {
    /// football-data.org API key
    #[arg(long, env = "FOOTBALL_DATA_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// football-data.org API base URL
    #[arg(long, env = "FOOTBALL_DATA_API_URL", default_value = DEFAULT_BASE_URL)]
    pub api_url: String,

    /// Competition codes to track, comma-separated
    #[arg(
        long,
        env = "COMPETITIONS",
        value_delimiter = ',',
        default_value = "PL,CL,PD,BL1,SA,FL1"
    )]
    pub competitions: Vec<String>,

    /// Base interval between full sweeps in seconds
    #[arg(long, env = "POLL_INTERVAL_SECS", default_value = "30")]
    pub poll_interval_secs: u64,

    /// Requests allowed per refill period
    #[arg(long, env = "RATE_LIMIT_CAPACITY", default_value = "10")]
    pub rate_limit_capacity: u32,

    /// Seconds to refill the bucket from empty
    #[arg(long, env = "RATE_LIMIT_PERIOD_SECS", default_value = "60")]
    pub rate_limit_period_secs: u64,

    /// Minimum seconds between two admitted requests
    #[arg(long, env = "RATE_LIMIT_MIN_SPACING_SECS", default_value = "6")]
    pub rate_limit_min_spacing_secs: u64,

    /// Longest a request waits for rate-limit admission
    #[arg(long, env = "ACQUIRE_TIMEOUT_SECS", default_value = "60")]
    pub acquire_timeout_secs: u64,

    /// Per-request network timeout
    #[arg(long, env = "REQUEST_TIMEOUT_SECS", default_value = "10")]
    pub request_timeout_secs: u64,

    /// Attempts for 5xx / network failures
    #[arg(long, env = "MAX_ATTEMPTS", default_value = "3")]
    pub max_attempts: u32,

    /// First retry delay in milliseconds (doubles per attempt)
    #[arg(long, env = "BACKOFF_BASE_MS", default_value = "1000")]
    pub backoff_base_ms: u64,

    #[arg(long, env = "MATCHES_CACHE_TTL_SECS", default_value = "300")]
    pub matches_cache_ttl_secs: u64,

    #[arg(long, env = "COMPETITIONS_CACHE_TTL_SECS", default_value = "3600")]
    pub competitions_cache_ttl_secs: u64,

    /// Pause between two sources within one sweep
    #[arg(long, env = "INTER_SOURCE_DELAY_SECS", default_value = "7")]
    pub inter_source_delay_secs: u64,

    /// Sweep interval while any match is live
    #[arg(long, env = "LIVE_INTERVAL_SECS", default_value = "15")]
    pub live_interval_secs: u64,

    /// Sweep interval while matches are paused (half-time)
    #[arg(long, env = "PAUSED_INTERVAL_SECS", default_value = "30")]
    pub paused_interval_secs: u64,

    /// SQLite database path
    #[arg(long, env = "DATABASE_PATH", default_value = "live_scores.db")]
    pub database_path: String,

    /// Admin API listen address
    #[arg(long, env = "DASHBOARD_ADDR", default_value = "127.0.0.1:8080")]
    pub dashboard_addr: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Poll continuously and log detected events
    Monitor {
        /// Stop after this many seconds (runs until Ctrl-C otherwise)
        #[arg(long)]
        duration_secs: Option<u64>,
        /// Serve the admin API while monitoring
        #[arg(long)]
        dashboard: bool,
    },
    /// Run one sweep and print statistics
    Status,
    /// Run one sweep and write all current snapshots to a JSON file
    Export {
        #[arg(long, short)]
        output: PathBuf,
    },
    /// List competitions available to the API key
    Competitions {
        /// Restrict to these area ids, comma-separated (e.g. 2072)
        #[arg(long)]
        areas: Option<String>,
    },
    /// Print matches filtered by competition, status and date range
    Matches {
        #[arg(long)]
        competition: Option<String>,
        /// e.g. SCHEDULED, LIVE, FINISHED
        #[arg(long)]
        status: Option<String>,
        /// First day, YYYY-MM-DD
        #[arg(long)]
        from: Option<NaiveDate>,
        /// Last day, YYYY-MM-DD
        #[arg(long)]
        to: Option<NaiveDate>,
    },
    /// Print matches live right now across all competitions
    Live,
    /// Print the current state of one match
    Match {
        #[arg(long)]
        id: i64,
    },
    /// Print a team profile
    Team {
        #[arg(long)]
        id: i64,
    },
    /// Run one sweep and print per-competition totals
    DetailedStats,
    /// Check the API key format and show rate-limit status
    ValidateKey,
    /// Print the most recent persisted events
    Events {
        #[arg(long, default_value = "20")]
        limit: i64,
    },
}

impl Config {
    /// Whether the command talks to the remote API at all.
    pub fn needs_api(&self) -> bool {
        !matches!(self.command, Command::Events { .. })
    }

    pub fn api_key(&self) -> anyhow::Result<&str> {
        match self.api_key.as_deref().map(str::trim) {
            Some(key) if !key.is_empty() => Ok(key),
            _ => anyhow::bail!("FOOTBALL_DATA_API_KEY is required (get one at football-data.org)"),
        }
    }

    pub fn competition_codes(&self) -> Vec<String> {
        self.competitions
            .iter()
            .map(|c| c.trim().to_ascii_uppercase())
            .filter(|c| !c.is_empty())
            .collect()
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.needs_api() {
            let key = self.api_key()?;
            if key.len() < 10 {
                anyhow::bail!("FOOTBALL_DATA_API_KEY looks invalid (too short)");
            }
            if !validate_api_key(key) {
                anyhow::bail!("FOOTBALL_DATA_API_KEY looks invalid (unexpected characters)");
            }
        }
        if self.rate_limit_capacity == 0 {
            anyhow::bail!("rate_limit_capacity must be positive");
        }
        if self.rate_limit_period_secs == 0 {
            anyhow::bail!("rate_limit_period_secs must be positive");
        }
        if self.rate_limit_period_secs > MAX_RATE_LIMIT_PERIOD_SECS {
            anyhow::bail!(
                "rate_limit_period_secs must be at most {}",
                MAX_RATE_LIMIT_PERIOD_SECS
            );
        }
        if self.rate_limit_min_spacing_secs > self.rate_limit_period_secs {
            anyhow::bail!("rate_limit_min_spacing_secs must not exceed rate_limit_period_secs");
        }
        if self.acquire_timeout_secs > MAX_ACQUIRE_TIMEOUT_SECS {
            anyhow::bail!("acquire_timeout_secs must be at most {}", MAX_ACQUIRE_TIMEOUT_SECS);
        }
        if self.request_timeout_secs == 0 || self.request_timeout_secs > MAX_REQUEST_TIMEOUT_SECS {
            anyhow::bail!(
                "request_timeout_secs must be between 1 and {}",
                MAX_REQUEST_TIMEOUT_SECS
            );
        }
        if self.max_attempts == 0 {
            anyhow::bail!("max_attempts must be at least 1");
        }
        if self.poll_interval_secs == 0 || self.live_interval_secs == 0 {
            anyhow::bail!("poll intervals must be positive");
        }
        if let Command::Matches {
            from: Some(from),
            to: Some(to),
            ..
        } = &self.command
        {
            if from > to {
                anyhow::bail!("--from {} is after --to {}", from, to);
            }
        }
        if matches!(self.command, Command::Monitor { .. }) && self.competition_codes().is_empty() {
            anyhow::bail!("at least one competition must be tracked");
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn client_config(&self) -> anyhow::Result<ClientConfig> {
        let mut client = ClientConfig::new(self.api_key()?);
        client.base_url = self.api_url.trim_end_matches('/').to_string();
        client.acquire_timeout = Duration::from_secs(self.acquire_timeout_secs);
        client.request_timeout = Duration::from_secs(self.request_timeout_secs);
        client.max_attempts = self.max_attempts;
        client.backoff_base = Duration::from_millis(self.backoff_base_ms);
        client.matches_cache_ttl = Duration::from_secs(self.matches_cache_ttl_secs);
        client.competitions_cache_ttl = Duration::from_secs(self.competitions_cache_ttl_secs);
        Ok(client)
    }

    pub fn limiter_config(&self) -> RateLimiterConfig {
        RateLimiterConfig {
            capacity: self.rate_limit_capacity,
            refill_period: Duration::from_secs(self.rate_limit_period_secs),
            min_spacing: Duration::from_secs(self.rate_limit_min_spacing_secs),
        }
    }

    pub fn cadence(&self) -> PollCadence {
        PollCadence {
            live: Duration::from_secs(self.live_interval_secs),
            paused: Duration::from_secs(self.paused_interval_secs),
            inter_source_delay: Duration::from_secs(self.inter_source_delay_secs),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &str = "0123456789abcdef0123456789abcdef";

    fn parse(args: &[&str]) -> Config {
        let mut argv = vec!["live-scores"];
        argv.extend_from_slice(args);
        Config::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_defaults() {
        let config = parse(&["--api-key", KEY, "status"]);
        assert_eq!(config.competition_codes(), vec!["PL", "CL", "PD", "BL1", "SA", "FL1"]);
        assert_eq!(config.poll_interval(), Duration::from_secs(30));
        let limiter = config.limiter_config();
        assert_eq!(limiter.capacity, 10);
        assert_eq!(limiter.min_spacing, Duration::from_secs(6));
        let client = config.client_config().unwrap();
        assert_eq!(client.base_url, DEFAULT_BASE_URL);
        assert_eq!(client.max_attempts, 3);
        assert_eq!(config.cadence().inter_source_delay, Duration::from_secs(7));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_competitions_are_normalized() {
        let config = parse(&["--api-key", KEY, "--competitions", "pl, cl,,SA", "status"]);
        assert_eq!(config.competition_codes(), vec!["PL", "CL", "SA"]);
    }

    #[test]
    fn test_missing_or_short_key_is_rejected() {
        let config = Config::try_parse_from(["live-scores", "--api-key", "", "status"]).unwrap();
        assert!(config.validate().is_err());
        let config = parse(&["--api-key", "short", "status"]);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_events_command_needs_no_key() {
        let config = Config::try_parse_from(["live-scores", "--api-key", "", "events", "--limit", "5"]).unwrap();
        assert_eq!(config.command, Command::Events { limit: 5 });
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_capacity_is_rejected() {
        let config = parse(&["--api-key", KEY, "--rate-limit-capacity", "0", "status"]);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_oversized_timeouts_are_rejected() {
        let config = parse(&["--api-key", KEY, "--acquire-timeout-secs", "18446744073709551615", "status"]);
        assert!(config.validate().is_err());
        let config = parse(&["--api-key", KEY, "--request-timeout-secs", "100000", "status"]);
        assert!(config.validate().is_err());
        let config = parse(&["--api-key", KEY, "--request-timeout-secs", "0", "status"]);
        assert!(config.validate().is_err());
        let config = parse(&["--api-key", KEY, "--rate-limit-min-spacing-secs", "120", "status"]);
        assert!(config.validate().is_err());
        let config = parse(&["--api-key", KEY, "--acquire-timeout-secs", "3600", "status"]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_matches_date_range() {
        let config = parse(&[
            "--api-key", KEY, "matches", "--competition", "PL", "--from", "2024-08-16", "--to", "2024-08-18",
        ]);
        assert_eq!(
            config.command,
            Command::Matches {
                competition: Some("PL".into()),
                status: None,
                from: NaiveDate::from_ymd_opt(2024, 8, 16),
                to: NaiveDate::from_ymd_opt(2024, 8, 18),
            }
        );
        assert!(config.validate().is_ok());

        let reversed = parse(&["--api-key", KEY, "matches", "--from", "2024-08-18", "--to", "2024-08-16"]);
        assert!(reversed.validate().is_err());
        assert!(Config::try_parse_from(["live-scores", "matches", "--from", "16/08/2024"]).is_err());
    }

    #[test]
    fn test_team_and_detailed_stats_commands() {
        assert_eq!(parse(&["--api-key", KEY, "team", "--id", "57"]).command, Command::Team { id: 57 });
        assert_eq!(parse(&["--api-key", KEY, "detailed-stats"]).command, Command::DetailedStats);
        assert_eq!(
            parse(&["--api-key", KEY, "competitions", "--areas", "2072"]).command,
            Command::Competitions {
                areas: Some("2072".into())
            }
        );
    }

    #[test]
    fn test_monitor_flags() {
        let config = parse(&["--api-key", KEY, "monitor", "--duration-secs", "60", "--dashboard"]);
        assert_eq!(
            config.command,
            Command::Monitor {
                duration_secs: Some(60),
                dashboard: true
            }
        );
    }
}
