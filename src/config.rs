use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{AppError, Result};

pub const PROVIDER_BASE_URL: &str = "https://open.sportnanoapi.com/api/v5/football";

pub const DETAIL_LIVE_ENDPOINT: &str = "/match/detail_live";
pub const DIARY_ENDPOINT: &str = "/match/diary";
pub const TEAM_STATS_ENDPOINT: &str = "/match/team_stats/detail";
pub const INCIDENTS_ENDPOINT: &str = "/match/incidents/detail";
pub const TREND_ENDPOINT: &str = "/match/trend/detail";
pub const PLAYER_STATS_ENDPOINT: &str = "/match/player_stats/detail";
pub const SEASON_TABLE_ENDPOINT: &str = "/season/table/detail";

/// Capacity of the reconciler → finalizer "match ended" channel.
/// When full, the periodic finalizer batch picks the match up instead.
pub const CHANNEL_CAPACITY: usize = 256;

/// Backoff is doubled per attempt, capped here.
pub const MAX_RETRY_BACKOFF_MS: u64 = 10_000;

#[derive(Debug, Clone)]
pub struct BreakerConfig {
    /// Consecutive failures before the breaker opens.
    pub failure_threshold: u32,
    /// Time spent OPEN before a probe is allowed.
    pub cooldown: Duration,
}

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub default_interval: Duration,
    /// endpoint path → minimum spacing between granted calls
    pub per_endpoint: HashMap<String, Duration>,
}

impl RateLimitConfig {
    pub fn interval_for(&self, key: &str) -> Duration {
        self.per_endpoint
            .get(key)
            .copied()
            .unwrap_or(self.default_interval)
    }
}

#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub base_url: String,
    pub user: String,
    pub secret: String,
    pub timeout: Duration,
    /// Attempts after the first one, transient errors only.
    pub max_retries: u32,
    pub retry_backoff: Duration,
    pub breaker: BreakerConfig,
    pub rate_limit: RateLimitConfig,
}

#[derive(Debug, Clone)]
pub struct WatchdogConfig {
    pub interval: Duration,
    /// How long past kickoff a NOT_STARTED match is tolerated.
    pub grace_secs: i64,
    pub lookback_secs: i64,
    pub batch_size: i64,
    /// Pause between consecutive reconcile calls in one scan.
    pub call_delay: Duration,
    pub live_interval: Duration,
}

#[derive(Debug, Clone)]
pub struct FinalizerConfig {
    pub interval: Duration,
    pub batch_size: i64,
    pub lookback_secs: i64,
    pub match_delay: Duration,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub log_level: String,
    pub db_path: String,
    pub provider: ProviderConfig,
    /// Without a provider watermark, a second update for the same match is
    /// only accepted once this many seconds have passed since the last one.
    pub dedupe_window_secs: i64,
    pub watchdog: WatchdogConfig,
    pub finalizer: FinalizerConfig,
    pub diary_interval: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let mut per_endpoint = HashMap::new();
        per_endpoint.insert(
            DETAIL_LIVE_ENDPOINT.to_string(),
            Duration::from_millis(env_parse("RATE_LIMIT_DETAIL_LIVE_MS", 1000)?),
        );
        per_endpoint.insert(
            DIARY_ENDPOINT.to_string(),
            Duration::from_millis(env_parse("RATE_LIMIT_DIARY_MS", 2000)?),
        );

        let user = std::env::var("PROVIDER_USER").unwrap_or_default();
        let secret = std::env::var("PROVIDER_SECRET").unwrap_or_default();
        if user.is_empty() || secret.is_empty() {
            return Err(AppError::Config(
                "PROVIDER_USER and PROVIDER_SECRET must be set".to_string(),
            ));
        }

        Ok(Self {
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            db_path: std::env::var("DB_PATH").unwrap_or_else(|_| "matches.db".to_string()),
            provider: ProviderConfig {
                base_url: std::env::var("PROVIDER_BASE_URL")
                    .unwrap_or_else(|_| PROVIDER_BASE_URL.to_string()),
                user,
                secret,
                timeout: Duration::from_secs(env_parse("HTTP_TIMEOUT_SECS", 20)?),
                max_retries: env_parse("PROVIDER_MAX_RETRIES", 2)?,
                retry_backoff: Duration::from_millis(env_parse("PROVIDER_RETRY_BACKOFF_MS", 500)?),
                breaker: BreakerConfig {
                    failure_threshold: env_parse("BREAKER_FAILURE_THRESHOLD", 5)?,
                    cooldown: Duration::from_secs(env_parse("BREAKER_COOLDOWN_SECS", 30)?),
                },
                rate_limit: RateLimitConfig {
                    default_interval: Duration::from_millis(env_parse("RATE_LIMIT_DEFAULT_MS", 200)?),
                    per_endpoint,
                },
            },
            dedupe_window_secs: env_parse("DEDUPE_WINDOW_SECS", 5)?,
            watchdog: WatchdogConfig {
                interval: Duration::from_secs(env_parse("WATCHDOG_INTERVAL_SECS", 60)?),
                grace_secs: env_parse("WATCHDOG_GRACE_SECS", 120)?,
                lookback_secs: env_parse::<i64>("WATCHDOG_LOOKBACK_MINUTES", 120)? * 60,
                batch_size: env_parse("WATCHDOG_BATCH_SIZE", 50)?,
                call_delay: Duration::from_millis(env_parse("WATCHDOG_CALL_DELAY_MS", 250)?),
                live_interval: Duration::from_secs(env_parse("LIVE_SYNC_INTERVAL_SECS", 30)?),
            },
            finalizer: FinalizerConfig {
                interval: Duration::from_secs(env_parse("FINALIZER_INTERVAL_SECS", 300)?),
                batch_size: env_parse("FINALIZER_BATCH_SIZE", 20)?,
                lookback_secs: env_parse::<i64>("FINALIZER_LOOKBACK_HOURS", 48)? * 3600,
                match_delay: Duration::from_millis(env_parse("FINALIZER_MATCH_DELAY_MS", 500)?),
            },
            diary_interval: Duration::from_secs(env_parse("DIARY_SYNC_INTERVAL_SECS", 3600)?),
        })
    }
}

/// Read `key` from the environment, falling back to `default` when unset.
/// A value that is set but does not parse is a configuration error.
fn env_parse<T: FromStr>(key: &str, default: T) -> Result<T> {
    match std::env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse::<T>()
            .map_err(|_| AppError::Config(format!("{key} has an invalid value: {raw:?}"))),
        _ => Ok(default),
    }
}
