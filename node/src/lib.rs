//! Tenspot node: configuration, SQL ledgers, the settlement scheduler and the
//! request surface the binaries drive.

use anyhow::Context;
use chrono::FixedOffset;
use serde::{Deserialize, Serialize};
use std::{
    fmt,
    net::IpAddr,
    path::{Path, PathBuf},
    str::FromStr,
    time::Duration,
};
use tenspot_execution::{GameRules, Ledger, LedgerTx, PayoutPolicy, ShopHours, StoreError};
use tenspot_types::{Amount, GameSettings, SettingsError, SpotLabels};
use thiserror::Error;
use tracing::Level;
use url::Url;

mod backoff;
pub mod defaults;
pub mod operator;
pub mod postgres;
mod rows;
pub mod scheduler;
pub mod service;
pub mod sqlite;

pub use backoff::RetryPolicy;
pub use service::{Reply, Service};

/// Configuration for a tenspot node, loaded from YAML.
#[derive(Deserialize, Serialize)]
pub struct Config {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_log_json")]
    pub log_json: bool,

    #[serde(default)]
    pub sqlite_path: Option<String>,
    #[serde(default)]
    pub postgres_url: Option<String>,
    #[serde(default = "default_postgres_pool_size")]
    pub postgres_pool_size: usize,
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,

    #[serde(default = "default_utc_offset_minutes")]
    pub utc_offset_minutes: i32,
    #[serde(default = "default_settle_delay_secs")]
    pub settle_delay_secs: u64,
    #[serde(default = "default_public_results")]
    pub public_results: usize,

    // Seed values for the stored game settings.
    #[serde(default = "default_round_minutes")]
    pub round_minutes: u32,
    #[serde(default = "default_target_rtp")]
    pub target_rtp: u32,
    #[serde(default = "default_min_round_rtp")]
    pub min_round_rtp: u32,
    #[serde(default = "default_max_round_rtp")]
    pub max_round_rtp: u32,

    #[serde(default)]
    pub spot_labels: SpotLabels,
    /// Minor units.
    #[serde(default = "default_unit_price")]
    pub unit_price: u64,
    #[serde(default = "default_payout_multiplier")]
    pub payout_multiplier: u64,
    #[serde(default = "default_commission_bps")]
    pub commission_bps: u64,
    /// Minor units.
    #[serde(default = "default_engagement_threshold")]
    pub engagement_threshold: u64,
    #[serde(default = "default_win_probability_percent")]
    pub win_probability_percent: u32,
    #[serde(default = "default_control_factor")]
    pub control_factor: f64,
    #[serde(default = "default_cancel_margin_secs")]
    pub cancel_margin_secs: u64,
    #[serde(default = "default_open_hour")]
    pub open_hour: u32,
    #[serde(default = "default_close_hour")]
    pub close_hour: u32,
    #[serde(default)]
    pub payout_policy: PayoutPolicy,

    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    #[serde(default = "default_retry_base_ms")]
    pub retry_base_ms: u64,
    #[serde(default = "default_retry_max_ms")]
    pub retry_max_ms: u64,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid log level: {value}")]
    InvalidLogLevel { value: String },
    #[error("{field} must be > 0 (got {value})")]
    InvalidNonZero { field: &'static str, value: u64 },
    #[error("{field} must be at most {max} (got {value})")]
    OutOfRange {
        field: &'static str,
        value: String,
        max: String,
    },
    #[error("open_hour ({open}) must not be after close_hour ({close})")]
    InvertedHours { open: u32, close: u32 },
    #[error("utc_offset_minutes out of range: {0}")]
    InvalidOffset(i32),
    #[error(transparent)]
    InvalidSettings(#[from] SettingsError),
    #[error("exactly one of sqlite_path or postgres_url must be set")]
    Database,
    #[error("{field} must be a valid URL: {value}")]
    InvalidUrl { field: &'static str, value: String },
    #[error("{field} URL scheme must be postgres or postgresql: {value}")]
    InvalidUrlScheme { field: &'static str, value: String },
    #[error("postgres host {host} is public; set {override_var}=1 to override")]
    PublicHost {
        host: String,
        override_var: &'static str,
    },
}

/// Where the ledger lives.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Database {
    Sqlite(PathBuf),
    Postgres(String),
}

pub struct ValidatedConfig {
    pub log_level: Level,
    pub log_json: bool,

    pub database: Database,
    pub postgres_pool_size: usize,
    pub busy_timeout: Duration,

    pub offset: FixedOffset,
    pub settle_delay: chrono::Duration,
    pub public_results: usize,

    pub settings: GameSettings,
    pub rules: GameRules,
    pub retry: RetryPolicy,
}

struct RedactedConfig<'a>(&'a Config);

impl fmt::Debug for RedactedConfig<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let cfg = self.0;
        f.debug_struct("Config")
            .field("log_level", &cfg.log_level)
            .field("log_json", &cfg.log_json)
            .field("sqlite_path", &cfg.sqlite_path)
            .field(
                "postgres_url",
                &cfg.postgres_url.as_deref().map(redact_url),
            )
            .field("postgres_pool_size", &cfg.postgres_pool_size)
            .field("utc_offset_minutes", &cfg.utc_offset_minutes)
            .field("round_minutes", &cfg.round_minutes)
            .field("target_rtp", &cfg.target_rtp)
            .field("min_round_rtp", &cfg.min_round_rtp)
            .field("max_round_rtp", &cfg.max_round_rtp)
            .field("unit_price", &cfg.unit_price)
            .field("payout_multiplier", &cfg.payout_multiplier)
            .field("commission_bps", &cfg.commission_bps)
            .field("engagement_threshold", &cfg.engagement_threshold)
            .field("win_probability_percent", &cfg.win_probability_percent)
            .field("control_factor", &cfg.control_factor)
            .field("cancel_margin_secs", &cfg.cancel_margin_secs)
            .field("settle_delay_secs", &cfg.settle_delay_secs)
            .field("open_hour", &cfg.open_hour)
            .field("close_hour", &cfg.close_hour)
            .field("payout_policy", &cfg.payout_policy)
            .finish()
    }
}

/// Strip credentials from a connection URL before logging it.
pub fn redact_url(value: &str) -> String {
    match Url::parse(value) {
        Ok(mut url) => {
            if url.password().is_some() {
                let _ = url.set_password(Some("redacted"));
            }
            url.to_string()
        }
        Err(_) => "<unparseable>".to_string(),
    }
}

fn default_log_level() -> String {
    defaults::DEFAULT_LOG_LEVEL.to_string()
}

fn default_log_json() -> bool {
    defaults::DEFAULT_LOG_JSON
}

fn default_postgres_pool_size() -> usize {
    defaults::DEFAULT_POSTGRES_POOL_SIZE
}

fn default_busy_timeout_ms() -> u64 {
    defaults::DEFAULT_BUSY_TIMEOUT_MS
}

fn default_utc_offset_minutes() -> i32 {
    tenspot_types::DEFAULT_UTC_OFFSET_MINUTES
}

fn default_settle_delay_secs() -> u64 {
    tenspot_types::DEFAULT_SETTLE_DELAY_SECS
}

fn default_public_results() -> usize {
    tenspot_types::DEFAULT_PUBLIC_RESULTS
}

fn default_round_minutes() -> u32 {
    tenspot_types::DEFAULT_ROUND_MINUTES
}

fn default_target_rtp() -> u32 {
    tenspot_types::DEFAULT_TARGET_RTP
}

fn default_min_round_rtp() -> u32 {
    tenspot_types::DEFAULT_MIN_ROUND_RTP
}

fn default_max_round_rtp() -> u32 {
    tenspot_types::DEFAULT_MAX_ROUND_RTP
}

fn default_unit_price() -> u64 {
    tenspot_types::DEFAULT_UNIT_PRICE
}

fn default_payout_multiplier() -> u64 {
    tenspot_types::DEFAULT_PAYOUT_MULTIPLIER
}

fn default_commission_bps() -> u64 {
    tenspot_types::DEFAULT_COMMISSION_BPS
}

fn default_engagement_threshold() -> u64 {
    tenspot_types::DEFAULT_ENGAGEMENT_THRESHOLD
}

fn default_win_probability_percent() -> u32 {
    tenspot_types::DEFAULT_WIN_PROBABILITY_PERCENT
}

fn default_control_factor() -> f64 {
    tenspot_types::DEFAULT_CONTROL_FACTOR
}

fn default_cancel_margin_secs() -> u64 {
    tenspot_types::DEFAULT_CANCEL_MARGIN_SECS
}

fn default_open_hour() -> u32 {
    tenspot_types::DEFAULT_OPEN_HOUR
}

fn default_close_hour() -> u32 {
    tenspot_types::DEFAULT_CLOSE_HOUR
}

fn default_retry_attempts() -> u32 {
    defaults::DEFAULT_RETRY_ATTEMPTS
}

fn default_retry_base_ms() -> u64 {
    defaults::DEFAULT_RETRY_BASE_MS
}

fn default_retry_max_ms() -> u64 {
    defaults::DEFAULT_RETRY_MAX_MS
}

fn ensure_nonzero(field: &'static str, value: u64) -> Result<(), ConfigError> {
    if value == 0 {
        return Err(ConfigError::InvalidNonZero { field, value });
    }
    Ok(())
}

fn ensure_at_most<T: PartialOrd + ToString>(
    field: &'static str,
    value: T,
    max: T,
) -> Result<(), ConfigError> {
    if value > max {
        return Err(ConfigError::OutOfRange {
            field,
            value: value.to_string(),
            max: max.to_string(),
        });
    }
    Ok(())
}

/// Postgres must live on a private network unless an override is set.
pub fn validate_postgres_url(value: &str) -> Result<(), ConfigError> {
    if env_flag(ALLOW_PUBLIC_POSTGRES) {
        return Ok(());
    }

    let parsed = Url::parse(value).map_err(|_| ConfigError::InvalidUrl {
        field: "postgres_url",
        value: redact_url(value),
    })?;
    let scheme = parsed.scheme();
    if scheme != "postgres" && scheme != "postgresql" {
        return Err(ConfigError::InvalidUrlScheme {
            field: "postgres_url",
            value: redact_url(value),
        });
    }

    let host = parsed.host_str().ok_or_else(|| ConfigError::InvalidUrl {
        field: "postgres_url",
        value: redact_url(value),
    })?;
    if host.eq_ignore_ascii_case("localhost") {
        return Ok(());
    }

    let bare = host.trim_start_matches('[').trim_end_matches(']');
    if let Ok(ip) = bare.parse::<IpAddr>() {
        if is_private_ip(ip) {
            return Ok(());
        }
        return Err(ConfigError::PublicHost {
            host: host.to_string(),
            override_var: ALLOW_PUBLIC_POSTGRES,
        });
    }

    if env_flag(ALLOW_POSTGRES_HOSTNAME) {
        return Ok(());
    }
    Err(ConfigError::PublicHost {
        host: host.to_string(),
        override_var: ALLOW_POSTGRES_HOSTNAME,
    })
}

const ALLOW_PUBLIC_POSTGRES: &str = "TENSPOT_POSTGRES_ALLOW_PUBLIC";
const ALLOW_POSTGRES_HOSTNAME: &str = "TENSPOT_POSTGRES_ALLOW_HOSTNAME";

fn env_flag(name: &str) -> bool {
    matches!(
        std::env::var(name).as_deref(),
        Ok("1") | Ok("true") | Ok("TRUE") | Ok("yes") | Ok("YES")
    )
}

fn is_private_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => v4.is_private() || v4.is_loopback(),
        IpAddr::V6(v6) => v6.is_loopback() || v6.is_unique_local() || v6.is_unicast_link_local(),
    }
}

/// Read and parse a YAML configuration file.
pub fn load_config(path: &Path) -> anyhow::Result<Config> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Could not read config file {}", path.display()))?;
    serde_yaml::from_str(&contents).context("Could not parse config file")
}

/// Write `settings` unless the ledger already holds settings. Returns whether
/// anything was written; stored settings always win over configuration.
pub fn seed_settings<L: Ledger>(ledger: &L, settings: &GameSettings) -> Result<bool, StoreError> {
    let mut tx = ledger.begin()?;
    match tx.settings() {
        Ok(_) => Ok(false),
        Err(StoreError::Missing { .. }) => {
            tx.put_settings(settings)?;
            tx.commit()?;
            Ok(true)
        }
        Err(err) => Err(err),
    }
}

/// Install the global subscriber: human-readable by default, JSON lines when
/// the node runs under a log shipper.
pub fn init_logging(level: Level, json: bool) {
    let builder = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false);
    let result = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    if let Err(err) = result {
        eprintln!("logging already initialized: {err}");
    }
}

impl Config {
    pub fn redacted_debug(&self) -> impl fmt::Debug + '_ {
        RedactedConfig(self)
    }

    pub fn validate(self) -> Result<ValidatedConfig, ConfigError> {
        let log_level =
            Level::from_str(&self.log_level).map_err(|_| ConfigError::InvalidLogLevel {
                value: self.log_level.clone(),
            })?;

        let database = match (self.sqlite_path, self.postgres_url) {
            (Some(path), None) => Database::Sqlite(PathBuf::from(path)),
            (None, Some(url)) => {
                validate_postgres_url(&url)?;
                Database::Postgres(url)
            }
            _ => return Err(ConfigError::Database),
        };
        ensure_nonzero("postgres_pool_size", self.postgres_pool_size as u64)?;
        ensure_nonzero("busy_timeout_ms", self.busy_timeout_ms)?;

        let settings = GameSettings {
            target_rtp: self.target_rtp,
            min_round_rtp: self.min_round_rtp,
            max_round_rtp: self.max_round_rtp,
            round_minutes: self.round_minutes,
        };
        settings.validate()?;

        ensure_nonzero("unit_price", self.unit_price)?;
        ensure_nonzero("payout_multiplier", self.payout_multiplier)?;
        ensure_at_most("commission_bps", self.commission_bps, 10_000)?;
        ensure_at_most("win_probability_percent", self.win_probability_percent, 100)?;
        if !(self.control_factor.is_finite() && self.control_factor >= 0.0) {
            return Err(ConfigError::OutOfRange {
                field: "control_factor",
                value: self.control_factor.to_string(),
                max: "a finite non-negative number".to_string(),
            });
        }
        ensure_at_most("open_hour", self.open_hour, 23)?;
        ensure_at_most("close_hour", self.close_hour, 23)?;
        if self.open_hour > self.close_hour {
            return Err(ConfigError::InvertedHours {
                open: self.open_hour,
                close: self.close_hour,
            });
        }
        ensure_at_most("cancel_margin_secs", self.cancel_margin_secs, 86_400)?;
        ensure_at_most("settle_delay_secs", self.settle_delay_secs, 3_600)?;
        ensure_nonzero("public_results", self.public_results as u64)?;
        ensure_nonzero("retry_base_ms", self.retry_base_ms)?;

        let offset = FixedOffset::east_opt(self.utc_offset_minutes.saturating_mul(60))
            .ok_or(ConfigError::InvalidOffset(self.utc_offset_minutes))?;

        let rules = GameRules {
            labels: self.spot_labels,
            unit_price: Amount::from_minor(self.unit_price),
            payout_multiplier: self.payout_multiplier,
            commission_bps: self.commission_bps,
            engagement_threshold: Amount::from_minor(self.engagement_threshold),
            win_probability_percent: self.win_probability_percent,
            control_factor: self.control_factor,
            cancel_margin: chrono::Duration::seconds(self.cancel_margin_secs as i64),
            shop_hours: ShopHours {
                open_hour: self.open_hour,
                close_hour: self.close_hour,
            },
            payout_policy: self.payout_policy,
        };

        Ok(ValidatedConfig {
            log_level,
            log_json: self.log_json,
            database,
            postgres_pool_size: self.postgres_pool_size,
            busy_timeout: Duration::from_millis(self.busy_timeout_ms),
            offset,
            settle_delay: chrono::Duration::seconds(self.settle_delay_secs as i64),
            public_results: self.public_results,
            settings,
            rules,
            retry: RetryPolicy {
                attempts: self.retry_attempts,
                base: Duration::from_millis(self.retry_base_ms),
                max: Duration::from_millis(self.retry_max_ms.max(self.retry_base_ms)),
            },
        })
    }
}
