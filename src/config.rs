use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use tracing::info;
use validator::{Validate, ValidationError};

/// Default values for configuration
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const DEFAULT_PORT: u16 = 8080;
const CONFIG_DIR: &str = "config";
const DEFAULT_SESSION_TTL_DAYS: i64 = 7;
const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 900;
const DEFAULT_STUCK_THRESHOLD_SECS: i64 = 600;
const DEFAULT_WEBHOOK_TOLERANCE_SECS: u64 = 300;
const DEFAULT_GATEWAY_TIMEOUT_SECS: u64 = 10;
const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 1024;

fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}
fn default_environment() -> String {
    DEFAULT_ENV.to_string()
}
fn default_session_ttl_days() -> i64 {
    DEFAULT_SESSION_TTL_DAYS
}
fn default_sweep_interval_secs() -> u64 {
    DEFAULT_SWEEP_INTERVAL_SECS
}
fn default_stuck_threshold_secs() -> i64 {
    DEFAULT_STUCK_THRESHOLD_SECS
}
fn default_webhook_tolerance_secs() -> u64 {
    DEFAULT_WEBHOOK_TOLERANCE_SECS
}
fn default_gateway_timeout_secs() -> u64 {
    DEFAULT_GATEWAY_TIMEOUT_SECS
}
fn default_event_channel_capacity() -> usize {
    DEFAULT_EVENT_CHANNEL_CAPACITY
}
fn default_db_max_connections() -> u32 {
    10
}
fn default_db_min_connections() -> u32 {
    1
}
fn default_stripe_api_base() -> String {
    "https://api.stripe.com".to_string()
}
fn default_orange_api_base() -> String {
    "https://api.orange.com/orange-money-webpay/dev/v1".to_string()
}
fn default_orange_token_url() -> String {
    "https://api.orange.com/oauth/v3/token".to_string()
}

fn validate_public_base_url(url: &str) -> Result<(), ValidationError> {
    match url::Url::parse(url) {
        Ok(parsed) if parsed.scheme() == "http" || parsed.scheme() == "https" => Ok(()),
        _ => {
            let mut err = ValidationError::new("url");
            err.message = Some("public_base_url must be an absolute http(s) URL".into());
            Err(err)
        }
    }
}

/// Stripe-style gateway credentials.
#[derive(Clone, Debug, Deserialize, Default)]
pub struct StripeConfig {
    #[serde(default)]
    pub secret_key: String,
    #[serde(default)]
    pub webhook_secret: String,
    #[serde(default = "default_stripe_api_base")]
    pub api_base: String,
    /// Timestamp tolerance for webhook signatures (seconds)
    #[serde(default = "default_webhook_tolerance_secs")]
    pub webhook_tolerance_secs: u64,
}

/// Orange-Money-style gateway credentials (OAuth redirect flow).
#[derive(Clone, Debug, Deserialize, Default)]
pub struct OrangeMoneyConfig {
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
    #[serde(default)]
    pub merchant_key: String,
    #[serde(default = "default_orange_api_base")]
    pub api_base: String,
    #[serde(default = "default_orange_token_url")]
    pub token_url: String,
}

/// Application configuration with validation
#[derive(Clone, Debug, Deserialize, Validate)]
pub struct AppConfig {
    /// Database connection URL
    pub database_url: String,

    /// Redis connection URL (webhook dedup + health only; never correctness)
    pub redis_url: String,

    /// Server host address
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Application environment
    #[serde(default = "default_environment")]
    pub environment: String,

    /// Logging level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log in JSON format (structured logging)
    #[serde(default)]
    pub log_json: bool,

    /// Whether to run database migrations on startup
    #[serde(default)]
    pub auto_migrate: bool,

    /// DB pool sizing
    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,
    #[serde(default = "default_db_min_connections")]
    pub db_min_connections: u32,

    /// Publicly reachable base URL used to build gateway callback URLs.
    /// Redirect-flow providers reject loopback hosts, so this must resolve
    /// from the provider's side.
    #[validate(custom = "validate_public_base_url")]
    pub public_base_url: String,

    /// Payment session time-to-live in days
    #[serde(default = "default_session_ttl_days")]
    pub session_ttl_days: i64,

    /// Reconciliation sweep interval (seconds)
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    /// Age beyond which a pending session is considered stuck (seconds)
    #[serde(default = "default_stuck_threshold_secs")]
    pub stuck_threshold_secs: i64,

    /// Timeout applied to every outbound gateway call (seconds)
    #[serde(default = "default_gateway_timeout_secs")]
    pub gateway_timeout_secs: u64,

    /// Flat shipping fee applied when physical products ship (minor units)
    #[serde(default)]
    pub shipping_fee_minor: i64,

    /// Event channel capacity for async event processing
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,

    #[serde(default)]
    pub stripe: StripeConfig,

    #[serde(default)]
    pub orange_money: OrangeMoneyConfig,
}

impl AppConfig {
    /// Minimal constructor used by tests and tooling.
    pub fn new(database_url: String, redis_url: String, host: String, port: u16) -> Self {
        Self {
            database_url,
            redis_url,
            host,
            port,
            environment: default_environment(),
            log_level: default_log_level(),
            log_json: false,
            auto_migrate: false,
            db_max_connections: default_db_max_connections(),
            db_min_connections: default_db_min_connections(),
            public_base_url: "https://tickets.example.com".to_string(),
            session_ttl_days: default_session_ttl_days(),
            sweep_interval_secs: default_sweep_interval_secs(),
            stuck_threshold_secs: default_stuck_threshold_secs(),
            gateway_timeout_secs: default_gateway_timeout_secs(),
            shipping_fee_minor: 0,
            event_channel_capacity: default_event_channel_capacity(),
            stripe: StripeConfig::default(),
            orange_money: OrangeMoneyConfig::default(),
        }
    }

    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }
}

/// Loads configuration from layered sources: config/default.toml, an
/// environment-specific file, and `APP_`-prefixed environment variables.
pub fn load_config() -> Result<AppConfig, ConfigError> {
    let run_env = std::env::var("RUN_ENV").unwrap_or_else(|_| DEFAULT_ENV.to_string());

    let cfg: AppConfig = Config::builder()
        .add_source(File::with_name(&format!("{CONFIG_DIR}/default")).required(false))
        .add_source(File::with_name(&format!("{CONFIG_DIR}/{run_env}")).required(false))
        .add_source(Environment::with_prefix("APP").separator("__"))
        .build()?
        .try_deserialize()?;

    cfg.validate()
        .map_err(|e| ConfigError::Message(format!("invalid configuration: {e}")))?;

    info!(environment = %cfg.environment, "Configuration loaded");
    Ok(cfg)
}

/// Initializes the global tracing subscriber.
pub fn init_tracing(log_level: &str, json: bool) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level.to_string()));

    if json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let cfg = AppConfig::new(
            "sqlite::memory:".into(),
            "redis://127.0.0.1:6379".into(),
            "127.0.0.1".into(),
            8080,
        );
        assert_eq!(cfg.session_ttl_days, 7);
        assert_eq!(cfg.sweep_interval_secs, 900);
        assert_eq!(cfg.stuck_threshold_secs, 600);
        assert!(!cfg.is_production());
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_public_base_url_validation() {
        let mut cfg = AppConfig::new(
            "sqlite::memory:".into(),
            "redis://127.0.0.1:6379".into(),
            "127.0.0.1".into(),
            8080,
        );
        cfg.public_base_url = "not a url".into();
        assert!(cfg.validate().is_err());
    }
}
