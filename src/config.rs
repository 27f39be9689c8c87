use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use std::fmt;
use std::path::Path;
use thiserror::Error;
use tracing::{error, info};
use validator::{Validate, ValidationError, ValidationErrors};

/// Default values for configuration
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const DEFAULT_PORT: u16 = 8080;
const CONFIG_DIR: &str = "config";
const DEFAULT_DUITKU_ENDPOINT: &str = "https://api-sandbox.duitku.com/api/merchant/createInvoice";
const DEFAULT_EXPIRY_PERIOD_MINUTES: u32 = 30;
const DEFAULT_GATEWAY_TIMEOUT_SECS: u64 = 15;
const DEV_DEFAULT_JWT_SECRET: &str = "development_only_jwt_secret_change_me_before_deploying";

/// Duitku payment gateway settings.
///
/// `api_key` is the merchant secret used for both signature schemes. It is
/// redacted from `Debug` output.
#[derive(Clone, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct DuitkuConfig {
    #[validate(length(min = 1))]
    pub merchant_code: String,

    #[validate(length(min = 1))]
    pub api_key: String,

    /// Full URL of the invoice creation endpoint
    #[serde(default = "default_duitku_endpoint")]
    #[validate(url)]
    pub endpoint: String,

    /// URL the gateway posts payment notifications to
    #[validate(url)]
    pub callback_url: String,

    /// URL the customer is redirected to after paying
    #[validate(url)]
    pub return_url: String,

    /// Invoice expiry window in minutes
    #[serde(default = "default_expiry_period_minutes")]
    #[validate(range(min = 1, max = 1440))]
    pub expiry_period_minutes: u32,

    /// Hard timeout for a single invoice request
    #[serde(default = "default_gateway_timeout_secs")]
    #[validate(range(min = 1, max = 120))]
    pub timeout_secs: u64,
}

impl fmt::Debug for DuitkuConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DuitkuConfig")
            .field("merchant_code", &self.merchant_code)
            .field("api_key", &"<redacted>")
            .field("endpoint", &self.endpoint)
            .field("callback_url", &self.callback_url)
            .field("return_url", &self.return_url)
            .field("expiry_period_minutes", &self.expiry_period_minutes)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

impl DuitkuConfig {
    pub fn new(
        merchant_code: impl Into<String>,
        api_key: impl Into<String>,
        endpoint: impl Into<String>,
        callback_url: impl Into<String>,
        return_url: impl Into<String>,
    ) -> Self {
        Self {
            merchant_code: merchant_code.into(),
            api_key: api_key.into(),
            endpoint: endpoint.into(),
            callback_url: callback_url.into(),
            return_url: return_url.into(),
            expiry_period_minutes: default_expiry_period_minutes(),
            timeout_secs: default_gateway_timeout_secs(),
        }
    }
}

/// Per-IP limiter applied to the checkout route
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct CheckoutRateLimitConfig {
    /// Tokens added back to each bucket per second
    #[serde(default = "default_refill_per_second")]
    #[validate(range(min = 1))]
    pub refill_per_second: u32,

    /// Bucket capacity
    #[serde(default = "default_burst")]
    #[validate(range(min = 1))]
    pub burst: u32,

    /// Upper bound on the number of client buckets held in memory
    #[serde(default = "default_max_tracked_clients")]
    #[validate(range(min = 1))]
    pub max_tracked_clients: usize,

    /// Buckets untouched for this long are dropped by the sweeper
    #[serde(default = "default_idle_ttl_secs")]
    pub idle_ttl_secs: u64,
}

impl Default for CheckoutRateLimitConfig {
    fn default() -> Self {
        Self {
            refill_per_second: default_refill_per_second(),
            burst: default_burst(),
            max_tracked_clients: default_max_tracked_clients(),
            idle_ttl_secs: default_idle_ttl_secs(),
        }
    }
}

/// Application configuration structure with validation
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// Database connection URL
    pub database_url: String,

    /// JWT secret key
    #[validate(length(min = 32), custom = "validate_jwt_secret")]
    pub jwt_secret: String,

    /// JWT lifetime in seconds (5min - 7d)
    #[serde(default = "default_jwt_expiration_secs")]
    #[validate(range(min = 300, max = 604800))]
    pub jwt_expiration_secs: u64,

    /// JWT issuer name
    #[serde(default = "default_auth_issuer")]
    pub auth_issuer: String,

    /// JWT audience
    #[serde(default = "default_auth_audience")]
    pub auth_audience: String,

    /// Server host address
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Application environment
    pub environment: String,

    /// Logging level
    #[serde(default = "default_log_level")]
    #[validate(custom = "validate_log_level")]
    pub log_level: String,

    /// Log in JSON format (structured logging)
    #[serde(default)]
    pub log_json: bool,

    /// Whether to run database migrations on startup
    #[serde(default)]
    pub auto_migrate: bool,

    /// CORS: comma-separated list of allowed origins (production)
    #[serde(default)]
    pub cors_allowed_origins: Option<String>,

    /// Allow permissive CORS fallback
    #[serde(default)]
    pub cors_allow_any_origin: bool,

    /// DB pool: max connections
    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,

    /// DB pool: min connections
    #[serde(default = "default_db_min_connections")]
    pub db_min_connections: u32,

    /// DB timeouts (seconds)
    #[serde(default = "default_db_connect_timeout_secs")]
    pub db_connect_timeout_secs: u64,
    #[serde(default = "default_db_idle_timeout_secs")]
    pub db_idle_timeout_secs: u64,
    #[serde(default = "default_db_acquire_timeout_secs")]
    pub db_acquire_timeout_secs: u64,

    /// Whole-request timeout applied by the HTTP stack
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Payment gateway
    #[validate]
    pub duitku: DuitkuConfig,

    /// Checkout rate limiting
    #[serde(default)]
    #[validate]
    pub checkout_rate_limit: CheckoutRateLimitConfig,
}

impl AppConfig {
    /// Creates a new configuration
    pub fn new(
        database_url: String,
        jwt_secret: String,
        host: String,
        port: u16,
        environment: String,
        duitku: DuitkuConfig,
    ) -> Self {
        Self {
            database_url,
            jwt_secret,
            jwt_expiration_secs: default_jwt_expiration_secs(),
            auth_issuer: default_auth_issuer(),
            auth_audience: default_auth_audience(),
            host,
            port,
            environment,
            log_level: default_log_level(),
            log_json: false,
            auto_migrate: false,
            cors_allowed_origins: None,
            cors_allow_any_origin: false,
            db_max_connections: default_db_max_connections(),
            db_min_connections: default_db_min_connections(),
            db_connect_timeout_secs: default_db_connect_timeout_secs(),
            db_idle_timeout_secs: default_db_idle_timeout_secs(),
            db_acquire_timeout_secs: default_db_acquire_timeout_secs(),
            request_timeout_secs: default_request_timeout_secs(),
            duitku,
            checkout_rate_limit: CheckoutRateLimitConfig::default(),
        }
    }

    /// Gets database URL reference
    pub fn database_url(&self) -> &str {
        &self.database_url
    }

    /// Gets log level reference
    pub fn log_level(&self) -> &str {
        &self.log_level
    }

    /// Checks if running in production environment
    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }

    /// Checks if running in development environment
    pub fn is_development(&self) -> bool {
        self.environment.eq_ignore_ascii_case("development")
    }

    /// Returns true if explicit CORS origins are configured
    pub fn has_cors_allowed_origins(&self) -> bool {
        self.cors_allowed_origins
            .as_ref()
            .map(|raw| raw.split(',').any(|origin| !origin.trim().is_empty()))
            .unwrap_or(false)
    }

    /// Whether we should fall back to permissive CORS
    pub fn should_allow_permissive_cors(&self) -> bool {
        self.is_development() || self.cors_allow_any_origin
    }

    fn validate_additional_constraints(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();

        if !self.should_allow_permissive_cors() && !self.has_cors_allowed_origins() {
            let mut err = ValidationError::new("cors_allowed_origins_required");
            err.message = Some(
                "Set APP__CORS_ALLOWED_ORIGINS for non-development environments or explicitly opt-in via APP__CORS_ALLOW_ANY_ORIGIN=true".into(),
            );
            errors.add("cors_allowed_origins", err);
        }

        if !self.is_development() && self.jwt_secret.trim() == DEV_DEFAULT_JWT_SECRET {
            let mut err = ValidationError::new("jwt_secret_default_dev");
            err.message = Some(
                "The bundled development JWT secret must not be used outside development. Set APP__JWT_SECRET to a unique value."
                    .into(),
            );
            errors.add("jwt_secret", err);
        }

        if self.is_production() && !self.duitku.callback_url.starts_with("https://") {
            let mut err = ValidationError::new("duitku_callback_https");
            err.message = Some("The payment callback URL must use https in production".into());
            errors.add("duitku", err);
        }

        if errors.errors().is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum AppConfigError {
    #[error("Configuration loading failed: {0}")]
    Load(#[from] ConfigError),

    #[error("Configuration validation failed: {0}")]
    Validation(#[from] validator::ValidationErrors),
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_jwt_expiration_secs() -> u64 {
    86_400
}

fn default_auth_issuer() -> String {
    "duitku-shop-api".to_string()
}

fn default_auth_audience() -> String {
    "duitku-shop-clients".to_string()
}

fn default_db_max_connections() -> u32 {
    16
}
fn default_db_min_connections() -> u32 {
    2
}
fn default_db_connect_timeout_secs() -> u64 {
    30
}
fn default_db_idle_timeout_secs() -> u64 {
    600
}
fn default_db_acquire_timeout_secs() -> u64 {
    8
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_duitku_endpoint() -> String {
    DEFAULT_DUITKU_ENDPOINT.to_string()
}

fn default_expiry_period_minutes() -> u32 {
    DEFAULT_EXPIRY_PERIOD_MINUTES
}

fn default_gateway_timeout_secs() -> u64 {
    DEFAULT_GATEWAY_TIMEOUT_SECS
}

fn default_refill_per_second() -> u32 {
    1
}

fn default_burst() -> u32 {
    10
}

fn default_max_tracked_clients() -> usize {
    10_000
}

fn default_idle_ttl_secs() -> u64 {
    300
}

/// Validates log level values
fn validate_log_level(level: &str) -> Result<(), ValidationError> {
    let valid_levels = ["trace", "debug", "info", "warn", "error"];
    if valid_levels.contains(&level.to_lowercase().as_str()) {
        Ok(())
    } else {
        let mut err = ValidationError::new("log_level");
        err.message = Some("Must be one of: trace, debug, info, warn, error".into());
        Err(err)
    }
}

fn validate_jwt_secret(secret: &str) -> Result<(), ValidationError> {
    let trimmed = secret.trim();

    const DISALLOWED: [&str; 3] = ["your-secret-key", "default-secret-key", "secret"];
    if DISALLOWED
        .iter()
        .any(|&bad| trimmed.eq_ignore_ascii_case(bad))
    {
        let mut err = ValidationError::new("jwt_secret");
        err.message = Some("JWT secret must be overridden with a secure random value".into());
        return Err(err);
    }

    if let Some(first) = trimmed.chars().next() {
        if trimmed.chars().all(|c| c == first) {
            let mut err = ValidationError::new("jwt_secret");
            err.message = Some("JWT secret cannot be a repeated character sequence".into());
            return Err(err);
        }
    }

    let unique_chars: std::collections::HashSet<char> = trimmed.chars().collect();
    if unique_chars.len() < 10 {
        let mut err = ValidationError::new("jwt_secret");
        err.message =
            Some("JWT secret must have at least 10 unique characters for adequate entropy".into());
        return Err(err);
    }

    Ok(())
}

/// Initializes tracing using the provided log level as the default filter
pub fn init_tracing(level: &str, json: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default_directive = format!("duitku_shop_api={},tower_http=debug", level);
    let filter_directive = env::var("RUST_LOG")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(default_directive);

    if json {
        let _ = fmt()
            .with_env_filter(EnvFilter::new(filter_directive))
            .json()
            .try_init();
    } else {
        let _ = fmt()
            .with_env_filter(EnvFilter::new(filter_directive))
            .try_init();
    }
}

/// Loads application configuration
///
/// Layers configuration sources in this order:
/// 1. Default config (config/default.toml)
/// 2. Environment-specific config (config/{env}.toml)
/// 3. Environment variables (APP__*)
/// 4. The gateway's conventional DUITKU_* variables
pub fn load_config() -> Result<AppConfig, AppConfigError> {
    let run_env = env::var("RUN_ENV")
        .or_else(|_| env::var("APP_ENV"))
        .unwrap_or_else(|_| DEFAULT_ENV.to_string());
    info!("Loading configuration for environment: {}", run_env);

    if !Path::new(CONFIG_DIR).exists() {
        info!(
            "Config directory '{}' not found; relying on built-in defaults and environment variables",
            CONFIG_DIR
        );
    }

    // jwt_secret and the gateway credentials have no defaults
    let config = Config::builder()
        .set_default("database_url", "sqlite://duitku_shop.db?mode=rwc")?
        .set_default("host", "0.0.0.0")?
        .set_default("port", DEFAULT_PORT as i64)?
        .set_default("environment", DEFAULT_ENV)?
        .set_default("log_level", DEFAULT_LOG_LEVEL)?
        .set_default("log_json", false)?
        .set_default("duitku.endpoint", DEFAULT_DUITKU_ENDPOINT)?
        .set_default(
            "duitku.callback_url",
            "http://localhost:8080/api/v1/duitku/callback",
        )?
        .set_default("duitku.return_url", "http://localhost:3000/orders")?
        .add_source(File::with_name(&format!("{}/default", CONFIG_DIR)).required(false))
        .add_source(File::with_name(&format!("{}/{}", CONFIG_DIR, run_env)).required(false))
        .add_source(Environment::with_prefix("APP").separator("__"))
        .set_override_option("duitku.merchant_code", env::var("DUITKU_MERCHANT_CODE").ok())?
        .set_override_option("duitku.api_key", env::var("DUITKU_API_KEY").ok())?
        .set_override_option("duitku.endpoint", env::var("DUITKU_ENDPOINT").ok())?
        .set_override_option("duitku.callback_url", env::var("DUITKU_CALLBACK_URL").ok())?
        .set_override_option("duitku.return_url", env::var("DUITKU_RETURN_URL").ok())?
        .build()?;

    if config.get_string("jwt_secret").is_err() {
        error!("JWT secret is not configured. Set APP__JWT_SECRET to a random string of at least 32 characters.");
        return Err(AppConfigError::Load(ConfigError::NotFound(
            "jwt_secret is required but not configured. Set APP__JWT_SECRET environment variable."
                .into(),
        )));
    }

    let app_config: AppConfig = config.try_deserialize()?;

    app_config.validate().map_err(|e| {
        error!("Configuration validation failed: {:?}", e);
        AppConfigError::Validation(e)
    })?;

    app_config.validate_additional_constraints().map_err(|e| {
        error!("Configuration security validation failed: {:?}", e);
        AppConfigError::Validation(e)
    })?;

    info!("Configuration loaded successfully");
    Ok(app_config)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> AppConfig {
        AppConfig::new(
            "sqlite::memory:".into(),
            "a_reasonably_long_and_varied_secret_for_tests_123".into(),
            "127.0.0.1".into(),
            8080,
            "production".into(),
            DuitkuConfig::new(
                "DS0001",
                "merchant-secret",
                "https://api-sandbox.duitku.com/api/merchant/createInvoice",
                "https://shop.example.com/api/v1/duitku/callback",
                "https://shop.example.com/orders",
            ),
        )
    }

    #[test]
    fn non_dev_requires_cors_origins() {
        let cfg = base_config();
        assert!(cfg.validate_additional_constraints().is_err());
    }

    #[test]
    fn non_dev_with_origins_passes() {
        let mut cfg = base_config();
        cfg.cors_allowed_origins = Some("https://shop.example.com".into());
        assert!(cfg.validate_additional_constraints().is_ok());
    }

    #[test]
    fn production_rejects_plain_http_callback() {
        let mut cfg = base_config();
        cfg.cors_allow_any_origin = true;
        cfg.duitku.callback_url = "http://shop.example.com/api/v1/duitku/callback".into();
        let errors = cfg.validate_additional_constraints().unwrap_err();
        assert!(errors.errors().contains_key("duitku"));
    }

    #[test]
    fn gateway_settings_are_validated() {
        let mut cfg = base_config();
        assert!(cfg.validate().is_ok());

        cfg.duitku.merchant_code = String::new();
        cfg.duitku.endpoint = "not a url".into();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn weak_jwt_secret_is_rejected() {
        assert!(validate_jwt_secret("aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa").is_err());
        assert!(validate_jwt_secret("your-secret-key").is_err());
        assert!(validate_jwt_secret("a_reasonably_long_and_varied_secret_for_tests_123").is_ok());
    }

    #[test]
    fn debug_output_redacts_gateway_secret() {
        let cfg = base_config();
        let rendered = format!("{:?}", cfg);
        assert!(!rendered.contains("merchant-secret"));
        assert!(rendered.contains("<redacted>"));
    }
}
