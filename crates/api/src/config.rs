//! Application configuration loaded from environment variables.

use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{name} has an invalid value: {value}")]
    Invalid { name: &'static str, value: String },

    #[error("{0} must be set when DATABASE_URL is set")]
    Missing(&'static str),
}

const DEV_WEBHOOK_SECRET: &str = "dev-webhook-secret";
const DEV_SERVICE_SECRET: &str = "dev-service-secret";
const DEV_USER_SECRET: &str = "dev-user-secret";

/// Log output format of the binary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Server configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST`, `PORT`: bind address (default `0.0.0.0:3000`)
/// - `RUST_LOG`: tracing filter directive (default `"info"`)
/// - `LOG_FORMAT`: `text` or `json`
/// - `DATABASE_URL`: Postgres connection; in-memory stores when unset
/// - `WEBHOOK_SECRET`, `PAYMENT_PROVIDER`, `PAYMENT_KEY_ID`, `CURRENCY`
/// - `SERVICE_TOKEN_SECRET`, `SERVICE_NAME`, `USER_TOKEN_SECRET`
///
///   The three secrets fall back to public development values only while
///   `DATABASE_URL` is unset; with a database they are required.
/// - `INVENTORY_URL`: remote ledger; the local ledger is used when unset
/// - `INVENTORY_TIMEOUT_MS`
/// - `CONSUMER_GROUP`, `CONSUMER_NAME`, `CONSUMER_BATCH`,
///   `CONSUMER_BLOCK_MS`, `CONSUMER_MIN_IDLE_MS`, `CONSUMER_MAX_DELIVERIES`
///   (`0` disables dead-lettering)
/// - `RESERVATION_TIMEOUT_SECS`, `RECONCILE_INTERVAL_SECS`
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
    pub database_url: Option<String>,

    pub webhook_secret: String,
    pub payment_provider: String,
    pub payment_key_id: String,
    pub currency: String,

    pub service_token_secret: String,
    pub service_name: String,
    pub user_token_secret: String,

    pub inventory_url: Option<String>,
    pub inventory_timeout: Duration,

    pub consumer_group: String,
    pub consumer_name: String,
    pub consumer_batch: usize,
    pub consumer_block: Duration,
    pub consumer_min_idle: Duration,
    pub consumer_max_deliveries: Option<u32>,

    pub reservation_timeout: Duration,
    pub reconcile_interval: Duration,
}

impl Config {
    /// Loads configuration from environment variables, falling back to
    /// defaults for anything unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds the configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let string = |name: &str, default: String| lookup(name).unwrap_or(default);
        let optional = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let log_format = match lookup("LOG_FORMAT").as_deref() {
            None | Some("") | Some("text") => LogFormat::Text,
            Some("json") => LogFormat::Json,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    name: "LOG_FORMAT",
                    value: other.to_string(),
                });
            }
        };

        let database_url = optional("DATABASE_URL");
        let secret = |name: &'static str, default: String| match optional(name) {
            Some(value) => Ok(value),
            None if database_url.is_some() => Err(ConfigError::Missing(name)),
            None => Ok(default),
        };

        let max_deliveries: u32 = parse(
            &lookup,
            "CONSUMER_MAX_DELIVERIES",
            defaults.consumer_max_deliveries.unwrap_or(0),
        )?;

        Ok(Self {
            host: string("HOST", defaults.host),
            port: parse(&lookup, "PORT", defaults.port)?,
            log_level: string("RUST_LOG", defaults.log_level),
            log_format,
            webhook_secret: secret("WEBHOOK_SECRET", defaults.webhook_secret)?,
            payment_provider: string("PAYMENT_PROVIDER", defaults.payment_provider),
            payment_key_id: string("PAYMENT_KEY_ID", defaults.payment_key_id),
            currency: string("CURRENCY", defaults.currency),
            service_token_secret: secret(
                "SERVICE_TOKEN_SECRET",
                defaults.service_token_secret,
            )?,
            service_name: string("SERVICE_NAME", defaults.service_name),
            user_token_secret: secret("USER_TOKEN_SECRET", defaults.user_token_secret)?,
            inventory_url: optional("INVENTORY_URL"),
            inventory_timeout: Duration::from_millis(parse(
                &lookup,
                "INVENTORY_TIMEOUT_MS",
                defaults.inventory_timeout.as_millis() as u64,
            )?),
            consumer_group: string("CONSUMER_GROUP", defaults.consumer_group),
            consumer_name: string("CONSUMER_NAME", defaults.consumer_name),
            consumer_batch: parse(&lookup, "CONSUMER_BATCH", defaults.consumer_batch)?,
            consumer_block: Duration::from_millis(parse(
                &lookup,
                "CONSUMER_BLOCK_MS",
                defaults.consumer_block.as_millis() as u64,
            )?),
            consumer_min_idle: Duration::from_millis(parse(
                &lookup,
                "CONSUMER_MIN_IDLE_MS",
                defaults.consumer_min_idle.as_millis() as u64,
            )?),
            consumer_max_deliveries: (max_deliveries > 0).then_some(max_deliveries),
            reservation_timeout: Duration::from_secs(parse(
                &lookup,
                "RESERVATION_TIMEOUT_SECS",
                defaults.reservation_timeout.as_secs(),
            )?),
            reconcile_interval: Duration::from_secs(parse(
                &lookup,
                "RECONCILE_INTERVAL_SECS",
                defaults.reconcile_interval.as_secs(),
            )?),
            database_url,
        })
    }

    /// Names of the secrets still set to their public development value.
    pub fn dev_secrets(&self) -> Vec<&'static str> {
        [
            ("WEBHOOK_SECRET", &self.webhook_secret, DEV_WEBHOOK_SECRET),
            ("SERVICE_TOKEN_SECRET", &self.service_token_secret, DEV_SERVICE_SECRET),
            ("USER_TOKEN_SECRET", &self.user_token_secret, DEV_USER_SECRET),
        ]
        .into_iter()
        .filter(|(_, value, dev)| value.as_str() == *dev)
        .map(|(name, _, _)| name)
        .collect()
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Header carrying the provider's webhook signature.
    pub fn signature_header(&self) -> String {
        format!("x-{}-signature", self.payment_provider.to_ascii_lowercase())
    }
}

fn parse<F, T>(lookup: &F, name: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(name) {
        Some(value) if !value.trim().is_empty() => {
            value
                .trim()
                .parse()
                .map_err(|_| ConfigError::Invalid { name, value })
        }
        _ => Ok(default),
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
            database_url: None,
            webhook_secret: DEV_WEBHOOK_SECRET.to_string(),
            payment_provider: "razorpay".to_string(),
            payment_key_id: "rzp_test_key".to_string(),
            currency: "INR".to_string(),
            service_token_secret: DEV_SERVICE_SECRET.to_string(),
            service_name: "order-service".to_string(),
            user_token_secret: DEV_USER_SECRET.to_string(),
            inventory_url: None,
            inventory_timeout: Duration::from_millis(5000),
            consumer_group: "notification-service".to_string(),
            consumer_name: "notification-1".to_string(),
            consumer_batch: 10,
            consumer_block: Duration::from_millis(5000),
            consumer_min_idle: Duration::from_millis(60_000),
            consumer_max_deliveries: Some(5),
            reservation_timeout: Duration::from_secs(15 * 60),
            reconcile_interval: Duration::from_secs(60),
        }
    }
}
