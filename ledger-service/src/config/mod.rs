use secrecy::Secret;
use serde::Deserialize;
use service_core::config as core_config;
use service_core::error::AppError;
use std::env;

#[derive(Debug, Clone, Deserialize)]
pub struct LedgerConfig {
    #[serde(flatten)]
    pub common: core_config::Config,
    pub service_name: String,
    pub storage: StorageBackend,
    pub mongodb: MongoConfig,
    pub smtp: SmtpConfig,
    pub sms: SmsConfig,
    /// Empty means any origin.
    pub allowed_origins: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Mongodb,
    Memory,
}

impl StorageBackend {
    fn parse(value: &str) -> Result<Self, AppError> {
        match value.trim().to_ascii_lowercase().as_str() {
            "mongodb" | "mongo" => Ok(Self::Mongodb),
            "memory" => Ok(Self::Memory),
            other => Err(AppError::ConfigError(anyhow::anyhow!(
                "LEDGER_STORAGE must be 'mongodb' or 'memory', got '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MongoConfig {
    pub uri: Secret<String>,
    pub database: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: Secret<String>,
    pub from_email: String,
    pub from_name: String,
    pub enabled: bool,
}

/// Eskiz-style SMS gateway.
#[derive(Debug, Clone, Deserialize)]
pub struct SmsConfig {
    pub api_url: String,
    pub email: String,
    pub password: Secret<String>,
    pub sender: String,
    pub token_ttl_secs: u64,
    pub enabled: bool,
}

impl LedgerConfig {
    pub fn load() -> Result<Self, AppError> {
        let common_config = core_config::Config::load()?;
        let is_prod = env::var("ENVIRONMENT").unwrap_or_else(|_| "dev".to_string()) == "prod";

        let storage = StorageBackend::parse(&get_env("LEDGER_STORAGE", Some("mongodb"), false)?)?;
        // The in-memory backend never needs a connection string.
        let needs_mongo = is_prod && storage == StorageBackend::Mongodb;

        let mut common = common_config;
        if let Ok(level) = env::var("LOG_LEVEL") {
            common.log_level = level;
        }
        if let Ok(endpoint) = env::var("OTEL_EXPORTER_OTLP_ENDPOINT") {
            common.otlp_endpoint = Some(endpoint).filter(|e| !e.is_empty());
        }

        let smtp_enabled = flag("SMTP_ENABLED");
        let sms_enabled = flag("SMS_ENABLED");

        Ok(LedgerConfig {
            common,
            service_name: "ledger-service".to_string(),
            storage,
            mongodb: MongoConfig {
                uri: Secret::new(get_env(
                    "MONGODB_URI",
                    Some("mongodb://localhost:27017"),
                    needs_mongo,
                )?),
                database: get_env("MONGODB_DATABASE", Some("education_crm"), false)?,
            },
            smtp: SmtpConfig {
                host: get_env("SMTP_HOST", Some("smtp.gmail.com"), false)?,
                port: get_env("SMTP_PORT", Some("587"), false)?
                    .parse()
                    .unwrap_or(587),
                user: get_env("SMTP_USER", Some(""), is_prod && smtp_enabled)?,
                password: Secret::new(get_env(
                    "SMTP_PASSWORD",
                    Some(""),
                    is_prod && smtp_enabled,
                )?),
                from_email: get_env("SMTP_FROM_EMAIL", Some("noreply@example.com"), false)?,
                from_name: get_env("SMTP_FROM_NAME", Some("Education CRM"), false)?,
                enabled: smtp_enabled,
            },
            sms: SmsConfig {
                api_url: get_env("SMS_API_URL", Some("https://notify.eskiz.uz/api"), false)?,
                email: get_env("SMS_EMAIL", Some(""), is_prod && sms_enabled)?,
                password: Secret::new(get_env(
                    "SMS_PASSWORD",
                    Some(""),
                    is_prod && sms_enabled,
                )?),
                sender: get_env("SMS_SENDER", Some("4546"), false)?,
                token_ttl_secs: get_env("SMS_TOKEN_TTL_SECS", Some("2592000"), false)?
                    .parse()
                    .unwrap_or(2_592_000),
                enabled: sms_enabled,
            },
            allowed_origins: get_env("CORS_ALLOWED_ORIGINS", Some(""), false)?
                .split(',')
                .map(str::trim)
                .filter(|o| !o.is_empty())
                .map(str::to_string)
                .collect(),
        })
    }
}

fn flag(key: &str) -> bool {
    env::var(key)
        .unwrap_or_else(|_| "false".to_string())
        .parse()
        .unwrap_or(false)
}

/// Reads `key`, falling back to `default` unless `required` is set.
fn get_env(key: &str, default: Option<&str>, required: bool) -> Result<String, AppError> {
    match env::var(key) {
        Ok(val) => Ok(val),
        Err(_) if required => Err(AppError::ConfigError(anyhow::anyhow!(
            "{} is required in production but not set",
            key
        ))),
        Err(_) => default.map(str::to_string).ok_or_else(|| {
            AppError::ConfigError(anyhow::anyhow!("{} is required but not set", key))
        }),
    }
}
