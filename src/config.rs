//! Configuration module
//!
//! Loads configuration from environment variables.

use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Database connection URL
    pub database_url: String,

    /// Maximum database connections in pool
    pub database_max_connections: u32,

    /// Redis URL of the task broker
    pub redis_url: String,

    /// Server host
    pub host: String,

    /// Server port
    pub port: u16,

    /// Environment (development, production)
    pub environment: String,

    /// Deadline for a single transfer unit of work
    pub transfer_timeout: Duration,

    /// Number of tasks a processor handles in parallel
    pub worker_concurrency: usize,

    /// Base URL of the email verification endpoint
    pub verify_email_base_url: String,

    /// SMTP settings, absent when no sender credentials are configured
    pub email: Option<EmailConfig>,
}

/// SMTP sender settings
#[derive(Clone)]
pub struct EmailConfig {
    pub sender_name: String,
    pub sender_address: String,
    pub sender_password: String,
    pub smtp_relay: String,
}

impl std::fmt::Debug for EmailConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmailConfig")
            .field("sender_name", &self.sender_name)
            .field("sender_address", &self.sender_address)
            .field("sender_password", &"[REDACTED]")
            .field("smtp_relay", &self.smtp_relay)
            .finish()
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url = env::var("DATABASE_URL")
            .map_err(|_| ConfigError::MissingEnv("DATABASE_URL"))?;

        let database_max_connections = parse_or("DATABASE_MAX_CONNECTIONS", 10)?;

        let redis_url =
            env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());

        let host = env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string());

        let port = parse_or("PORT", 8080)?;

        let environment = env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string());

        let transfer_timeout = Duration::from_millis(parse_or("TRANSFER_TIMEOUT_MS", 5000)?);

        let worker_concurrency = parse_or("WORKER_CONCURRENCY", 4)?;
        if worker_concurrency == 0 {
            return Err(ConfigError::InvalidValue("WORKER_CONCURRENCY"));
        }

        let verify_email_base_url = env::var("VERIFY_EMAIL_BASE_URL")
            .unwrap_or_else(|_| "http://localhost:8080/v1/verify_email".to_string());

        let email = match (
            env::var("EMAIL_SENDER_ADDRESS"),
            env::var("EMAIL_SENDER_PASSWORD"),
        ) {
            (Ok(sender_address), Ok(sender_password)) => Some(EmailConfig {
                sender_name: env::var("EMAIL_SENDER_NAME")
                    .unwrap_or_else(|_| "Simple Bank".to_string()),
                sender_address,
                sender_password,
                smtp_relay: env::var("SMTP_RELAY")
                    .unwrap_or_else(|_| "smtp.gmail.com".to_string()),
            }),
            _ => None,
        };

        Ok(Self {
            database_url,
            database_max_connections,
            redis_url,
            host,
            port,
            environment,
            transfer_timeout,
            worker_concurrency,
            verify_email_base_url,
            email,
        })
    }

    /// Check if running in production
    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }

    /// Email settings, required by processes that deliver mail
    pub fn require_email(&self) -> Result<&EmailConfig, ConfigError> {
        self.email
            .as_ref()
            .ok_or(ConfigError::MissingEnv("EMAIL_SENDER_ADDRESS"))
    }
}

fn parse_or<T: FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw.parse().map_err(|_| ConfigError::InvalidValue(name)),
        Err(_) => Ok(default),
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnv(&'static str),

    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(&'static str),
}
