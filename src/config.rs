// src/config.rs

use std::{env, fmt, str::FromStr};

use dotenvy::dotenv;
use url::Url;

/// Papers scoring at or above this percentage count as passed in reports.
pub const PASS_PERCENTAGE: f64 = 40.0;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub jwt_secret: String,
    pub jwt_expiration: u64,
    pub rust_log: String,
    pub evaluator_url: Url,
    pub evaluator_timeout_secs: u64,
    pub max_upload_bytes: usize,
    pub max_batch_files: usize,
    pub port: u16,
    pub admin_username: Option<String>,
    pub admin_password: Option<String>,
    pub admin_email: Option<String>,
}

/// Raised when a required variable is missing or cannot be parsed.
#[derive(Debug)]
pub struct ConfigError {
    pub variable: &'static str,
    pub reason: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.variable, self.reason)
    }
}

impl std::error::Error for ConfigError {}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv().ok();

        let database_url = required("DATABASE_URL")?;
        let jwt_secret = required("JWT_SECRET")?;
        let jwt_expiration = parsed_or("JWT_EXPIRATION", 86_400)?;

        let rust_log = env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());

        let evaluator_url = parse_evaluator_url(&required("EVALUATOR_URL")?)?;
        let evaluator_timeout_secs = parsed_or("EVALUATOR_TIMEOUT_SECS", 60)?;
        let max_upload_bytes = parsed_or("MAX_UPLOAD_BYTES", 5 * 1024 * 1024)?;
        let max_batch_files = parsed_or("MAX_BATCH_FILES", 50)?;
        let port = parsed_or("PORT", 3000)?;

        Ok(Self {
            database_url,
            jwt_secret,
            jwt_expiration,
            rust_log,
            evaluator_url,
            evaluator_timeout_secs,
            max_upload_bytes,
            max_batch_files,
            port,
            admin_username: env::var("ADMIN_USERNAME").ok(),
            admin_password: env::var("ADMIN_PASSWORD").ok(),
            admin_email: env::var("ADMIN_EMAIL").ok(),
        })
    }
}

fn required(variable: &'static str) -> Result<String, ConfigError> {
    env::var(variable).map_err(|_| ConfigError {
        variable,
        reason: "must be set".to_string(),
    })
}

fn parsed_or<T: FromStr>(variable: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(variable) {
        Ok(raw) => raw.trim().parse().map_err(|_| ConfigError {
            variable,
            reason: format!("invalid value '{}'", raw),
        }),
        Err(_) => Ok(default),
    }
}

/// The evaluator endpoint must be an absolute http(s) URL.
pub fn parse_evaluator_url(raw: &str) -> Result<Url, ConfigError> {
    let url = Url::parse(raw).map_err(|e| ConfigError {
        variable: "EVALUATOR_URL",
        reason: e.to_string(),
    })?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(ConfigError {
            variable: "EVALUATOR_URL",
            reason: format!("unsupported scheme '{}'", url.scheme()),
        });
    }

    Ok(url)
}
