use std::env;

use anyhow::{Context, Result};
use url::Url;

use crate::db::DEFAULT_MAX_POOL_SIZE;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database_url: String,
    pub database_max_pool_size: u32,
    pub server_host: String,
    pub server_port: u16,
    pub jwt_secret: String,
    pub jwt_issuer: String,
    pub jwt_audience: String,
    pub jwt_expiry_minutes: i64,
    pub cors_allowed_origin: Option<String>,
    pub conversion_endpoint: Option<String>,
    pub conversion_timeout_secs: u64,
    pub archive_retention_days: Option<i64>,
    pub timeout_sweep_interval_secs: u64,
    pub worker_poll_interval_secs: u64,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let database_url = env::var("DATABASE_URL").context("DATABASE_URL must be set")?;
        let database_max_pool_size = env::var("DATABASE_MAX_POOL_SIZE")
            .ok()
            .and_then(|value| value.parse().ok())
            .unwrap_or(DEFAULT_MAX_POOL_SIZE);
        let server_host = env::var("SERVER_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let server_port = env::var("SERVER_PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse()
            .context("SERVER_PORT must be a valid u16")?;
        let jwt_secret = env::var("JWT_SECRET").context("JWT_SECRET must be set")?;
        let jwt_issuer = env::var("JWT_ISSUER").unwrap_or_else(|_| "legalease".to_string());
        let jwt_audience =
            env::var("JWT_AUDIENCE").unwrap_or_else(|_| "legalease-clients".to_string());
        let jwt_expiry_minutes = env::var("JWT_EXPIRY_MINUTES")
            .unwrap_or_else(|_| "60".to_string())
            .parse()
            .context("JWT_EXPIRY_MINUTES must be an integer")?;
        let cors_allowed_origin = env::var("CORS_ALLOWED_ORIGIN").ok();
        let conversion_endpoint = env::var("CONVERSION_ENDPOINT")
            .ok()
            .filter(|value| !value.trim().is_empty());
        let conversion_timeout_secs = env::var("CONVERSION_TIMEOUT_SECS")
            .unwrap_or_else(|_| "60".to_string())
            .parse()
            .context("CONVERSION_TIMEOUT_SECS must be an integer")?;
        let archive_retention_days = match env::var("ARCHIVE_RETENTION_DAYS") {
            Ok(value) => Some(
                value
                    .parse::<i64>()
                    .ok()
                    .filter(|days| *days > 0)
                    .context("ARCHIVE_RETENTION_DAYS must be a positive integer")?,
            ),
            Err(_) => None,
        };
        let timeout_sweep_interval_secs = env::var("TIMEOUT_SWEEP_INTERVAL_SECS")
            .unwrap_or_else(|_| "300".to_string())
            .parse()
            .context("TIMEOUT_SWEEP_INTERVAL_SECS must be an integer")?;
        let worker_poll_interval_secs = env::var("WORKER_POLL_INTERVAL_SECS")
            .unwrap_or_else(|_| "2".to_string())
            .parse()
            .context("WORKER_POLL_INTERVAL_SECS must be an integer")?;

        Ok(Self {
            database_url,
            database_max_pool_size,
            server_host,
            server_port,
            jwt_secret,
            jwt_issuer,
            jwt_audience,
            jwt_expiry_minutes,
            cors_allowed_origin,
            conversion_endpoint,
            conversion_timeout_secs,
            archive_retention_days,
            timeout_sweep_interval_secs,
            worker_poll_interval_secs,
        })
    }

    pub fn redacted_database_url(&self) -> String {
        redact_database_url(&self.database_url)
    }

    pub fn cors_origins(&self) -> Vec<String> {
        parse_origins(self.cors_allowed_origin.as_deref())
    }
}

fn redact_database_url(raw: &str) -> String {
    match Url::parse(raw) {
        Ok(mut parsed) => {
            let _ = parsed.set_password(Some("*****"));
            parsed.to_string()
        }
        Err(_) => "***".to_string(),
    }
}

fn parse_origins(raw: Option<&str>) -> Vec<String> {
    raw.map(|value| {
        value
            .split(',')
            .map(str::trim)
            .filter(|origin| !origin.is_empty())
            .map(str::to_string)
            .collect()
    })
    .unwrap_or_default()
}
