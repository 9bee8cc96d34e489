//! Configuration management for the gateway and billing processes

use serde::{Deserialize, Serialize};
use std::env;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub services: ServicesConfig,
    pub app: AppConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout_seconds: u64,
    pub idle_timeout_seconds: u64,
    pub max_lifetime_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    pub url: String,
    pub connection_timeout_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServicesConfig {
    /// Default upstream base URL, used only when a developer record has no
    /// upstream URL of its own.
    pub default_upstream_url: String,
    pub analytics_service_url: String,
    pub billing_service_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub environment: String,
    pub log_level: String,
    pub request_timeout_seconds: u64,
    /// Shared secret checked against the `x-admin-key` header.
    pub admin_shared_secret: String,
    /// IANA timezone name governing daily rate-limit resets and scheduled
    /// jobs (e.g. "America/Panama", "UTC").
    pub deployment_timezone: String,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        Ok(Config {
            database: DatabaseConfig {
                url: env::var("DATABASE_URL")
                    .unwrap_or_else(|_| "postgresql://localhost:5432/gateway_db".to_string()),
                max_connections: env::var("DATABASE_MAX_CONNECTIONS")
                    .unwrap_or_else(|_| "20".to_string())
                    .parse()?,
                min_connections: env::var("DATABASE_MIN_CONNECTIONS")
                    .unwrap_or_else(|_| "5".to_string())
                    .parse()?,
                acquire_timeout_seconds: env::var("DATABASE_ACQUIRE_TIMEOUT_SECONDS")
                    .unwrap_or_else(|_| "30".to_string())
                    .parse()?,
                idle_timeout_seconds: env::var("DATABASE_IDLE_TIMEOUT_SECONDS")
                    .unwrap_or_else(|_| "600".to_string())
                    .parse()?,
                max_lifetime_seconds: env::var("DATABASE_MAX_LIFETIME_SECONDS")
                    .unwrap_or_else(|_| "1800".to_string())
                    .parse()?,
            },
            redis: RedisConfig {
                url: env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string()),
                connection_timeout_seconds: env::var("REDIS_CONNECTION_TIMEOUT_SECONDS")
                    .unwrap_or_else(|_| "5".to_string())
                    .parse()?,
            },
            services: ServicesConfig {
                default_upstream_url: env::var("DEFAULT_UPSTREAM_URL")
                    .unwrap_or_else(|_| "http://localhost:9000".to_string()),
                analytics_service_url: env::var("ANALYTICS_SERVICE_URL")
                    .unwrap_or_else(|_| "http://localhost:8101".to_string()),
                billing_service_url: env::var("BILLING_SERVICE_URL")
                    .unwrap_or_else(|_| "http://localhost:8102".to_string()),
            },
            app: AppConfig {
                environment: env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string()),
                log_level: env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
                request_timeout_seconds: env::var("REQUEST_TIMEOUT_SECONDS")
                    .unwrap_or_else(|_| "30".to_string())
                    .parse()?,
                admin_shared_secret: env::var("ADMIN_SHARED_SECRET")
                    .unwrap_or_else(|_| "change-me-in-production".to_string()),
                deployment_timezone: env::var("DEPLOYMENT_TIMEZONE")
                    .unwrap_or_else(|_| "UTC".to_string()),
            },
        })
    }

    pub fn is_production(&self) -> bool {
        self.app.environment == "production"
    }

    pub fn is_development(&self) -> bool {
        self.app.environment == "development"
    }

    /// Parsed deployment timezone, falling back to UTC on a bad env value
    /// rather than failing boot over a cosmetic misconfiguration.
    pub fn timezone(&self) -> chrono_tz::Tz {
        self.app
            .deployment_timezone
            .parse()
            .unwrap_or(chrono_tz::UTC)
    }
}
