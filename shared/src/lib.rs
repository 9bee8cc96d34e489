//! Shared library for the API monetization gateway and billing processes
//!
//! This library contains the functionality used by both long-running
//! processes described in the system design:
//! - Durable store access (Postgres) for the catalog, usage history and
//!   invoices
//! - Fast store access (Redis) for the key-context cache, rate counters and
//!   usage buffers
//! - Domain models shared across both processes
//! - Inter-process HTTP client (gateway -> billing)
//! - Metrics and common error handling

pub mod cache;
pub mod config;
pub mod database;
pub mod error;
pub mod metrics;
pub mod models;
pub mod service_client;
pub mod utils;

pub use cache::RedisService;
pub use config::Config;
pub use database::DatabaseService;
pub use error::{AppError, Result};
pub use models::*;
pub use service_client::ServiceClient;
