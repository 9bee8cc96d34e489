use shared::{config::Config, DatabaseService, RedisService, Result};
use std::sync::Arc;

use crate::{invoice_engine::InvoiceEngine, pricing::PricingService};

#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub database: Arc<DatabaseService>,
    /// Used only by the admin rate-limit inspection endpoint — billing has
    /// no hot-path dependency on the fast store otherwise.
    pub redis: Arc<RedisService>,
    pub invoices: Arc<InvoiceEngine>,
    pub pricing: Arc<PricingService>,
}

impl AppState {
    pub async fn new() -> Result<Self> {
        let config = Config::from_env()?;
        let database = Arc::new(DatabaseService::new(&config.database).await?);
        let redis = Arc::new(RedisService::new(&config.redis).await?);
        let invoices = Arc::new(InvoiceEngine::new(database.clone()));
        let pricing = Arc::new(PricingService::new(database.clone()));

        Ok(Self { config, database, redis, invoices, pricing })
    }
}
