use shared::{config::Config, DatabaseService, RedisService, Result, ServiceClient};
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub database: Arc<DatabaseService>,
    pub redis: Arc<RedisService>,
    pub billing_client: Arc<ServiceClient>,
    pub http_client: Arc<reqwest::Client>,
}

impl AppState {
    pub async fn new() -> Result<Self> {
        let config = Config::from_env()?;

        let database = Arc::new(DatabaseService::new(&config.database).await?);
        let redis = Arc::new(RedisService::new(&config.redis).await?);
        let billing_client = Arc::new(ServiceClient::new(
            config.services.billing_service_url.clone(),
            "billing".to_string(),
            config.app.request_timeout_seconds,
        )?);
        let http_client = Arc::new(
            reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(config.app.request_timeout_seconds))
                .build()
                .map_err(shared::AppError::from)?,
        );

        Ok(Self {
            config,
            database,
            redis,
            billing_client,
            http_client,
        })
    }
}
