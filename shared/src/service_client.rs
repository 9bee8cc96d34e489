//! HTTP client for inter-service communication (gateway -> billing)

use crate::error::AppError;
use crate::Result;
use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ServiceClient {
    client: Client,
    base_url: String,
    service_name: String,
}

impl ServiceClient {
    pub fn new(base_url: String, service_name: String, timeout_seconds: u64) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_seconds))
            .build()
            .map_err(AppError::from)?;

        Ok(Self {
            client,
            base_url,
            service_name,
        })
    }

    pub async fn get<T>(&self, endpoint: &str) -> Result<T>
    where
        T: for<'de> Deserialize<'de>,
    {
        let url = format!("{}{}", self.base_url, endpoint);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| self.map_reqwest_error(e))?;

        self.handle_response(response).await
    }

    pub async fn post<T, R>(&self, endpoint: &str, body: &T) -> Result<R>
    where
        T: Serialize,
        R: for<'de> Deserialize<'de>,
    {
        let url = format!("{}{}", self.base_url, endpoint);
        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| self.map_reqwest_error(e))?;

        self.handle_response(response).await
    }

    pub async fn put<T, R>(&self, endpoint: &str, body: &T) -> Result<R>
    where
        T: Serialize,
        R: for<'de> Deserialize<'de>,
    {
        let url = format!("{}{}", self.base_url, endpoint);
        let response = self
            .client
            .put(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| self.map_reqwest_error(e))?;

        self.handle_response(response).await
    }

    pub async fn health_check(&self) -> Result<serde_json::Value> {
        self.get("/health").await
    }

    async fn handle_response<T>(&self, response: Response) -> Result<T>
    where
        T: for<'de> Deserialize<'de>,
    {
        let status = response.status();

        if status.is_success() {
            Ok(response.json::<T>().await.map_err(AppError::from)?)
        } else {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<no body>".to_string());

            Err(AppError::UpstreamError { status, body })
        }
    }

    fn map_reqwest_error(&self, error: reqwest::Error) -> AppError {
        if error.is_timeout() || error.is_connect() {
            AppError::service_unavailable(self.service_name.clone())
        } else {
            AppError::from(error)
        }
    }
}

/// Typed client for the gateway's calls into the billing process: current
/// usage lookups and upgrade cost previews surfaced on the customer-facing
/// endpoints the gateway also serves.
#[derive(Debug, Clone)]
pub struct BillingClient {
    client: ServiceClient,
}

impl BillingClient {
    pub fn new(base_url: String, timeout_seconds: u64) -> Result<Self> {
        Ok(Self {
            client: ServiceClient::new(base_url, "billing".to_string(), timeout_seconds)?,
        })
    }

    pub async fn current_usage(&self, customer_id: i64) -> Result<crate::models::CurrentUsageResponse> {
        self.client
            .get(&format!("/internal/customers/{customer_id}/usage"))
            .await
    }

    pub async fn upgrade_preview(
        &self,
        customer_id: i64,
        new_tier_id: i64,
    ) -> Result<crate::models::UpgradePreview> {
        #[derive(Serialize)]
        struct Body {
            new_tier_id: i64,
        }

        self.client
            .post(
                &format!("/internal/customers/{customer_id}/upgrade-preview"),
                &Body { new_tier_id },
            )
            .await
    }

    pub async fn health(&self) -> Result<serde_json::Value> {
        self.client.health_check().await
    }
}
