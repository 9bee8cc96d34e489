//! Domain entities and DTOs for the gateway and billing processes
//!
//! The `*Row` structs (`sqlx::FromRow`) mirror the durable-store schema in
//! §3 of the design. The remaining structs are serde DTOs composed from
//! joined rows or produced as API responses; they are never queried
//! directly.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::collections::BTreeMap;
use uuid::Uuid;

/// A pricing tier. `daily_quota == 0` denotes unlimited (§9 open question,
/// unified across the rate limiter and the pricing component).
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Tier {
    pub id: i64,
    pub name: String,
    pub monthly_price: Decimal,
    pub daily_quota: i64,
    pub features: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Developer {
    pub id: i64,
    pub display_name: String,
    pub upstream_base_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Customer {
    pub id: i64,
    pub email: String,
    pub tier_id: i64,
    pub developer_id: i64,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ApiKey {
    pub id: i64,
    pub secret: String,
    pub name: Option<String>,
    pub customer_id: i64,
    pub active: bool,
    pub last_used_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct UsageRecord {
    pub id: i64,
    pub idempotency_key: Uuid,
    pub customer_id: i64,
    pub api_key_id: Option<i64>,
    pub endpoint: String,
    pub method: String,
    pub status_code: i32,
    pub response_time_ms: i32,
    pub timestamp: DateTime<Utc>,
}

/// A usage record freshly observed on the request path, before it has a
/// durable-store id. Buffered in the fast store and consumed by the drain
/// task, which assigns it an id on insert. `idempotency_key` is generated
/// once when the record is buffered so a redelivered batch entry does not
/// produce a duplicate row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewUsageRecord {
    pub idempotency_key: Uuid,
    pub customer_id: i64,
    pub api_key_id: Option<i64>,
    pub endpoint: String,
    pub method: String,
    pub status_code: i32,
    pub response_time_ms: i32,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "UPPERCASE")]
pub enum InvoiceStatus {
    Pending,
    Paid,
    Overdue,
    Cancelled,
}

impl std::fmt::Display for InvoiceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            InvoiceStatus::Pending => "PENDING",
            InvoiceStatus::Paid => "PAID",
            InvoiceStatus::Overdue => "OVERDUE",
            InvoiceStatus::Cancelled => "CANCELLED",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Invoice {
    pub id: i64,
    pub number: String,
    pub customer_id: i64,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub total_usage: i64,
    pub amount: Decimal,
    pub status: InvoiceStatus,
    pub due_date: DateTime<Utc>,
    pub paid_at: Option<DateTime<Utc>>,
    pub external_payment_ref: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct LineItem {
    pub id: i64,
    pub invoice_id: i64,
    pub description: String,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    pub amount: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvoiceWithLineItems {
    #[serde(flatten)]
    pub invoice: Invoice,
    pub line_items: Vec<LineItem>,
}

// ---------------------------------------------------------------------
// Auth context — the unit cached by the key resolver (§4.1)
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TierCtx {
    pub id: i64,
    pub name: String,
    pub daily_quota: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomerCtx {
    pub id: i64,
    pub email: String,
    pub tier: TierCtx,
    pub daily_quota: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeveloperCtx {
    pub id: i64,
    pub name: String,
    pub upstream_base_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyCtx {
    pub id: i64,
    pub active: bool,
    pub expires_at: Option<DateTime<Utc>>,
}

/// `{ customer, developer, key }` — the resolved auth context served by the
/// key resolver and cached in the fast store under `key-context:{secret}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthContext {
    pub customer: CustomerCtx,
    pub developer: DeveloperCtx,
    pub key: KeyCtx,
}

// ---------------------------------------------------------------------
// Rate limiting
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RateLimitOutcome {
    pub allowed: bool,
    pub remaining: u64,
    pub reset_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------
// Billing period (§4.5)
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BillingPeriod {
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub days_remaining: i64,
    pub cycle_day: u32,
}

// ---------------------------------------------------------------------
// Invoice generation (§4.6)
// ---------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct NewInvoice {
    pub number: String,
    pub customer_id: i64,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub total_usage: i64,
    pub amount: Decimal,
    pub due_date: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewLineItem {
    pub description: String,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    pub amount: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkGenerationError {
    pub customer_id: i64,
    pub error: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkGenerationResult {
    pub successful: u32,
    pub failed: u32,
    pub errors: Vec<BulkGenerationError>,
    pub invoices: Vec<Invoice>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InvoiceFilter {
    pub customer_id: Option<i64>,
    pub status: Option<InvoiceStatus>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

// ---------------------------------------------------------------------
// Pricing / usage summary (§4.7)
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageSummary {
    pub customer_id: i64,
    pub usage: i64,
    pub period: BillingPeriod,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CurrentUsageResponse {
    pub period: BillingPeriod,
    pub usage: CurrentUsageCount,
    pub tier: TierSummary,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CurrentUsageCount {
    pub count: i64,
    /// `None` encodes the "unlimited" quota case.
    pub limit: Option<i64>,
    pub percentage: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TierSummary {
    pub name: String,
    pub price: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TierListEntry {
    #[serde(flatten)]
    pub tier: Tier,
    pub is_current: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostEstimate {
    pub current_tier: TierSummary,
    pub new_tier: Option<TierSummary>,
    pub savings: Decimal,
    pub additional_cost: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpgradePreview {
    pub period: BillingPeriod,
    pub current_tier: TierSummary,
    pub new_tier: TierSummary,
    pub prorated_amount: Decimal,
    pub is_upgrade: bool,
    pub features_gained: Vec<String>,
    pub features_lost: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BillingHistoryResponse {
    pub invoices: Vec<Invoice>,
    pub lifetime_paid_total: Decimal,
}

/// Extracts the feature-map keys of a tier's `features` JSON object.
pub fn feature_keys(features: &serde_json::Value) -> BTreeMap<String, ()> {
    features
        .as_object()
        .map(|map| map.keys().map(|k| (k.clone(), ())).collect())
        .unwrap_or_default()
}
