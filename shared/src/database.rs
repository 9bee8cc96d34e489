//! Durable-store access (Postgres): catalog, usage history and invoices

use crate::error::AppError;
use crate::models::*;
use crate::Result;
use rust_decimal::Decimal;
use sqlx::{postgres::PgPoolOptions, PgPool, Row};
use std::time::Duration;
use tracing::info;

#[derive(Debug, Clone)]
pub struct DatabaseService {
    pool: PgPool,
}

impl DatabaseService {
    pub async fn new(config: &crate::config::DatabaseConfig) -> Result<Self> {
        info!("Initializing database connection pool");

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.acquire_timeout_seconds))
            .idle_timeout(Duration::from_secs(config.idle_timeout_seconds))
            .max_lifetime(Duration::from_secs(config.max_lifetime_seconds))
            .connect(&config.url)
            .await?;

        sqlx::query("SELECT 1").fetch_one(&pool).await?;

        info!("Database connection pool initialized successfully");

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1").fetch_one(&self.pool).await?;
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
        info!("Database connection pool closed");
    }

    // -- catalog -----------------------------------------------------

    /// Resolves an API key secret to its full auth context in a single
    /// round trip. Only active keys belonging to active customers resolve.
    pub async fn find_key_context(&self, secret: &str) -> Result<Option<AuthContext>> {
        let row = sqlx::query(
            r#"
            SELECT
                k.id AS key_id, k.active AS key_active, k.expires_at AS key_expires_at,
                c.id AS customer_id, c.email AS customer_email,
                d.id AS developer_id, d.display_name AS developer_name, d.upstream_base_url,
                t.id AS tier_id, t.name AS tier_name, t.daily_quota
            FROM api_keys k
            JOIN customers c ON c.id = k.customer_id
            JOIN developers d ON d.id = c.developer_id
            JOIN tiers t ON t.id = c.tier_id
            WHERE k.secret = $1 AND k.active AND c.active
            "#,
        )
        .bind(secret)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else { return Ok(None) };

        Ok(Some(AuthContext {
            customer: CustomerCtx {
                id: row.try_get("customer_id")?,
                email: row.try_get("customer_email")?,
                tier: TierCtx {
                    id: row.try_get("tier_id")?,
                    name: row.try_get("tier_name")?,
                    daily_quota: row.try_get("daily_quota")?,
                },
                daily_quota: row.try_get("daily_quota")?,
            },
            developer: DeveloperCtx {
                id: row.try_get("developer_id")?,
                name: row.try_get("developer_name")?,
                upstream_base_url: row.try_get("upstream_base_url")?,
            },
            key: KeyCtx {
                id: row.try_get("key_id")?,
                active: row.try_get("key_active")?,
                expires_at: row.try_get("key_expires_at")?,
            },
        }))
    }

    pub async fn touch_api_key(&self, key_id: i64) -> Result<()> {
        sqlx::query("UPDATE api_keys SET last_used_at = now() WHERE id = $1")
            .bind(key_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn get_customer(&self, customer_id: i64) -> Result<Customer> {
        sqlx::query_as::<_, Customer>("SELECT * FROM customers WHERE id = $1")
            .bind(customer_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| AppError::not_found(format!("customer {customer_id}")))
    }

    pub async fn active_customers(&self) -> Result<Vec<Customer>> {
        Ok(
            sqlx::query_as::<_, Customer>("SELECT * FROM customers WHERE active ORDER BY id")
                .fetch_all(&self.pool)
                .await?,
        )
    }

    pub async fn get_tier(&self, tier_id: i64) -> Result<Tier> {
        sqlx::query_as::<_, Tier>("SELECT * FROM tiers WHERE id = $1")
            .bind(tier_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| AppError::not_found(format!("tier {tier_id}")))
    }

    pub async fn list_tiers(&self) -> Result<Vec<Tier>> {
        Ok(
            sqlx::query_as::<_, Tier>("SELECT * FROM tiers ORDER BY monthly_price ASC")
                .fetch_all(&self.pool)
                .await?,
        )
    }

    // -- usage --------------------------------------------------------

    /// Inserts a drained batch, skipping rows whose idempotency key is
    /// already present. Returns the number of rows actually inserted.
    pub async fn insert_usage_records(&self, records: &[NewUsageRecord]) -> Result<u64> {
        if records.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;
        let mut inserted = 0u64;

        for r in records {
            let result = sqlx::query(
                r#"
                INSERT INTO usage_records
                    (idempotency_key, customer_id, api_key_id, endpoint, method, status_code, response_time_ms, timestamp)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                ON CONFLICT (idempotency_key) DO NOTHING
                "#,
            )
            .bind(r.idempotency_key)
            .bind(r.customer_id)
            .bind(r.api_key_id)
            .bind(&r.endpoint)
            .bind(&r.method)
            .bind(r.status_code)
            .bind(r.response_time_ms)
            .bind(r.timestamp)
            .execute(&mut *tx)
            .await?;

            inserted += result.rows_affected();
        }

        tx.commit().await?;
        Ok(inserted)
    }

    pub async fn count_usage_in_period(
        &self,
        customer_id: i64,
        period_start: chrono::DateTime<chrono::Utc>,
        period_end: chrono::DateTime<chrono::Utc>,
    ) -> Result<i64> {
        let row = sqlx::query(
            "SELECT count(*) AS n FROM usage_records WHERE customer_id = $1 AND timestamp >= $2 AND timestamp < $3",
        )
        .bind(customer_id)
        .bind(period_start)
        .bind(period_end)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.try_get("n")?)
    }

    // -- invoices -------------------------------------------------------

    /// Most recent closed invoice for a customer, used to anchor the next
    /// billing period.
    pub async fn latest_invoice_period_end(
        &self,
        customer_id: i64,
    ) -> Result<Option<chrono::DateTime<chrono::Utc>>> {
        let row = sqlx::query(
            "SELECT period_end FROM invoices WHERE customer_id = $1 ORDER BY period_end DESC LIMIT 1",
        )
        .bind(customer_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| r.try_get("period_end")).transpose()?)
    }

    /// Fetches the invoice a `latest_invoice_period_end` lookup pointed at,
    /// so callers can hand the full row to the period calculator.
    pub async fn find_invoice_by_period_end(
        &self,
        customer_id: i64,
        period_end: chrono::DateTime<chrono::Utc>,
    ) -> Result<Option<Invoice>> {
        Ok(sqlx::query_as::<_, Invoice>(
            "SELECT * FROM invoices WHERE customer_id = $1 AND period_end = $2 ORDER BY id DESC LIMIT 1",
        )
        .bind(customer_id)
        .bind(period_end)
        .fetch_optional(&self.pool)
        .await?)
    }

    pub async fn find_invoice_by_period(
        &self,
        customer_id: i64,
        period_start: chrono::DateTime<chrono::Utc>,
        period_end: chrono::DateTime<chrono::Utc>,
    ) -> Result<Option<Invoice>> {
        Ok(sqlx::query_as::<_, Invoice>(
            "SELECT * FROM invoices WHERE customer_id = $1 AND period_start = $2 AND period_end = $3",
        )
        .bind(customer_id)
        .bind(period_start)
        .bind(period_end)
        .fetch_optional(&self.pool)
        .await?)
    }

    /// Highest sequence number already issued for an invoice-number prefix
    /// (e.g. `INV-2026-07-`), used to compute the next one.
    pub async fn max_invoice_number_for_prefix(&self, prefix: &str) -> Result<Option<i32>> {
        let row = sqlx::query(
            r#"
            SELECT max(substring(number from length($1) + 1)::int) AS n
            FROM invoices WHERE number LIKE $2
            "#,
        )
        .bind(prefix)
        .bind(format!("{prefix}%"))
        .fetch_one(&self.pool)
        .await?;

        Ok(row.try_get("n")?)
    }

    /// Inserts the invoice and its line items transactionally, retrying on
    /// a unique-number collision with a concurrently issued invoice.
    pub async fn insert_invoice(
        &self,
        invoice: &NewInvoice,
        line_items: &[NewLineItem],
    ) -> Result<Invoice> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query_as::<_, Invoice>(
            r#"
            INSERT INTO invoices
                (number, customer_id, period_start, period_end, total_usage, amount, status, due_date)
            VALUES ($1, $2, $3, $4, $5, $6, 'PENDING', $7)
            RETURNING *
            "#,
        )
        .bind(&invoice.number)
        .bind(invoice.customer_id)
        .bind(invoice.period_start)
        .bind(invoice.period_end)
        .bind(invoice.total_usage)
        .bind(invoice.amount)
        .bind(invoice.due_date)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => AppError::DuplicateInvoice,
            _ => AppError::from(e),
        })?;

        for item in line_items {
            sqlx::query(
                r#"
                INSERT INTO line_items (invoice_id, description, quantity, unit_price, amount)
                VALUES ($1, $2, $3, $4, $5)
                "#,
            )
            .bind(row.id)
            .bind(&item.description)
            .bind(item.quantity)
            .bind(item.unit_price)
            .bind(item.amount)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(row)
    }

    pub async fn get_invoice(&self, invoice_id: i64) -> Result<InvoiceWithLineItems> {
        let invoice = sqlx::query_as::<_, Invoice>("SELECT * FROM invoices WHERE id = $1")
            .bind(invoice_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| AppError::not_found(format!("invoice {invoice_id}")))?;

        let line_items =
            sqlx::query_as::<_, LineItem>("SELECT * FROM line_items WHERE invoice_id = $1 ORDER BY id")
                .bind(invoice_id)
                .fetch_all(&self.pool)
                .await?;

        Ok(InvoiceWithLineItems { invoice, line_items })
    }

    pub async fn update_invoice_status(
        &self,
        invoice_id: i64,
        status: InvoiceStatus,
        external_payment_ref: Option<&str>,
    ) -> Result<Invoice> {
        let paid_at = matches!(status, InvoiceStatus::Paid).then(chrono::Utc::now);

        sqlx::query_as::<_, Invoice>(
            r#"
            UPDATE invoices
            SET status = $1, paid_at = COALESCE($2, paid_at), external_payment_ref = COALESCE($3, external_payment_ref)
            WHERE id = $4
            RETURNING *
            "#,
        )
        .bind(status)
        .bind(paid_at)
        .bind(external_payment_ref)
        .bind(invoice_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| AppError::not_found(format!("invoice {invoice_id}")))
    }

    /// Flips every `PENDING` invoice whose due date has passed to `OVERDUE`.
    /// Returns the number of rows updated.
    pub async fn mark_overdue_invoices(&self) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE invoices SET status = 'OVERDUE' WHERE status = 'PENDING' AND due_date < now()",
        )
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    pub async fn list_invoices(&self, filter: &InvoiceFilter) -> Result<Vec<Invoice>> {
        let mut sql = String::from("SELECT * FROM invoices WHERE 1 = 1");
        let mut idx = 1;

        if filter.customer_id.is_some() {
            sql.push_str(&format!(" AND customer_id = ${idx}"));
            idx += 1;
        }
        if filter.status.is_some() {
            sql.push_str(&format!(" AND status = ${idx}"));
            idx += 1;
        }
        if filter.start_date.is_some() {
            sql.push_str(&format!(" AND period_start >= ${idx}"));
            idx += 1;
        }
        if filter.end_date.is_some() {
            sql.push_str(&format!(" AND period_end <= ${idx}"));
            idx += 1;
        }
        sql.push_str(" ORDER BY period_start DESC");
        sql.push_str(&format!(" LIMIT ${idx}"));
        idx += 1;
        sql.push_str(&format!(" OFFSET ${idx}"));

        let mut q = sqlx::query_as::<_, Invoice>(&sql);
        if let Some(v) = filter.customer_id {
            q = q.bind(v);
        }
        if let Some(v) = filter.status {
            q = q.bind(v);
        }
        if let Some(v) = filter.start_date {
            q = q.bind(v);
        }
        if let Some(v) = filter.end_date {
            q = q.bind(v);
        }
        q = q.bind(filter.limit.unwrap_or(50)).bind(filter.offset.unwrap_or(0));

        Ok(q.fetch_all(&self.pool).await?)
    }

    pub async fn lifetime_paid_total(&self, customer_id: i64) -> Result<Decimal> {
        let row = sqlx::query(
            "SELECT COALESCE(sum(amount), 0) AS total FROM invoices WHERE customer_id = $1 AND status = 'PAID'",
        )
        .bind(customer_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.try_get("total")?)
    }
}
