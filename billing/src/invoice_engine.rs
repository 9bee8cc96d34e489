//! Invoice generation and lifecycle management.

use chrono::{DateTime, Datelike, Utc};
use rust_decimal::Decimal;
use shared::{
    models::{BulkGenerationError, BulkGenerationResult, NewInvoice, NewLineItem},
    AppError, DatabaseService, Invoice, InvoiceStatus, Result,
};
use std::sync::Arc;
use tracing::warn;

use crate::period::compute_current_period;

const MAX_NUMBER_RETRIES: u32 = 5;

pub struct InvoiceEngine {
    db: Arc<DatabaseService>,
}

impl InvoiceEngine {
    pub fn new(db: Arc<DatabaseService>) -> Self {
        Self { db }
    }

    fn month_name(month: u32) -> &'static str {
        const NAMES: [&str; 12] = [
            "January", "February", "March", "April", "May", "June", "July", "August",
            "September", "October", "November", "December",
        ];
        NAMES[(month as usize).saturating_sub(1).min(11)]
    }

    /// `INV-YYYY-MM-NNN`: finds the max existing number for the month's
    /// prefix, parses `NNN`, adds one, zero-pads.
    async fn next_invoice_number(&self, now: DateTime<Utc>) -> Result<String> {
        let prefix = format!("INV-{}-{:02}-", now.year(), now.month());
        let max = self.db.max_invoice_number_for_prefix(&prefix).await?.unwrap_or(0);
        Ok(format!("{prefix}{:03}", max + 1))
    }

    /// Generates and persists an invoice for `[period_start, period_end)`,
    /// retrying the number sequence on a concurrent unique-constraint hit.
    pub async fn generate_invoice(
        &self,
        customer_id: i64,
        period_start: DateTime<Utc>,
        period_end: DateTime<Utc>,
    ) -> Result<Invoice> {
        if self
            .db
            .find_invoice_by_period(customer_id, period_start, period_end)
            .await?
            .is_some()
        {
            return Err(AppError::DuplicateInvoice);
        }

        let customer = self.db.get_customer(customer_id).await?;
        let tier = self.db.get_tier(customer.tier_id).await?;
        let total_usage = self.db.count_usage_in_period(customer_id, period_start, period_end).await?;
        let now = Utc::now();
        let due_date = now + chrono::Duration::days(7);

        let mut attempt = 0;
        loop {
            let number = self.next_invoice_number(now).await?;

            let new_invoice = NewInvoice {
                number: number.clone(),
                customer_id,
                period_start,
                period_end,
                total_usage,
                amount: tier.monthly_price,
                due_date,
            };

            let line_items = vec![
                NewLineItem {
                    description: format!(
                        "{} Plan - {} {}",
                        tier.name,
                        Self::month_name(period_start.month()),
                        period_start.year()
                    ),
                    quantity: Decimal::ONE,
                    unit_price: tier.monthly_price,
                    amount: tier.monthly_price,
                },
                NewLineItem {
                    description: format!("API Calls: {total_usage} requests"),
                    quantity: Decimal::from(total_usage),
                    unit_price: Decimal::ZERO,
                    amount: Decimal::ZERO,
                },
            ];

            match self.db.insert_invoice(&new_invoice, &line_items).await {
                Ok(invoice) => return Ok(invoice),
                Err(AppError::DuplicateInvoice) if attempt < MAX_NUMBER_RETRIES => {
                    // Either the period itself collided (another process beat us
                    // to this customer+period) or the invoice number was raced.
                    // Re-check the period collision explicitly before retrying
                    // the number sequence, so a genuine duplicate surfaces as
                    // AppError::DuplicateInvoice rather than looping.
                    if self
                        .db
                        .find_invoice_by_period(customer_id, period_start, period_end)
                        .await?
                        .is_some()
                    {
                        return Err(AppError::DuplicateInvoice);
                    }
                    attempt += 1;
                    warn!(customer_id, attempt, "invoice number collision, retrying with fresh max scan");
                    continue;
                }
                Err(e) => return Err(e),
            }
        }
    }

    pub async fn update_status(
        &self,
        invoice_id: i64,
        status: InvoiceStatus,
        external_payment_ref: Option<&str>,
    ) -> Result<Invoice> {
        self.db.update_invoice_status(invoice_id, status, external_payment_ref).await
    }

    /// Idempotent: a second call simply re-confirms the invoice is paid.
    pub async fn mark_paid(&self, invoice_id: i64) -> Result<Invoice> {
        self.db.update_invoice_status(invoice_id, InvoiceStatus::Paid, None).await
    }

    pub async fn mark_overdue_invoices(&self) -> Result<u64> {
        self.db.mark_overdue_invoices().await
    }

    /// Generates invoices for every active customer (optionally restricted
    /// to `customer_ids`) whose current billing period is within 7 days of
    /// closing. Per-customer failures are captured, not fatal to the batch.
    pub async fn generate_monthly_invoices(
        &self,
        customer_ids: Option<&[i64]>,
    ) -> Result<BulkGenerationResult> {
        let customers = self.db.active_customers().await?;
        let customers: Vec<_> = match customer_ids {
            Some(ids) => customers.into_iter().filter(|c| ids.contains(&c.id)).collect(),
            None => customers,
        };

        let mut result = BulkGenerationResult {
            successful: 0,
            failed: 0,
            errors: Vec::new(),
            invoices: Vec::new(),
        };

        let now = Utc::now();
        for customer in customers {
            let latest_period_end = match self.db.latest_invoice_period_end(customer.id).await {
                Ok(v) => v,
                Err(e) => {
                    result.failed += 1;
                    result.errors.push(BulkGenerationError { customer_id: customer.id, error: e.to_string() });
                    continue;
                }
            };
            let latest_invoice = if let Some(period_end) = latest_period_end {
                match self.db.find_invoice_by_period_end(customer.id, period_end).await {
                    Ok(inv) => inv,
                    Err(e) => {
                        result.failed += 1;
                        result.errors.push(BulkGenerationError { customer_id: customer.id, error: e.to_string() });
                        continue;
                    }
                }
            } else {
                None
            };

            let period = match compute_current_period(&customer, latest_invoice.as_ref(), now) {
                Ok(p) => p,
                Err(e) => {
                    result.failed += 1;
                    result.errors.push(BulkGenerationError { customer_id: customer.id, error: e.to_string() });
                    continue;
                }
            };

            if period.days_remaining > 7 {
                continue;
            }

            match self.generate_invoice(customer.id, period.period_start, period.period_end).await {
                Ok(invoice) => {
                    result.successful += 1;
                    result.invoices.push(invoice);
                }
                Err(e) => {
                    result.failed += 1;
                    result.errors.push(BulkGenerationError { customer_id: customer.id, error: e.to_string() });
                }
            }
        }

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn month_name_is_1_indexed() {
        assert_eq!(InvoiceEngine::month_name(1), "January");
        assert_eq!(InvoiceEngine::month_name(12), "December");
    }

    // Note: these require a test database setup — they document the expected
    // behavior of generate_invoice/mark_overdue_invoices against real rows.

    #[tokio::test]
    #[ignore] // requires database setup
    async fn duplicate_invoice_for_same_period_is_rejected() {
        // generate_invoice(customer, start, end) succeeds once; the same
        // (customer_id, period_start, period_end) a second time returns
        // AppError::DuplicateInvoice.
    }

    #[tokio::test]
    #[ignore] // requires database setup
    async fn generated_invoice_has_tier_price_and_two_line_items() {
        // amount == tier.monthly_price, total_usage == count in
        // [period_start, period_end), line items are the plan line and the
        // API-calls line per next_invoice_number's INV-YYYY-MM-NNN format.
    }

    #[tokio::test]
    #[ignore] // requires database setup
    async fn overdue_sweep_marks_only_past_due_pending_invoices() {
        // Three PENDING invoices with due_date yesterday, two with due_date
        // tomorrow: mark_overdue_invoices() returns 3, and a follow-up query
        // with status=OVERDUE returns exactly those three.
    }
}
