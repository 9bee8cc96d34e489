//! Scheduled jobs: invoice-close pass, overdue sweep, month-anchored bulk
//! generation. A `JobScheduler` started once at boot, each job computing
//! its UTC cron expression from the deployment-local hour it's meant to
//! fire at.

use chrono::{TimeZone, Timelike, Utc};
use shared::{metrics, Result};
use std::sync::Arc;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info};

use crate::state::AppState;

/// Converts a deployment-local hour (e.g. 2 for 02:00 local) into the
/// 6-field UTC cron expression `tokio_cron_scheduler` expects, since its
/// cron fields are UTC-only and don't understand IANA timezones directly.
fn daily_utc_cron_for_local_hour(tz: chrono_tz::Tz, local_hour: u32) -> String {
    let today_local = Utc::now().with_timezone(&tz).date_naive();
    let local_time = today_local.and_hms_opt(local_hour, 0, 0).unwrap();
    let local_dt = tz
        .from_local_datetime(&local_time)
        .single()
        .unwrap_or_else(|| tz.from_utc_datetime(&local_time));
    let utc_hour = local_dt.with_timezone(&Utc).hour();

    format!("0 0 {utc_hour} * * *")
}

/// Month-anchored jobs ignore day-of-month offsets from timezone
/// conversion (a one-day skew around midnight is an acceptable
/// simplification for a billing sweep, not a real-time system).
fn monthly_utc_cron_for_local_midnight(tz: chrono_tz::Tz) -> String {
    let utc_hour = daily_utc_cron_for_local_hour(tz, 0);
    let hour_field = utc_hour.split_whitespace().nth(2).unwrap_or("0");
    format!("0 0 {hour_field} 1 * *")
}

pub async fn start(state: AppState) -> Result<()> {
    let scheduler = JobScheduler::new()
        .await
        .map_err(|e| shared::AppError::internal(format!("failed to start job scheduler: {e}")))?;

    let tz = state.config.timezone();

    let invoice_close_cron = daily_utc_cron_for_local_hour(tz, 2);
    let overdue_sweep_cron = daily_utc_cron_for_local_hour(tz, 3);
    let monthly_bulk_cron = monthly_utc_cron_for_local_midnight(tz);

    info!(
        invoice_close_cron,
        overdue_sweep_cron, monthly_bulk_cron, "scheduling billing jobs"
    );

    let invoices_for_close = Arc::clone(&state.invoices);
    let db_for_close = Arc::clone(&state.database);
    let close_job = Job::new_async(invoice_close_cron.as_str(), move |_uuid, _lock| {
        let invoices = Arc::clone(&invoices_for_close);
        let db = Arc::clone(&db_for_close);
        Box::pin(async move { run_invoice_close_pass(invoices, db).await })
    })
    .map_err(|e| shared::AppError::internal(format!("invalid invoice-close cron: {e}")))?;

    let invoices_for_overdue = Arc::clone(&state.invoices);
    let overdue_job = Job::new_async(overdue_sweep_cron.as_str(), move |_uuid, _lock| {
        let invoices = Arc::clone(&invoices_for_overdue);
        Box::pin(async move { run_overdue_sweep(invoices).await })
    })
    .map_err(|e| shared::AppError::internal(format!("invalid overdue-sweep cron: {e}")))?;

    let invoices_for_bulk = Arc::clone(&state.invoices);
    let bulk_job = Job::new_async(monthly_bulk_cron.as_str(), move |_uuid, _lock| {
        let invoices = Arc::clone(&invoices_for_bulk);
        Box::pin(async move { run_monthly_bulk(invoices).await })
    })
    .map_err(|e| shared::AppError::internal(format!("invalid monthly-bulk cron: {e}")))?;

    scheduler
        .add(close_job)
        .await
        .map_err(|e| shared::AppError::internal(format!("failed to register invoice-close job: {e}")))?;
    scheduler
        .add(overdue_job)
        .await
        .map_err(|e| shared::AppError::internal(format!("failed to register overdue-sweep job: {e}")))?;
    scheduler
        .add(bulk_job)
        .await
        .map_err(|e| shared::AppError::internal(format!("failed to register monthly-bulk job: {e}")))?;

    scheduler
        .start()
        .await
        .map_err(|e| shared::AppError::internal(format!("failed to start job scheduler: {e}")))?;

    info!("billing schedulers started");
    Ok(())
}

async fn run_invoice_close_pass(invoices: Arc<crate::invoice_engine::InvoiceEngine>, db: Arc<shared::DatabaseService>) {
    let started = std::time::Instant::now();
    info!("starting invoice-close pass");

    let customers = match db.active_customers().await {
        Ok(c) => c,
        Err(e) => {
            error!("invoice-close pass failed to load active customers: {e}");
            metrics::SCHEDULED_JOB_RUNS_TOTAL.with_label_values(&["invoice_close", "error"]).inc();
            return;
        }
    };

    let now = Utc::now();
    let mut closed = 0u32;

    for customer in customers {
        let latest_period_end = match db.latest_invoice_period_end(customer.id).await {
            Ok(v) => v,
            Err(e) => {
                error!(customer_id = customer.id, "failed to load latest invoice: {e}");
                continue;
            }
        };
        let latest_invoice = match latest_period_end {
            Some(period_end) => match db.find_invoice_by_period_end(customer.id, period_end).await {
                Ok(inv) => inv,
                Err(e) => {
                    error!(customer_id = customer.id, "failed to load invoice row: {e}");
                    continue;
                }
            },
            None => None,
        };

        let period = match crate::period::compute_current_period(&customer, latest_invoice.as_ref(), now) {
            Ok(p) => p,
            Err(e) => {
                error!(customer_id = customer.id, "billing period computation failed: {e}");
                continue;
            }
        };

        if period.days_remaining >= 1 {
            continue;
        }
        if db
            .find_invoice_by_period(customer.id, period.period_start, period.period_end)
            .await
            .ok()
            .flatten()
            .is_some()
        {
            continue;
        }

        match invoices.generate_invoice(customer.id, period.period_start, period.period_end).await {
            Ok(invoice) => {
                closed += 1;
                metrics::INVOICES_GENERATED_TOTAL.with_label_values(&["scheduled", "success"]).inc();
                info!(customer_id = customer.id, invoice_number = %invoice.number, "closed invoice for customer");
            }
            Err(e) => error!(customer_id = customer.id, "failed to generate invoice: {e}"),
        }
    }

    let elapsed = started.elapsed();
    metrics::SCHEDULED_JOB_DURATION_SECONDS.with_label_values(&["invoice_close"]).observe(elapsed.as_secs_f64());
    metrics::SCHEDULED_JOB_RUNS_TOTAL.with_label_values(&["invoice_close", "success"]).inc();
    info!(closed, elapsed_ms = elapsed.as_millis() as u64, "invoice-close pass complete");
}

async fn run_overdue_sweep(invoices: Arc<crate::invoice_engine::InvoiceEngine>) {
    let started = std::time::Instant::now();
    info!("starting overdue sweep");

    match invoices.mark_overdue_invoices().await {
        Ok(count) => {
            let elapsed = started.elapsed();
            metrics::SCHEDULED_JOB_DURATION_SECONDS.with_label_values(&["overdue_sweep"]).observe(elapsed.as_secs_f64());
            metrics::SCHEDULED_JOB_RUNS_TOTAL.with_label_values(&["overdue_sweep", "success"]).inc();
            info!(count, elapsed_ms = elapsed.as_millis() as u64, "overdue sweep complete");
        }
        Err(e) => {
            error!("overdue sweep failed: {e}");
            metrics::SCHEDULED_JOB_RUNS_TOTAL.with_label_values(&["overdue_sweep", "error"]).inc();
        }
    }
}

async fn run_monthly_bulk(invoices: Arc<crate::invoice_engine::InvoiceEngine>) {
    let started = std::time::Instant::now();
    info!("starting month-anchored bulk invoice generation");

    match invoices.generate_monthly_invoices(None).await {
        Ok(result) => {
            let elapsed = started.elapsed();
            metrics::SCHEDULED_JOB_DURATION_SECONDS.with_label_values(&["monthly_bulk"]).observe(elapsed.as_secs_f64());
            metrics::SCHEDULED_JOB_RUNS_TOTAL.with_label_values(&["monthly_bulk", "success"]).inc();
            metrics::INVOICES_GENERATED_TOTAL
                .with_label_values(&["bulk", "success"])
                .inc_by(result.successful as u64);
            if result.failed > 0 {
                metrics::INVOICES_GENERATED_TOTAL
                    .with_label_values(&["bulk", "error"])
                    .inc_by(result.failed as u64);
            }
            info!(
                successful = result.successful,
                failed = result.failed,
                elapsed_ms = elapsed.as_millis() as u64,
                "month-anchored bulk generation complete"
            );
            if result.failed > 0 {
                for err in &result.errors {
                    error!(customer_id = err.customer_id, "bulk generation failed: {}", err.error);
                }
            }
        }
        Err(e) => {
            error!("month-anchored bulk generation failed: {e}");
            metrics::SCHEDULED_JOB_RUNS_TOTAL.with_label_values(&["monthly_bulk", "error"]).inc();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn daily_cron_has_six_fields() {
        let cron = daily_utc_cron_for_local_hour(chrono_tz::UTC, 2);
        assert_eq!(cron.split_whitespace().count(), 6);
        assert_eq!(cron, "0 0 2 * * *");
    }

    #[test]
    fn monthly_cron_anchors_to_first_of_month() {
        let cron = monthly_utc_cron_for_local_midnight(chrono_tz::UTC);
        assert_eq!(cron, "0 0 0 1 * *");
    }
}
