//! Billing period calculator: given a customer, finds the billing window
//! covering `now`.

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use shared::{models::BillingPeriod, AppError, Customer, Invoice, Result};
use tracing::warn;

const MAX_ITERATIONS: u32 = 120;

/// Adds one calendar month to `dt`, clamping to the shorter month's last
/// day when the source day-of-month doesn't exist in the target month
/// (e.g. Jan 31 + 1 month -> Feb 28/29).
fn add_calendar_month(dt: DateTime<Utc>) -> DateTime<Utc> {
    let (year, month) = (dt.year(), dt.month());
    let (next_year, next_month) = if month == 12 { (year + 1, 1) } else { (year, month + 1) };

    let day = dt.day();
    let last_day_of_next_month = days_in_month(next_year, next_month);
    let clamped_day = day.min(last_day_of_next_month);

    let naive_date = NaiveDate::from_ymd_opt(next_year, next_month, clamped_day)
        .expect("clamped day is always valid for its month");
    let naive_time = dt.time();

    DateTime::from_naive_utc_and_offset(naive_date.and_time(naive_time), Utc)
}

fn days_in_month(year: i32, month: u32) -> u32 {
    let next = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)
    }
    .expect("valid year/month");
    let first = NaiveDate::from_ymd_opt(year, month, 1).expect("valid year/month");
    (next - first).num_days() as u32
}

/// Advances `period_start` month-by-month until it brackets `now`,
/// returning `(period_start, period_end)`. Bounded to `MAX_ITERATIONS` to
/// guard against malformed input looping forever.
fn advance_to_current_window(
    mut period_start: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<(DateTime<Utc>, DateTime<Utc>)> {
    for _ in 0..MAX_ITERATIONS {
        let period_end = add_calendar_month(period_start);
        if period_start <= now && now < period_end {
            return Ok((period_start, period_end));
        }
        period_start = period_end;
    }

    Err(AppError::internal("billing period computation did not converge"))
}

fn days_remaining(period_end: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    let remaining = period_end - now;
    let seconds = remaining.num_seconds().max(0);
    (seconds + 86_399) / 86_400
}

/// Computes the billing window covering `now` for `customer`, given its
/// most recent invoice (if any).
pub fn compute_current_period(
    customer: &Customer,
    latest_invoice: Option<&Invoice>,
    now: DateTime<Utc>,
) -> Result<BillingPeriod> {
    let (period_start, cycle_day) = match latest_invoice {
        None => (customer.created_at, customer.created_at.day()),
        Some(invoice) if invoice.period_end > now => {
            warn!(
                customer_id = customer.id,
                invoice_id = invoice.id,
                "latest invoice period_end is in the future; falling back to created_at anchor"
            );
            (customer.created_at, customer.created_at.day())
        }
        Some(invoice) => (
            invoice.period_end + chrono::Duration::days(1),
            invoice.period_end.day(),
        ),
    };

    let (period_start, period_end) = advance_to_current_window(period_start, now)?;

    Ok(BillingPeriod {
        period_start,
        period_end,
        days_remaining: days_remaining(period_end, now),
        cycle_day,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal::Decimal;

    fn customer_created(at: DateTime<Utc>) -> Customer {
        Customer {
            id: 1,
            email: "a@example.com".to_string(),
            tier_id: 1,
            developer_id: 1,
            active: true,
            created_at: at,
        }
    }

    fn invoice(period_start: DateTime<Utc>, period_end: DateTime<Utc>) -> Invoice {
        Invoice {
            id: 1,
            number: "INV-2026-01-001".to_string(),
            customer_id: 1,
            period_start,
            period_end,
            total_usage: 0,
            amount: Decimal::ZERO,
            status: shared::models::InvoiceStatus::Pending,
            due_date: period_end + chrono::Duration::days(7),
            paid_at: None,
            external_payment_ref: None,
            created_at: period_start,
        }
    }

    #[test]
    fn fresh_customer_spans_a_calendar_month_from_created_at() {
        let created_at = Utc.with_ymd_and_hms(2024, 1, 15, 0, 0, 0).unwrap();
        let now = Utc.with_ymd_and_hms(2024, 2, 10, 0, 0, 0).unwrap();
        let customer = customer_created(created_at);

        let period = compute_current_period(&customer, None, now).unwrap();

        assert_eq!(period.period_start, created_at);
        assert_eq!(period.period_end, Utc.with_ymd_and_hms(2024, 2, 15, 0, 0, 0).unwrap());
        assert_eq!(period.days_remaining, 5);
        assert_eq!(period.cycle_day, 15);
    }

    #[test]
    fn month_rollover_clamps_to_shorter_month() {
        let created_at = Utc.with_ymd_and_hms(2024, 1, 31, 0, 0, 0).unwrap();
        let now = Utc.with_ymd_and_hms(2024, 2, 20, 0, 0, 0).unwrap();
        let customer = customer_created(created_at);

        let period = compute_current_period(&customer, None, now).unwrap();

        // 2024 is a leap year: Jan 31 + 1 month clamps to Feb 29.
        assert_eq!(period.period_end, Utc.with_ymd_and_hms(2024, 2, 29, 0, 0, 0).unwrap());
    }

    #[test]
    fn existing_invoice_anchors_the_next_period_the_day_after_it_ends() {
        let created_at = Utc.with_ymd_and_hms(2023, 6, 1, 0, 0, 0).unwrap();
        let last_period_end = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let now = Utc.with_ymd_and_hms(2024, 1, 15, 0, 0, 0).unwrap();
        let customer = customer_created(created_at);
        let inv = invoice(Utc.with_ymd_and_hms(2023, 12, 1, 0, 0, 0).unwrap(), last_period_end);

        let period = compute_current_period(&customer, Some(&inv), now).unwrap();

        assert_eq!(period.period_start, last_period_end + chrono::Duration::days(1));
        assert_eq!(period.cycle_day, 1);
    }

    #[test]
    fn future_dated_invoice_falls_back_to_created_at_anchor() {
        let created_at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let now = Utc.with_ymd_and_hms(2024, 1, 15, 0, 0, 0).unwrap();
        let customer = customer_created(created_at);
        let future_inv = invoice(
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2099, 1, 1, 0, 0, 0).unwrap(),
        );

        let period = compute_current_period(&customer, Some(&future_inv), now).unwrap();

        assert_eq!(period.period_start, created_at);
        assert_eq!(period.period_end, Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap());
    }

    #[test]
    fn days_remaining_is_never_negative() {
        let now = Utc.with_ymd_and_hms(2024, 2, 14, 23, 59, 0).unwrap();
        let period_end = Utc.with_ymd_and_hms(2024, 2, 15, 0, 0, 0).unwrap();
        assert_eq!(days_remaining(period_end, now), 1);

        let past_end = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(days_remaining(past_end, now), 0);
    }
}
