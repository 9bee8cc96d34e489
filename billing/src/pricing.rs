//! Pricing and usage-summary views derived from the catalog and usage log.

use chrono::Utc;
use rust_decimal::Decimal;
use shared::{
    models::{CostEstimate, TierSummary, UpgradePreview, UsageSummary},
    Customer, DatabaseService, Result, Tier,
};
use std::collections::BTreeSet;
use std::sync::Arc;

use crate::period::compute_current_period;

pub struct PricingService {
    db: Arc<DatabaseService>,
}

impl PricingService {
    pub fn new(db: Arc<DatabaseService>) -> Self {
        Self { db }
    }

    async fn current_period_for(&self, customer: &Customer) -> Result<shared::models::BillingPeriod> {
        let now = Utc::now();
        let latest_period_end = self.db.latest_invoice_period_end(customer.id).await?;
        let latest_invoice = if let Some(period_end) = latest_period_end {
            self.db.find_invoice_by_period_end(customer.id, period_end).await?
        } else {
            None
        };
        compute_current_period(customer, latest_invoice.as_ref(), now)
    }

    pub async fn calculate_usage_for_period(&self, customer_id: i64) -> Result<UsageSummary> {
        let customer = self.db.get_customer(customer_id).await?;
        let period = self.current_period_for(&customer).await?;
        let usage = self
            .db
            .count_usage_in_period(customer_id, period.period_start, period.period_end)
            .await?;

        Ok(UsageSummary { customer_id, usage, period })
    }

    pub async fn get_tier_pricing(&self, tier_id: i64) -> Result<Tier> {
        self.db.get_tier(tier_id).await
    }

    /// Current tier and price only when no target tier (or the same one) is
    /// given; otherwise both sides plus the non-negative savings/extra cost.
    pub async fn estimate_monthly_cost(
        &self,
        customer_id: i64,
        target_tier_id: Option<i64>,
    ) -> Result<CostEstimate> {
        let customer = self.db.get_customer(customer_id).await?;
        let current_tier = self.db.get_tier(customer.tier_id).await?;
        let current_summary = tier_summary(&current_tier);

        match target_tier_id {
            None => Ok(CostEstimate {
                current_tier: current_summary,
                new_tier: None,
                savings: Decimal::ZERO,
                additional_cost: Decimal::ZERO,
            }),
            Some(id) if id == customer.tier_id => Ok(CostEstimate {
                current_tier: current_summary,
                new_tier: None,
                savings: Decimal::ZERO,
                additional_cost: Decimal::ZERO,
            }),
            Some(id) => {
                let new_tier = self.db.get_tier(id).await?;
                let new_summary = tier_summary(&new_tier);
                let savings = (current_tier.monthly_price - new_tier.monthly_price).max(Decimal::ZERO);
                let additional_cost = (new_tier.monthly_price - current_tier.monthly_price).max(Decimal::ZERO);

                Ok(CostEstimate {
                    current_tier: current_summary,
                    new_tier: Some(new_summary),
                    savings,
                    additional_cost,
                })
            }
        }
    }

    /// Prorated cost of switching to `new_tier_id` for the remainder of the
    /// current billing period, plus the feature-set diff.
    pub async fn preview_tier_upgrade(&self, customer_id: i64, new_tier_id: i64) -> Result<UpgradePreview> {
        let customer = self.db.get_customer(customer_id).await?;
        let period = self.current_period_for(&customer).await?;
        let current_tier = self.db.get_tier(customer.tier_id).await?;
        let new_tier = self.db.get_tier(new_tier_id).await?;

        let days_in_period = (period.period_end - period.period_start).num_days().max(1);
        let price_delta = new_tier.monthly_price - current_tier.monthly_price;
        let prorated_amount = (price_delta * Decimal::from(period.days_remaining) / Decimal::from(days_in_period))
            .round_dp(2);

        let current_keys: BTreeSet<String> =
            shared::models::feature_keys(&current_tier.features).into_keys().collect();
        let new_keys: BTreeSet<String> = shared::models::feature_keys(&new_tier.features).into_keys().collect();

        let features_gained = new_keys.difference(&current_keys).cloned().collect();
        let features_lost = current_keys.difference(&new_keys).cloned().collect();

        Ok(UpgradePreview {
            period,
            current_tier: tier_summary(&current_tier),
            new_tier: tier_summary(&new_tier),
            prorated_amount,
            is_upgrade: prorated_amount > Decimal::ZERO,
            features_gained,
            features_lost,
        })
    }
}

fn tier_summary(tier: &Tier) -> TierSummary {
    TierSummary { name: tier.name.clone(), price: tier.monthly_price }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    #[test]
    fn savings_and_additional_cost_are_never_negative() {
        let current = Decimal::new(4999, 2);
        let cheaper = Decimal::new(1999, 2);
        let pricier = Decimal::new(9999, 2);

        assert_eq!((current - cheaper).max(Decimal::ZERO), Decimal::new(3000, 2));
        assert_eq!((cheaper - current).max(Decimal::ZERO), Decimal::ZERO);
        assert_eq!((pricier - current).max(Decimal::ZERO), Decimal::new(5000, 2));
    }
}
