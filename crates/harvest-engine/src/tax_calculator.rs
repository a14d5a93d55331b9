//! Holding-period classification and tax-savings math.
//!
//! The savings figure is `loss × effective rate` with the effective rate
//! taken straight from user preferences plus the state rate. It ignores
//! netting against other capital gains in the same year and AMT; that is a
//! documented approximation of this engine, not a bug.

use chrono::{NaiveDate, Utc};
use std::sync::Arc;

use crate::error::Result;
use crate::models::{HoldingPeriod, UserTaxPreferences, LONG_TERM_THRESHOLD_DAYS};
use crate::store::HarvestStore;

#[derive(Clone)]
pub struct TaxCalculator {
    store: Arc<dyn HarvestStore>,
}

impl TaxCalculator {
    pub fn new(store: Arc<dyn HarvestStore>) -> Self {
        Self { store }
    }

    /// Long-term iff the earliest lot for the symbol is strictly older than
    /// 365 days. No lot data defaults to short-term; this never fails on
    /// missing rows.
    pub async fn holding_period(
        &self,
        portfolio_id: i64,
        symbol: &str,
    ) -> Result<HoldingPeriod> {
        let earliest = self.store.earliest_lot_date(portfolio_id, symbol).await?;
        Ok(Self::classify(earliest, Utc::now().date_naive()))
    }

    pub fn classify(earliest_lot: Option<NaiveDate>, as_of: NaiveDate) -> HoldingPeriod {
        match earliest_lot {
            Some(purchase) if (as_of - purchase).num_days() > LONG_TERM_THRESHOLD_DAYS => {
                HoldingPeriod::LongTerm
            }
            _ => HoldingPeriod::ShortTerm,
        }
    }

    /// Combined federal + state rate as a fraction.
    pub fn effective_rate(period: HoldingPeriod, prefs: &UserTaxPreferences) -> f64 {
        let federal = match period {
            HoldingPeriod::ShortTerm => prefs.short_term_rate,
            HoldingPeriod::LongTerm => prefs.long_term_rate,
        };
        (federal + prefs.state_tax_rate) / 100.0
    }

    pub fn tax_savings(
        unrealized_loss: f64,
        period: HoldingPeriod,
        prefs: &UserTaxPreferences,
    ) -> f64 {
        unrealized_loss * Self::effective_rate(period, prefs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_classify_boundary() {
        let as_of = NaiveDate::from_ymd_opt(2025, 6, 15).unwrap();

        // Exactly 365 days is still short-term; 366 flips.
        let at_365 = as_of - Duration::days(365);
        assert_eq!(
            TaxCalculator::classify(Some(at_365), as_of),
            HoldingPeriod::ShortTerm
        );
        let at_366 = as_of - Duration::days(366);
        assert_eq!(
            TaxCalculator::classify(Some(at_366), as_of),
            HoldingPeriod::LongTerm
        );
    }

    #[test]
    fn test_no_lot_data_defaults_short_term() {
        let as_of = NaiveDate::from_ymd_opt(2025, 6, 15).unwrap();
        assert_eq!(
            TaxCalculator::classify(None, as_of),
            HoldingPeriod::ShortTerm
        );
    }

    #[test]
    fn test_savings_example() {
        // 3000 loss at 37% short-term + 5% state = 1260.
        let mut prefs = UserTaxPreferences::default_for(1);
        prefs.short_term_rate = 37.0;
        prefs.state_tax_rate = 5.0;

        let savings = TaxCalculator::tax_savings(3000.0, HoldingPeriod::ShortTerm, &prefs);
        assert!((savings - 1260.0).abs() < 1e-9);
    }

    #[test]
    fn test_long_term_uses_long_rate() {
        let mut prefs = UserTaxPreferences::default_for(1);
        prefs.long_term_rate = 15.0;
        prefs.state_tax_rate = 5.0;

        let rate = TaxCalculator::effective_rate(HoldingPeriod::LongTerm, &prefs);
        assert!((rate - 0.20).abs() < 1e-12);
    }
}
