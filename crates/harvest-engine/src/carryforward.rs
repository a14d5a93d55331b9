//! Multi-year loss carryforward ledger.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::{HarvestError, Result};
use crate::models::CarryforwardBalance;
use crate::store::{CarryforwardDelta, HarvestStore};

/// Statutory annual cap on losses deducted against ordinary income.
pub const ANNUAL_DEDUCTION_CAP: f64 = 3000.0;

/// Aggregate balance view, oldest losses first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CarryforwardReport {
    pub user_id: i64,
    pub balances: Vec<CarryforwardBalance>,
    pub total_balance: f64,
    pub can_deduct_this_year: f64,
}

#[derive(Clone)]
pub struct CarryforwardLedger {
    store: Arc<dyn HarvestStore>,
}

impl CarryforwardLedger {
    pub fn new(store: Arc<dyn HarvestStore>) -> Self {
        Self { store }
    }

    /// Sum of positive remaining balances across tax years, oldest first,
    /// with the capped deduction available this year.
    pub async fn get_balance(&self, user_id: i64) -> Result<CarryforwardReport> {
        let balances = self.store.carryforward_rows(user_id).await?;
        let total_balance: f64 = balances.iter().map(|b| b.remaining_balance).sum();

        Ok(CarryforwardReport {
            user_id,
            balances,
            total_balance,
            can_deduct_this_year: total_balance.min(ANNUAL_DEDUCTION_CAP),
        })
    }

    /// Apply a caller-supplied delta to the per-year row. Deltas accumulate;
    /// the idempotency key is what guards against duplicate submission, so
    /// callers tied to a harvest pass its id. Returns false when the key was
    /// already seen.
    pub async fn update_carryforward(
        &self,
        user_id: i64,
        tax_year: i32,
        delta: CarryforwardDelta,
        idempotency_key: Option<&str>,
    ) -> Result<bool> {
        if delta.short_term_loss < 0.0 || delta.long_term_loss < 0.0 {
            return Err(HarvestError::Validation(
                "loss deltas must be non-negative".to_string(),
            ));
        }
        if delta.used_against_gains < 0.0 || delta.used_against_income < 0.0 {
            return Err(HarvestError::Validation(
                "realized deductions must be non-negative".to_string(),
            ));
        }
        if !(1990..=2100).contains(&tax_year) {
            return Err(HarvestError::Validation(
                "tax_year must be between 1990 and 2100".to_string(),
            ));
        }

        self.store
            .apply_carryforward(user_id, tax_year, &delta, idempotency_key)
            .await
    }
}
