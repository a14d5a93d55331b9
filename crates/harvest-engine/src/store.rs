//! Storage interface for the harvesting engine.
//!
//! The engine is parameterized over this trait so the same scan / preview /
//! execute semantics run against any durable key-indexed store. The only
//! multi-row write is `commit_harvest`, which implementations must apply as a
//! single atomic unit: the sell leg, the optional replacement buy, the
//! wash-sale window, the history record, and the carryforward delta either
//! all commit or none do.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::models::{
    CarryforwardBalance, HarvestHistoryRecord, Holding, Portfolio, UserTaxPreferences,
    WashSaleRecord,
};

/// Sale event recorded into the wash-sale ledger.
#[derive(Debug, Clone)]
pub struct WashSaleInput {
    pub user_id: i64,
    pub portfolio_id: i64,
    pub symbol: String,
    pub sale_date: NaiveDate,
    pub shares_sold: f64,
    pub sale_price: f64,
    pub cost_basis: f64,
    pub realized_loss: f64,
    pub window_start: NaiveDate,
    pub window_end: NaiveDate,
    pub replacement_symbol: Option<String>,
}

/// Caller-supplied loss deltas. Applied additively, exactly once per
/// idempotency key.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CarryforwardDelta {
    #[serde(default)]
    pub short_term_loss: f64,
    #[serde(default)]
    pub long_term_loss: f64,
    #[serde(default)]
    pub used_against_gains: f64,
    #[serde(default)]
    pub used_against_income: f64,
}

impl CarryforwardDelta {
    /// Net change to the remaining balance.
    pub fn net(&self) -> f64 {
        self.short_term_loss + self.long_term_loss
            - self.used_against_gains
            - self.used_against_income
    }
}

/// Replacement buy leg of a harvest.
#[derive(Debug, Clone)]
pub struct ReplacementLeg {
    pub symbol: String,
    pub shares: f64,
    pub price: f64,
    pub sector: Option<String>,
}

/// Fully-resolved harvest transition, computed by the executor and applied
/// atomically by the store.
#[derive(Debug, Clone)]
pub struct HarvestCommit {
    pub harvest_id: String,
    pub user_id: i64,
    pub portfolio_id: i64,
    pub symbol: String,
    pub shares: f64,
    pub sale_price: f64,
    pub cost_basis: f64,
    pub realized_loss: f64,
    pub tax_savings: f64,
    pub holding_period: String,
    pub lot_method: String,
    pub sale_date: NaiveDate,
    pub window_start: NaiveDate,
    pub window_end: NaiveDate,
    pub replacement: Option<ReplacementLeg>,
    pub wash_sale_safe: bool,
    pub executed_at: DateTime<Utc>,
    /// Realized-loss delta folded into the carryforward ledger in the same
    /// transaction, keyed by `harvest_id`.
    pub carryforward: Option<(i32, CarryforwardDelta)>,
}

#[async_trait]
pub trait HarvestStore: Send + Sync {
    async fn get_portfolio(&self, portfolio_id: i64) -> Result<Option<Portfolio>>;

    async fn list_holdings(&self, portfolio_id: i64) -> Result<Vec<Holding>>;

    async fn get_holding(&self, portfolio_id: i64, symbol: &str) -> Result<Option<Holding>>;

    /// FIFO-oldest purchase date for a symbol, if any lot exists.
    async fn earliest_lot_date(
        &self,
        portfolio_id: i64,
        symbol: &str,
    ) -> Result<Option<NaiveDate>>;

    /// Number of buy transactions for a symbol on or after `since`.
    async fn count_recent_buys(
        &self,
        portfolio_id: i64,
        symbol: &str,
        since: NaiveDate,
    ) -> Result<i64>;

    async fn insert_wash_sale(&self, input: &WashSaleInput) -> Result<i64>;

    /// All wash-sale windows for a user, optionally scoped to a portfolio,
    /// newest sale first.
    async fn list_wash_sales(
        &self,
        user_id: i64,
        portfolio_id: Option<i64>,
    ) -> Result<Vec<WashSaleRecord>>;

    /// Lazily flip rows whose window has passed to `expired`. Returns the
    /// number of rows flipped.
    async fn expire_windows(&self, user_id: i64, as_of: NaiveDate) -> Result<u64>;

    async fn list_history(
        &self,
        portfolio_id: i64,
        limit: i64,
    ) -> Result<Vec<HarvestHistoryRecord>>;

    async fn list_history_for_year(
        &self,
        portfolio_id: i64,
        year: i32,
    ) -> Result<Vec<HarvestHistoryRecord>>;

    /// Rows with a positive remaining balance, oldest tax year first.
    async fn carryforward_rows(&self, user_id: i64) -> Result<Vec<CarryforwardBalance>>;

    /// Additively upsert the per-year row. When `idempotency_key` is given
    /// and was seen before, nothing is applied and `false` is returned.
    async fn apply_carryforward(
        &self,
        user_id: i64,
        tax_year: i32,
        delta: &CarryforwardDelta,
        idempotency_key: Option<&str>,
    ) -> Result<bool>;

    async fn get_preferences(&self, user_id: i64) -> Result<Option<UserTaxPreferences>>;

    async fn upsert_preferences(&self, prefs: &UserTaxPreferences) -> Result<()>;

    /// Apply a harvest as one atomic unit and return the history record id.
    ///
    /// Implementations must serialize concurrent commits for the same
    /// (portfolio, symbol): the loser fails with `NotFound` and no partial
    /// state is observable.
    async fn commit_harvest(&self, commit: &HarvestCommit) -> Result<i64>;
}
