use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{HarvestError, Result};

/// Days a position must be held (strictly more) for long-term treatment.
pub const LONG_TERM_THRESHOLD_DAYS: i64 = 365;

/// Wash-sale lookback/lookahead in days.
pub const WASH_SALE_WINDOW_DAYS: i64 = 30;

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Portfolio {
    pub id: i64,
    pub user_id: i64,
    pub name: String,
    pub created_at: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Holding {
    pub id: Option<i64>,
    pub portfolio_id: i64,
    pub symbol: String,
    pub shares: f64,
    pub avg_cost_basis: f64,
    pub sector: Option<String>,
}

impl Holding {
    /// Total cost basis for the position.
    pub fn cost_basis(&self) -> f64 {
        self.shares * self.avg_cost_basis
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct TaxLot {
    pub id: Option<i64>,
    pub portfolio_id: i64,
    pub symbol: String,
    pub purchase_date: NaiveDate,
    pub shares: f64,
    pub cost_per_share: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Transaction {
    pub id: Option<i64>,
    pub portfolio_id: i64,
    pub symbol: String,
    pub action: String, // "buy" or "sell"
    pub shares: f64,
    pub price: f64,
    pub trade_date: NaiveDate,
    pub harvest_id: Option<String>,
    pub created_at: Option<String>,
}

/// Holding-period classification for tax treatment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HoldingPeriod {
    ShortTerm,
    LongTerm,
}

impl HoldingPeriod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HoldingPeriod::ShortTerm => "short_term",
            HoldingPeriod::LongTerm => "long_term",
        }
    }
}

impl std::fmt::Display for HoldingPeriod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Status of a wash-sale window. Authoritative only relative to "now":
/// always derived from `window_end`, never trusted from the stored column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WashSaleStatus {
    Active,
    Expired,
}

impl WashSaleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WashSaleStatus::Active => "active",
            WashSaleStatus::Expired => "expired",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct WashSaleRecord {
    pub id: Option<i64>,
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
    pub status: String,
    pub replacement_symbol: Option<String>,
}

impl WashSaleRecord {
    /// Status as a function of the query date. Inclusive at the boundary: a
    /// window is still active on `window_end` itself.
    pub fn status_as_of(&self, as_of: NaiveDate) -> WashSaleStatus {
        if as_of > self.window_end {
            WashSaleStatus::Expired
        } else {
            WashSaleStatus::Active
        }
    }

    pub fn is_active(&self, as_of: NaiveDate) -> bool {
        self.status_as_of(as_of) == WashSaleStatus::Active
    }

    pub fn days_remaining(&self, as_of: NaiveDate) -> i64 {
        (self.window_end - as_of).num_days().max(0)
    }
}

/// Compute the window bounds for a sale date.
pub fn wash_sale_window_bounds(sale_date: NaiveDate) -> (NaiveDate, NaiveDate) {
    (
        sale_date - Duration::days(WASH_SALE_WINDOW_DAYS),
        sale_date + Duration::days(WASH_SALE_WINDOW_DAYS),
    )
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct HarvestHistoryRecord {
    pub id: Option<i64>,
    pub harvest_id: String,
    pub user_id: i64,
    pub portfolio_id: i64,
    pub symbol: String,
    pub shares_sold: f64,
    pub sale_price: f64,
    pub cost_basis: f64,
    pub realized_loss: f64,
    pub tax_savings: f64,
    pub holding_period: String,
    pub lot_method: String,
    pub replacement_symbol: Option<String>,
    pub replacement_shares: Option<f64>,
    pub replacement_price: Option<f64>,
    pub wash_sale_safe: bool,
    pub executed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct CarryforwardBalance {
    pub user_id: i64,
    pub tax_year: i32,
    pub short_term_loss: f64,
    pub long_term_loss: f64,
    pub used_against_gains: f64,
    pub used_against_income: f64,
    pub remaining_balance: f64,
}

/// Per-user tax preferences. One row per user; defaults applied when absent.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct UserTaxPreferences {
    pub user_id: i64,
    pub federal_tax_bracket: f64,
    pub state: Option<String>,
    pub state_tax_rate: f64,
    pub default_lot_method: String,
    pub min_harvest_threshold_pct: f64,
    pub auto_harvest_enabled: bool,
    pub short_term_rate: f64,
    pub long_term_rate: f64,
}

impl UserTaxPreferences {
    pub fn default_for(user_id: i64) -> Self {
        Self {
            user_id,
            federal_tax_bracket: 24.0,
            state: None,
            state_tax_rate: 0.0,
            default_lot_method: "FIFO".to_string(),
            min_harvest_threshold_pct: 5.0,
            auto_harvest_enabled: false,
            short_term_rate: 35.0,
            long_term_rate: 15.0,
        }
    }

    /// Bound checks for upserts. Returns the specific bound violated.
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=50.0).contains(&self.federal_tax_bracket) {
            return Err(HarvestError::Validation(
                "federal_tax_bracket must be between 0 and 50".to_string(),
            ));
        }
        if !(0.0..=15.0).contains(&self.state_tax_rate) {
            return Err(HarvestError::Validation(
                "state_tax_rate must be between 0 and 15".to_string(),
            ));
        }
        Ok(())
    }
}

/// A quote from the price collaborator. Missing quotes degrade to cost basis.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Quote {
    pub symbol: String,
    pub price: f64,
    pub sector: Option<String>,
    pub change_percent: Option<f64>,
}
