//! Wash-sale window tracking and substantially-identical risk checks.
//!
//! The tracker only reports state; it never blocks anything itself. Window
//! status is a function of the query date, recomputed lazily on each read.
//! Expired rows are flipped on read, never by a scheduler.

use chrono::{Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::Result;
use crate::etf_map::EtfDatabase;
use crate::models::{wash_sale_window_bounds, WashSaleRecord, WASH_SALE_WINDOW_DAYS};
use crate::store::{HarvestStore, WashSaleInput};

/// Severity of a substitution under the wash-sale rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    High,
    Low,
    None,
}

/// Result of a substantially-identical check between two symbols.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskCheck {
    pub is_risk: bool,
    pub risk_level: RiskLevel,
    pub reason: String,
}

impl RiskCheck {
    fn high(reason: impl Into<String>) -> Self {
        Self {
            is_risk: true,
            risk_level: RiskLevel::High,
            reason: reason.into(),
        }
    }

    fn low(reason: impl Into<String>) -> Self {
        Self {
            is_risk: false,
            risk_level: RiskLevel::Low,
            reason: reason.into(),
        }
    }

    fn none() -> Self {
        Self {
            is_risk: false,
            risk_level: RiskLevel::None,
            reason: "no substantial overlap".to_string(),
        }
    }
}

/// A sale event to record into the ledger. Every executed harvest records a
/// window, not just risky ones.
#[derive(Debug, Clone)]
pub struct SaleEvent {
    pub user_id: i64,
    pub portfolio_id: i64,
    pub symbol: String,
    pub sale_date: NaiveDate,
    pub shares: f64,
    pub price: f64,
    pub cost_basis: f64,
    pub realized_loss: f64,
    pub replacement_symbol: Option<String>,
}

#[derive(Clone)]
pub struct WashSaleTracker {
    store: Arc<dyn HarvestStore>,
    etf_db: Arc<EtfDatabase>,
}

impl WashSaleTracker {
    pub fn new(store: Arc<dyn HarvestStore>, etf_db: Arc<EtfDatabase>) -> Self {
        Self { store, etf_db }
    }

    /// Record a sale, opening a 30-day window on either side of the sale
    /// date.
    pub async fn record_sale(&self, event: SaleEvent) -> Result<i64> {
        let (window_start, window_end) = wash_sale_window_bounds(event.sale_date);
        self.store
            .insert_wash_sale(&WashSaleInput {
                user_id: event.user_id,
                portfolio_id: event.portfolio_id,
                symbol: event.symbol.to_uppercase(),
                sale_date: event.sale_date,
                shares_sold: event.shares,
                sale_price: event.price,
                cost_basis: event.cost_basis,
                realized_loss: event.realized_loss,
                window_start,
                window_end,
                replacement_symbol: event.replacement_symbol,
            })
            .await
    }

    /// Windows still open as of today, after flipping stale `active` rows.
    pub async fn active_windows(
        &self,
        user_id: i64,
        portfolio_id: Option<i64>,
    ) -> Result<Vec<WashSaleRecord>> {
        let today = Utc::now().date_naive();
        self.store.expire_windows(user_id, today).await?;

        let windows = self.store.list_wash_sales(user_id, portfolio_id).await?;
        Ok(windows
            .into_iter()
            .filter(|w| w.is_active(today))
            .collect())
    }

    /// All windows for display, with the stored status refreshed first.
    pub async fn all_windows(
        &self,
        user_id: i64,
        portfolio_id: Option<i64>,
    ) -> Result<Vec<WashSaleRecord>> {
        let today = Utc::now().date_naive();
        self.store.expire_windows(user_id, today).await?;
        self.store.list_wash_sales(user_id, portfolio_id).await
    }

    /// Whether the symbol has any active window for this user.
    pub async fn in_active_window(&self, user_id: i64, symbol: &str) -> Result<bool> {
        let symbol = symbol.to_uppercase();
        let windows = self.active_windows(user_id, None).await?;
        Ok(windows.iter().any(|w| w.symbol == symbol))
    }

    /// Whether the portfolio bought the symbol within the trailing window.
    /// Advisory at scan time; it does not block anything.
    pub async fn purchased_recently(&self, portfolio_id: i64, symbol: &str) -> Result<bool> {
        let since = Utc::now().date_naive() - Duration::days(WASH_SALE_WINDOW_DAYS);
        let count = self
            .store
            .count_recent_buys(portfolio_id, &symbol.to_uppercase(), since)
            .await?;
        Ok(count > 0)
    }

    /// Classify a substitution between two symbols.
    pub fn check_risk(&self, symbol: &str, replacement: &str) -> RiskCheck {
        Self::classify_risk(&self.etf_db, symbol, replacement)
    }

    /// Pure classification over the static mapping tables.
    pub fn classify_risk(etf_db: &EtfDatabase, symbol: &str, replacement: &str) -> RiskCheck {
        let a = symbol.to_uppercase();
        let b = replacement.to_uppercase();

        if a == b {
            return RiskCheck::high(format!("{} and {} are the same security", a, b));
        }

        if etf_db.same_index_group(&a, &b) {
            return RiskCheck::high(format!(
                "{} and {} track substantially the same index",
                a, b
            ));
        }

        // A single stock against its designated primary sector ETF is
        // explicitly low risk, distinct from "no overlap at all".
        if etf_db.is_stock_and_primary_etf(&a, &b) {
            return RiskCheck::low(format!(
                "{} is a diversified sector ETF, not substantially identical to {}",
                if etf_db.stock(&a).is_some() { &b } else { &a },
                if etf_db.stock(&a).is_some() { &a } else { &b },
            ));
        }

        RiskCheck::none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sqlite::{HarvestDb, SqliteHarvestStore};

    async fn setup() -> WashSaleTracker {
        let db = HarvestDb::new("sqlite::memory:").await.unwrap();
        let store = Arc::new(SqliteHarvestStore::new(db));
        WashSaleTracker::new(store, Arc::new(EtfDatabase::new()))
    }

    fn sale(symbol: &str, sale_date: NaiveDate) -> SaleEvent {
        SaleEvent {
            user_id: 1,
            portfolio_id: 1,
            symbol: symbol.to_string(),
            sale_date,
            shares: 10.0,
            price: 90.0,
            cost_basis: 1000.0,
            realized_loss: 100.0,
            replacement_symbol: None,
        }
    }

    #[tokio::test]
    async fn test_same_symbol_always_high_risk() {
        let tracker = setup().await;
        for symbol in ["AAPL", "spy", "Unknown123"] {
            let check = tracker.check_risk(symbol, symbol);
            assert!(check.is_risk);
            assert_eq!(check.risk_level, RiskLevel::High);
        }
    }

    #[tokio::test]
    async fn test_index_group_risk() {
        let tracker = setup().await;

        let check = tracker.check_risk("SPY", "IVV");
        assert!(check.is_risk);
        assert_eq!(check.risk_level, RiskLevel::High);
        assert!(check.reason.contains("same index"));

        let check = tracker.check_risk("SPY", "QQQ");
        assert!(!check.is_risk);
        assert_eq!(check.risk_level, RiskLevel::None);
    }

    #[tokio::test]
    async fn test_stock_to_sector_etf_is_low_not_none() {
        let tracker = setup().await;
        let check = tracker.check_risk("AAPL", "XLK");
        assert!(!check.is_risk);
        assert_eq!(check.risk_level, RiskLevel::Low);
        assert!(check.reason.contains("not substantially identical"));
    }

    #[tokio::test]
    async fn test_active_window_lifecycle() {
        let tracker = setup().await;
        let today = Utc::now().date_naive();

        // A sale 10 days ago is still inside its window; one 40 days ago is
        // past it and gets flipped to expired on read.
        tracker
            .record_sale(sale("AAPL", today - Duration::days(10)))
            .await
            .unwrap();
        tracker
            .record_sale(sale("MSFT", today - Duration::days(40)))
            .await
            .unwrap();

        let active = tracker.active_windows(1, None).await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].symbol, "AAPL");

        assert!(tracker.in_active_window(1, "aapl").await.unwrap());
        assert!(!tracker.in_active_window(1, "MSFT").await.unwrap());

        let all = tracker.all_windows(1, None).await.unwrap();
        assert_eq!(all.len(), 2);
        let msft = all.iter().find(|w| w.symbol == "MSFT").unwrap();
        assert_eq!(msft.status, "expired");
    }
}
