//! Read-only aggregation of scan results, wash-sale state, harvest history,
//! and carryforward balances into a single dashboard payload.

use chrono::{Datelike, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::alternatives::{EtfAlternativeResolver, ReplacementRecommendation};
use crate::carryforward::{CarryforwardLedger, CarryforwardReport};
use crate::error::{HarvestError, Result};
use crate::models::{HarvestHistoryRecord, UserTaxPreferences, WashSaleRecord};
use crate::scanner::{HarvestOpportunity, OpportunityScanner, ScanSummary};
use crate::store::HarvestStore;
use crate::wash_sale::WashSaleTracker;

const DASHBOARD_OPPORTUNITY_LIMIT: usize = 10;
const DASHBOARD_WINDOW_LIMIT: usize = 5;
const DASHBOARD_HISTORY_LIMIT: i64 = 5;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaxDashboard {
    pub portfolio_id: i64,
    pub opportunities: Vec<HarvestOpportunity>,
    pub summary: ScanSummary,
    pub active_wash_sales: Vec<WashSaleRecord>,
    pub recent_harvests: Vec<HarvestHistoryRecord>,
    pub carryforward: CarryforwardReport,
    pub preferences: UserTaxPreferences,
    pub recommendations: Vec<String>,
}

/// Realized-loss totals for a tax year, derived from harvest history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct YearEndReport {
    pub portfolio_id: i64,
    pub tax_year: i32,
    pub harvest_count: usize,
    pub total_realized_losses: f64,
    pub total_tax_savings: f64,
    pub short_term_losses: f64,
    pub long_term_losses: f64,
    pub carryforward: CarryforwardReport,
    pub harvests: Vec<HarvestHistoryRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SymbolRecommendation {
    pub symbol: String,
    pub owned: bool,
    pub in_wash_sale_window: bool,
    pub alternatives: Vec<String>,
    pub best_replacement: ReplacementRecommendation,
}

#[derive(Clone)]
pub struct TaxDashboardAggregator {
    store: Arc<dyn HarvestStore>,
    scanner: OpportunityScanner,
    tracker: WashSaleTracker,
    resolver: EtfAlternativeResolver,
    ledger: CarryforwardLedger,
}

impl TaxDashboardAggregator {
    pub fn new(
        store: Arc<dyn HarvestStore>,
        scanner: OpportunityScanner,
        tracker: WashSaleTracker,
        resolver: EtfAlternativeResolver,
        ledger: CarryforwardLedger,
    ) -> Self {
        Self {
            store,
            scanner,
            tracker,
            resolver,
            ledger,
        }
    }

    /// One call for everything a dashboard view renders. The scan runs with
    /// the user's stored threshold.
    pub async fn dashboard(&self, portfolio_id: i64) -> Result<TaxDashboard> {
        let portfolio = self
            .store
            .get_portfolio(portfolio_id)
            .await?
            .ok_or_else(|| HarvestError::NotFound(format!("portfolio {}", portfolio_id)))?;
        let user_id = portfolio.user_id;

        let scan = self.scanner.scan(portfolio_id, None).await?;

        let mut active_wash_sales = self.tracker.active_windows(user_id, Some(portfolio_id)).await?;
        active_wash_sales.truncate(DASHBOARD_WINDOW_LIMIT);

        let recent_harvests = self
            .store
            .list_history(portfolio_id, DASHBOARD_HISTORY_LIMIT)
            .await?;

        let carryforward = self.ledger.get_balance(user_id).await?;

        let preferences = self
            .store
            .get_preferences(user_id)
            .await?
            .unwrap_or_else(|| UserTaxPreferences::default_for(user_id));

        let recommendations =
            build_recommendations(&scan.summary, &active_wash_sales, &carryforward);

        let mut opportunities = scan.opportunities;
        opportunities.truncate(DASHBOARD_OPPORTUNITY_LIMIT);

        Ok(TaxDashboard {
            portfolio_id,
            opportunities,
            summary: scan.summary,
            active_wash_sales,
            recent_harvests,
            carryforward,
            preferences,
            recommendations,
        })
    }

    /// Totals for a tax year from the harvest ledger.
    pub async fn year_end_report(&self, portfolio_id: i64, year: i32) -> Result<YearEndReport> {
        let portfolio = self
            .store
            .get_portfolio(portfolio_id)
            .await?
            .ok_or_else(|| HarvestError::NotFound(format!("portfolio {}", portfolio_id)))?;

        let harvests = self.store.list_history_for_year(portfolio_id, year).await?;

        let short_term_losses: f64 = harvests
            .iter()
            .filter(|h| h.holding_period == "short_term")
            .map(|h| h.realized_loss)
            .sum();
        let long_term_losses: f64 = harvests
            .iter()
            .filter(|h| h.holding_period == "long_term")
            .map(|h| h.realized_loss)
            .sum();

        Ok(YearEndReport {
            portfolio_id,
            tax_year: year,
            harvest_count: harvests.len(),
            total_realized_losses: harvests.iter().map(|h| h.realized_loss).sum(),
            total_tax_savings: harvests.iter().map(|h| h.tax_savings).sum(),
            short_term_losses,
            long_term_losses,
            carryforward: self.ledger.get_balance(portfolio.user_id).await?,
            harvests,
        })
    }

    /// Replacement guidance for a single symbol, with ownership and window
    /// state folded in.
    pub async fn symbol_recommendation(
        &self,
        portfolio_id: i64,
        symbol: &str,
    ) -> Result<SymbolRecommendation> {
        let portfolio = self
            .store
            .get_portfolio(portfolio_id)
            .await?
            .ok_or_else(|| HarvestError::NotFound(format!("portfolio {}", portfolio_id)))?;

        let symbol = symbol.to_uppercase();
        let holding = self.store.get_holding(portfolio_id, &symbol).await?;
        let sector = holding.as_ref().and_then(|h| h.sector.clone());

        let holdings = self.store.list_holdings(portfolio_id).await?;
        let mut exclude: Vec<String> = holdings.iter().map(|h| h.symbol.to_uppercase()).collect();

        let active = self
            .tracker
            .active_windows(portfolio.user_id, None)
            .await?;
        let in_wash_sale_window = active.iter().any(|w| w.symbol == symbol);
        exclude.extend(active.into_iter().map(|w| w.symbol));

        let set = self.resolver.get_alternatives(&symbol, sector.as_deref());
        let best_replacement =
            self.resolver
                .recommend_replacement(&symbol, sector.as_deref(), &exclude);

        Ok(SymbolRecommendation {
            owned: holding.is_some(),
            symbol,
            in_wash_sale_window,
            alternatives: set.alternatives,
            best_replacement,
        })
    }
}

fn build_recommendations(
    summary: &ScanSummary,
    active_windows: &[WashSaleRecord],
    carryforward: &CarryforwardReport,
) -> Vec<String> {
    let mut recs = Vec::new();

    if summary.opportunity_count > 0 {
        recs.push(format!(
            "Harvesting all {} opportunities could realize ${:.2} in losses for an estimated ${:.2} tax benefit",
            summary.opportunity_count, summary.total_potential_loss, summary.estimated_tax_benefit
        ));
    } else {
        recs.push("No positions currently exceed the harvest threshold".to_string());
    }

    if summary.wash_sale_risk_count > 0 {
        recs.push(format!(
            "{} opportunity(ies) carry wash-sale risk; review the windows before executing",
            summary.wash_sale_risk_count
        ));
    }

    if !active_windows.is_empty() {
        recs.push(format!(
            "{} wash-sale window(s) still open; avoid repurchasing those symbols",
            active_windows.len()
        ));
    }

    if carryforward.total_balance > 0.0 {
        recs.push(format!(
            "${:.2} in loss carryforward available; up to ${:.2} deductible against ordinary income this year",
            carryforward.total_balance, carryforward.can_deduct_this_year
        ));
    }

    let today = Utc::now().date_naive();
    if today.month() == 12 {
        recs.push(format!(
            "Tax year closes December 31; execute remaining harvests before then to count for {}",
            today.year()
        ));
    }

    recs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::etf_map::EtfDatabase;
    use crate::models::{wash_sale_window_bounds, Holding};
    use crate::oracle::{PriceOracle, StaticPriceOracle};
    use crate::sqlite::{HarvestDb, SqliteHarvestStore};
    use crate::store::{CarryforwardDelta, HarvestCommit};
    use crate::tax_calculator::TaxCalculator;

    struct Fixture {
        store: Arc<SqliteHarvestStore>,
        oracle: Arc<StaticPriceOracle>,
        aggregator: TaxDashboardAggregator,
        portfolio_id: i64,
    }

    async fn setup() -> Fixture {
        let db = HarvestDb::new("sqlite::memory:").await.unwrap();
        let store = Arc::new(SqliteHarvestStore::new(db));
        let oracle = Arc::new(StaticPriceOracle::new());
        let etf_db = Arc::new(EtfDatabase::new());

        let store_dyn: Arc<dyn HarvestStore> = store.clone();
        let oracle_dyn: Arc<dyn PriceOracle> = oracle.clone();
        let tracker = WashSaleTracker::new(store_dyn.clone(), etf_db.clone());
        let resolver = EtfAlternativeResolver::new(etf_db);
        let calculator = TaxCalculator::new(store_dyn.clone());
        let scanner = OpportunityScanner::new(
            store_dyn.clone(),
            oracle_dyn,
            tracker.clone(),
            resolver.clone(),
            calculator,
        );
        let ledger = CarryforwardLedger::new(store_dyn.clone());
        let aggregator =
            TaxDashboardAggregator::new(store_dyn, scanner, tracker, resolver, ledger);

        let portfolio_id = store.create_portfolio(1, "main").await.unwrap();

        Fixture {
            store,
            oracle,
            aggregator,
            portfolio_id,
        }
    }

    fn commit(portfolio_id: i64, symbol: &str, loss: f64, period: &str) -> HarvestCommit {
        let sale_date = Utc::now().date_naive();
        let (window_start, window_end) = wash_sale_window_bounds(sale_date);
        HarvestCommit {
            harvest_id: uuid::Uuid::new_v4().to_string(),
            user_id: 1,
            portfolio_id,
            symbol: symbol.to_string(),
            shares: 10.0,
            sale_price: 90.0,
            cost_basis: 900.0 + loss,
            realized_loss: loss,
            tax_savings: loss * 0.35,
            holding_period: period.to_string(),
            lot_method: "FIFO".to_string(),
            sale_date,
            window_start,
            window_end,
            replacement: None,
            wash_sale_safe: true,
            executed_at: Utc::now(),
            carryforward: Some((
                sale_date.year(),
                if period == "short_term" {
                    CarryforwardDelta {
                        short_term_loss: loss,
                        ..Default::default()
                    }
                } else {
                    CarryforwardDelta {
                        long_term_loss: loss,
                        ..Default::default()
                    }
                },
            )),
        }
    }

    async fn add_holding(f: &Fixture, symbol: &str, shares: f64, basis: f64) {
        f.store
            .upsert_holding(&Holding {
                id: None,
                portfolio_id: f.portfolio_id,
                symbol: symbol.to_string(),
                shares,
                avg_cost_basis: basis,
                sector: None,
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_dashboard_aggregates_all_sections() {
        let f = setup().await;
        add_holding(&f, "AAPL", 100.0, 180.0).await;
        f.oracle.set_price("AAPL", 150.0);

        add_holding(&f, "TSLA", 10.0, 300.0).await;
        f.store
            .commit_harvest(&commit(f.portfolio_id, "TSLA", 500.0, "short_term"))
            .await
            .unwrap();

        let dash = f.aggregator.dashboard(f.portfolio_id).await.unwrap();
        assert_eq!(dash.opportunities.len(), 1);
        assert_eq!(dash.opportunities[0].symbol, "AAPL");
        assert_eq!(dash.active_wash_sales.len(), 1);
        assert_eq!(dash.active_wash_sales[0].symbol, "TSLA");
        assert_eq!(dash.recent_harvests.len(), 1);
        assert_eq!(dash.carryforward.total_balance, 500.0);
        assert_eq!(dash.preferences.user_id, 1);
        assert!(dash
            .recommendations
            .iter()
            .any(|r| r.contains("carryforward")));
        assert!(dash
            .recommendations
            .iter()
            .any(|r| r.contains("wash-sale window")));
    }

    #[tokio::test]
    async fn test_dashboard_unknown_portfolio() {
        let f = setup().await;
        let err = f.aggregator.dashboard(999).await.unwrap_err();
        assert!(matches!(err, HarvestError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_year_end_report_splits_by_period() {
        let f = setup().await;
        add_holding(&f, "AAPL", 10.0, 100.0).await;
        add_holding(&f, "MSFT", 10.0, 100.0).await;
        f.store
            .commit_harvest(&commit(f.portfolio_id, "AAPL", 1200.0, "short_term"))
            .await
            .unwrap();
        f.store
            .commit_harvest(&commit(f.portfolio_id, "MSFT", 800.0, "long_term"))
            .await
            .unwrap();

        let year = Utc::now().year();
        let report = f
            .aggregator
            .year_end_report(f.portfolio_id, year)
            .await
            .unwrap();
        assert_eq!(report.harvest_count, 2);
        assert_eq!(report.total_realized_losses, 2000.0);
        assert_eq!(report.short_term_losses, 1200.0);
        assert_eq!(report.long_term_losses, 800.0);

        // A year with no harvests reports zeros, not an error.
        let empty = f
            .aggregator
            .year_end_report(f.portfolio_id, year - 1)
            .await
            .unwrap();
        assert_eq!(empty.harvest_count, 0);
        assert_eq!(empty.total_realized_losses, 0.0);
    }

    #[tokio::test]
    async fn test_symbol_recommendation_flags() {
        let f = setup().await;
        add_holding(&f, "AAPL", 10.0, 180.0).await;
        f.store
            .commit_harvest(&commit(f.portfolio_id, "AAPL", 300.0, "short_term"))
            .await
            .unwrap();

        // AAPL was just liquidated: not owned, but inside its window.
        let rec = f
            .aggregator
            .symbol_recommendation(f.portfolio_id, "aapl")
            .await
            .unwrap();
        assert_eq!(rec.symbol, "AAPL");
        assert!(!rec.owned);
        assert!(rec.in_wash_sale_window);
        assert!(!rec.alternatives.is_empty());
        assert!(rec.best_replacement.replacement.is_some());
    }
}
