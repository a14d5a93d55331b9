//! Portfolio scan for loss-harvesting opportunities.
//!
//! Scans never fail wholesale because of one symbol: a missing or failed
//! quote degrades that symbol to its cost basis (which can never qualify as
//! a loss) and the scan moves on.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::warn;

use crate::alternatives::{EtfAlternativeResolver, ReplacementRecommendation};
use crate::error::{HarvestError, Result};
use crate::models::{Holding, HoldingPeriod, UserTaxPreferences};
use crate::oracle::PriceOracle;
use crate::store::HarvestStore;
use crate::tax_calculator::TaxCalculator;
use crate::wash_sale::WashSaleTracker;

/// A holding whose loss exceeds the scan threshold.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HarvestOpportunity {
    pub symbol: String,
    pub sector: Option<String>,
    pub shares: f64,
    pub avg_cost_basis: f64,
    pub current_price: f64,
    pub current_value: f64,
    pub cost_basis: f64,
    pub unrealized_loss: f64,
    pub loss_percent: f64,
    pub holding_period: HoldingPeriod,
    pub tax_savings: f64,
    pub in_wash_sale_window: bool,
    pub recent_purchase_risk: bool,
    pub etf_alternatives: Vec<String>,
    pub best_replacement: ReplacementRecommendation,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanSummary {
    pub opportunity_count: usize,
    pub total_potential_loss: f64,
    pub estimated_tax_benefit: f64,
    pub wash_sale_risk_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanReport {
    pub portfolio_id: i64,
    pub min_loss_threshold_pct: f64,
    pub opportunities: Vec<HarvestOpportunity>,
    pub summary: ScanSummary,
}

#[derive(Clone)]
pub struct OpportunityScanner {
    store: Arc<dyn HarvestStore>,
    oracle: Arc<dyn PriceOracle>,
    tracker: WashSaleTracker,
    resolver: EtfAlternativeResolver,
    calculator: TaxCalculator,
}

impl OpportunityScanner {
    pub fn new(
        store: Arc<dyn HarvestStore>,
        oracle: Arc<dyn PriceOracle>,
        tracker: WashSaleTracker,
        resolver: EtfAlternativeResolver,
        calculator: TaxCalculator,
    ) -> Self {
        Self {
            store,
            oracle,
            tracker,
            resolver,
            calculator,
        }
    }

    /// Scan a portfolio for holdings whose loss percent is below the
    /// negative threshold, sorted by absolute unrealized loss descending.
    pub async fn scan(
        &self,
        portfolio_id: i64,
        min_loss_threshold_pct: Option<f64>,
    ) -> Result<ScanReport> {
        let portfolio = self
            .store
            .get_portfolio(portfolio_id)
            .await?
            .ok_or_else(|| HarvestError::NotFound(format!("portfolio {}", portfolio_id)))?;

        let prefs = self
            .store
            .get_preferences(portfolio.user_id)
            .await?
            .unwrap_or_else(|| UserTaxPreferences::default_for(portfolio.user_id));

        let threshold = min_loss_threshold_pct.unwrap_or(prefs.min_harvest_threshold_pct);

        let holdings = self.store.list_holdings(portfolio_id).await?;
        let owned: Vec<String> = holdings.iter().map(|h| h.symbol.to_uppercase()).collect();

        let window_symbols: HashSet<String> = self
            .tracker
            .active_windows(portfolio.user_id, None)
            .await?
            .into_iter()
            .map(|w| w.symbol)
            .collect();

        let mut opportunities = Vec::new();
        for holding in &holdings {
            if let Some(opp) = self
                .evaluate_holding(holding, threshold, &prefs, &owned, &window_symbols)
                .await?
            {
                opportunities.push(opp);
            }
        }

        opportunities.sort_by(|a, b| {
            b.unrealized_loss
                .partial_cmp(&a.unrealized_loss)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let summary = ScanSummary {
            opportunity_count: opportunities.len(),
            total_potential_loss: opportunities.iter().map(|o| o.unrealized_loss).sum(),
            estimated_tax_benefit: opportunities.iter().map(|o| o.tax_savings).sum(),
            wash_sale_risk_count: opportunities
                .iter()
                .filter(|o| o.in_wash_sale_window || o.recent_purchase_risk)
                .count(),
        };

        Ok(ScanReport {
            portfolio_id,
            min_loss_threshold_pct: threshold,
            opportunities,
            summary,
        })
    }

    async fn evaluate_holding(
        &self,
        holding: &Holding,
        threshold: f64,
        prefs: &UserTaxPreferences,
        owned: &[String],
        window_symbols: &HashSet<String>,
    ) -> Result<Option<HarvestOpportunity>> {
        if holding.shares <= 0.0 || holding.avg_cost_basis <= 0.0 {
            return Ok(None);
        }

        let quote = match self.oracle.quote(&holding.symbol).await {
            Ok(q) => q,
            Err(e) => {
                warn!(symbol = %holding.symbol, error = %e, "quote lookup failed, using cost basis");
                None
            }
        };

        // Cost-basis fallback: the symbol shows zero movement and can never
        // qualify, which is exactly the degraded behavior we want.
        let current_price = quote.as_ref().map(|q| q.price).unwrap_or(holding.avg_cost_basis);
        let sector = holding
            .sector
            .clone()
            .or_else(|| quote.as_ref().and_then(|q| q.sector.clone()));

        let loss_percent =
            (current_price - holding.avg_cost_basis) / holding.avg_cost_basis * 100.0;
        if loss_percent >= -threshold {
            return Ok(None);
        }

        let current_value = holding.shares * current_price;
        let cost_basis = holding.cost_basis();
        let unrealized_loss = cost_basis - current_value;

        let symbol = holding.symbol.to_uppercase();
        let in_wash_sale_window = window_symbols.contains(&symbol);
        let recent_purchase_risk = self
            .tracker
            .purchased_recently(holding.portfolio_id, &symbol)
            .await?;

        let holding_period = self
            .calculator
            .holding_period(holding.portfolio_id, &symbol)
            .await?;
        let tax_savings = TaxCalculator::tax_savings(unrealized_loss, holding_period, prefs);

        let alternatives = self
            .resolver
            .get_alternatives(&symbol, sector.as_deref());

        let mut exclude: Vec<String> = owned.to_vec();
        exclude.extend(window_symbols.iter().cloned());
        let best_replacement =
            self.resolver
                .recommend_replacement(&symbol, sector.as_deref(), &exclude);

        Ok(Some(HarvestOpportunity {
            symbol,
            sector,
            shares: holding.shares,
            avg_cost_basis: holding.avg_cost_basis,
            current_price,
            current_value,
            cost_basis,
            unrealized_loss,
            loss_percent,
            holding_period,
            tax_savings,
            in_wash_sale_window,
            recent_purchase_risk,
            etf_alternatives: alternatives.alternatives,
            best_replacement,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::etf_map::EtfDatabase;
    use crate::oracle::StaticPriceOracle;
    use crate::sqlite::{HarvestDb, SqliteHarvestStore};
    use crate::wash_sale::SaleEvent;
    use chrono::{Duration, Utc};

    struct Fixture {
        store: Arc<SqliteHarvestStore>,
        oracle: Arc<StaticPriceOracle>,
        scanner: OpportunityScanner,
        tracker: WashSaleTracker,
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
            store_dyn,
            oracle_dyn,
            tracker.clone(),
            resolver,
            calculator,
        );

        let portfolio_id = store.create_portfolio(1, "main").await.unwrap();

        Fixture {
            store,
            oracle,
            scanner,
            tracker,
            portfolio_id,
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
    async fn test_threshold_filtering_both_sides() {
        let f = setup().await;
        add_holding(&f, "AAPL", 100.0, 180.0).await; // -16.7%
        add_holding(&f, "MSFT", 10.0, 300.0).await; // +16.7%
        add_holding(&f, "JPM", 10.0, 100.0).await; // -4%, above threshold
        f.oracle.set_price("AAPL", 150.0);
        f.oracle.set_price("MSFT", 350.0);
        f.oracle.set_price("JPM", 96.0);

        let report = f.scanner.scan(f.portfolio_id, Some(5.0)).await.unwrap();
        let symbols: Vec<&str> = report
            .opportunities
            .iter()
            .map(|o| o.symbol.as_str())
            .collect();
        assert_eq!(symbols, vec!["AAPL"]);
        assert_eq!(report.summary.opportunity_count, 1);
    }

    #[tokio::test]
    async fn test_example_loss_math() {
        let f = setup().await;
        add_holding(&f, "AAPL", 100.0, 180.0).await;
        f.oracle.set_price("AAPL", 150.0);

        let mut prefs = UserTaxPreferences::default_for(1);
        prefs.short_term_rate = 37.0;
        prefs.state_tax_rate = 5.0;
        f.store.upsert_preferences(&prefs).await.unwrap();

        let report = f.scanner.scan(f.portfolio_id, Some(5.0)).await.unwrap();
        let opp = &report.opportunities[0];
        assert!((opp.loss_percent - (-16.666666666666668)).abs() < 1e-6);
        assert!((opp.unrealized_loss - 3000.0).abs() < 1e-9);
        assert!((opp.tax_savings - 1260.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_missing_quote_degrades_not_fails() {
        let f = setup().await;
        add_holding(&f, "AAPL", 100.0, 180.0).await;
        add_holding(&f, "NOPRICE", 10.0, 50.0).await;
        f.oracle.set_price("AAPL", 150.0);

        let report = f.scanner.scan(f.portfolio_id, Some(5.0)).await.unwrap();
        // NOPRICE falls back to cost basis and never qualifies.
        assert_eq!(report.opportunities.len(), 1);
        assert_eq!(report.opportunities[0].symbol, "AAPL");
    }

    #[tokio::test]
    async fn test_wash_sale_window_flagged_not_blocking() {
        let f = setup().await;
        add_holding(&f, "AAPL", 100.0, 180.0).await;
        f.oracle.set_price("AAPL", 150.0);

        f.tracker
            .record_sale(SaleEvent {
                user_id: 1,
                portfolio_id: f.portfolio_id,
                symbol: "AAPL".to_string(),
                sale_date: Utc::now().date_naive() - Duration::days(5),
                shares: 10.0,
                price: 155.0,
                cost_basis: 1800.0,
                realized_loss: 250.0,
                replacement_symbol: None,
            })
            .await
            .unwrap();

        let report = f.scanner.scan(f.portfolio_id, Some(5.0)).await.unwrap();
        assert_eq!(report.opportunities.len(), 1);
        assert!(report.opportunities[0].in_wash_sale_window);
        assert_eq!(report.summary.wash_sale_risk_count, 1);
    }

    #[tokio::test]
    async fn test_unknown_portfolio_not_found() {
        let f = setup().await;
        let err = f.scanner.scan(999, None).await.unwrap_err();
        assert!(matches!(err, HarvestError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_replacement_excludes_owned_symbols() {
        let f = setup().await;
        add_holding(&f, "AAPL", 100.0, 180.0).await;
        add_holding(&f, "XLK", 50.0, 150.0).await;
        f.oracle.set_price("AAPL", 150.0);
        f.oracle.set_price("XLK", 155.0);

        let report = f.scanner.scan(f.portfolio_id, Some(5.0)).await.unwrap();
        let opp = &report.opportunities[0];
        let pick = opp.best_replacement.replacement.as_deref().unwrap();
        assert_ne!(pick, "XLK"); // already owned
        assert_ne!(pick, "AAPL");
    }
}
