//! End-to-end flow over the public API: seed a portfolio, scan, preview,
//! execute, then check the dashboard and year-end rollups.

use chrono::{Datelike, Duration, Utc};
use std::sync::Arc;

use harvest_engine::{
    CarryforwardLedger, EtfAlternativeResolver, EtfDatabase, ExecuteRequest, HarvestDb,
    HarvestExecutor, HarvestRequest, HarvestStore, Holding, HoldingPeriod, OpportunityScanner,
    PriceOracle, SqliteHarvestStore, StaticPriceOracle, TaxCalculator, TaxDashboardAggregator,
    UserTaxPreferences, WashSaleTracker,
};

struct Harness {
    store: Arc<SqliteHarvestStore>,
    oracle: Arc<StaticPriceOracle>,
    scanner: OpportunityScanner,
    executor: HarvestExecutor,
    aggregator: TaxDashboardAggregator,
    portfolio_id: i64,
}

async fn harness() -> Harness {
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
        oracle_dyn.clone(),
        tracker.clone(),
        resolver.clone(),
        calculator.clone(),
    );
    let executor = HarvestExecutor::new(store_dyn.clone(), oracle_dyn, tracker.clone(), calculator);
    let ledger = CarryforwardLedger::new(store_dyn.clone());
    let aggregator =
        TaxDashboardAggregator::new(store_dyn, scanner.clone(), tracker, resolver, ledger);

    let portfolio_id = store.create_portfolio(1, "taxable").await.unwrap();

    Harness {
        store,
        oracle,
        scanner,
        executor,
        aggregator,
        portfolio_id,
    }
}

#[tokio::test]
async fn scan_preview_execute_report() {
    let h = harness().await;

    let mut prefs = UserTaxPreferences::default_for(1);
    prefs.short_term_rate = 37.0;
    prefs.state_tax_rate = 5.0;
    h.store.upsert_preferences(&prefs).await.unwrap();

    h.store
        .upsert_holding(&Holding {
            id: None,
            portfolio_id: h.portfolio_id,
            symbol: "AAPL".to_string(),
            shares: 100.0,
            avg_cost_basis: 180.0,
            sector: Some("Technology".to_string()),
        })
        .await
        .unwrap();
    h.store
        .add_lot(
            h.portfolio_id,
            "AAPL",
            Utc::now().date_naive() - Duration::days(200),
            100.0,
            180.0,
        )
        .await
        .unwrap();
    h.oracle.set_price("AAPL", 150.0);
    h.oracle.set_price("XLK", 200.0);

    // Scan surfaces the loss and suggests a replacement.
    let report = h.scanner.scan(h.portfolio_id, None).await.unwrap();
    assert_eq!(report.opportunities.len(), 1);
    let opp = &report.opportunities[0];
    assert_eq!(opp.symbol, "AAPL");
    assert!((opp.unrealized_loss - 3000.0).abs() < 1e-9);
    assert_eq!(opp.holding_period, HoldingPeriod::ShortTerm);
    let replacement = opp.best_replacement.replacement.clone().unwrap();

    // Preview agrees with the scan and is side-effect free.
    let preview = h
        .executor
        .preview(&HarvestRequest {
            portfolio_id: h.portfolio_id,
            symbol: "AAPL".to_string(),
            replacement_symbol: Some(replacement.clone()),
        })
        .await
        .unwrap();
    assert!(preview.can_execute);
    assert!((preview.tax_savings - 1260.0).abs() < 1e-9);
    assert!(h
        .store
        .get_holding(h.portfolio_id, "AAPL")
        .await
        .unwrap()
        .is_some());

    // Execute lands the whole transition.
    let receipt = h
        .executor
        .execute(&ExecuteRequest {
            portfolio_id: h.portfolio_id,
            symbol: "AAPL".to_string(),
            replacement_symbol: Some("XLK".to_string()),
            lot_method: None,
            force: false,
        })
        .await
        .unwrap();
    assert!((receipt.realized_loss - 3000.0).abs() < 1e-9);
    assert!(receipt.wash_sale_safe);

    // Dashboard reflects the new state: no opportunities left, one open
    // window, one harvest in history, carryforward funded.
    let dash = h.aggregator.dashboard(h.portfolio_id).await.unwrap();
    assert!(dash.opportunities.iter().all(|o| o.symbol != "AAPL"));
    assert_eq!(dash.active_wash_sales.len(), 1);
    assert_eq!(dash.recent_harvests.len(), 1);
    assert!((dash.carryforward.total_balance - 3000.0).abs() < 1e-9);

    let year_end = h
        .aggregator
        .year_end_report(h.portfolio_id, Utc::now().year())
        .await
        .unwrap();
    assert_eq!(year_end.harvest_count, 1);
    assert!((year_end.short_term_losses - 3000.0).abs() < 1e-9);

    // The position is gone; another preview cannot find it.
    let err = h
        .executor
        .preview(&HarvestRequest {
            portfolio_id: h.portfolio_id,
            symbol: "AAPL".to_string(),
            replacement_symbol: None,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, harvest_engine::HarvestError::NotFound(_)));
}
