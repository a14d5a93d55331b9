//! Tax-loss harvesting and wash-sale compliance engine.
//!
//! The engine scans portfolios for harvestable losses, classifies wash-sale
//! risk for candidate replacements, resolves ETF alternatives, previews and
//! atomically executes harvests, and tracks multi-year loss carryforward.
//! All persistence goes through the [`store::HarvestStore`] trait; the
//! bundled [`sqlite::SqliteHarvestStore`] is the production implementation.

pub mod alternatives;
pub mod carryforward;
pub mod dashboard;
pub mod error;
pub mod etf_map;
pub mod executor;
pub mod models;
pub mod oracle;
pub mod scanner;
pub mod sqlite;
pub mod store;
pub mod tax_calculator;
pub mod wash_sale;

pub use alternatives::{AlternativeSet, EtfAlternativeResolver, ReplacementRecommendation};
pub use carryforward::{CarryforwardLedger, CarryforwardReport, ANNUAL_DEDUCTION_CAP};
pub use dashboard::{SymbolRecommendation, TaxDashboard, TaxDashboardAggregator, YearEndReport};
pub use error::{HarvestError, Result};
pub use etf_map::EtfDatabase;
pub use executor::{
    ExecuteRequest, HarvestExecutor, HarvestPreview, HarvestReceipt, HarvestRequest,
};
pub use models::{
    CarryforwardBalance, HarvestHistoryRecord, Holding, HoldingPeriod, Portfolio, Quote,
    TaxLot, UserTaxPreferences, WashSaleRecord, WashSaleStatus,
};
pub use oracle::{PriceOracle, StaticPriceOracle};
pub use scanner::{HarvestOpportunity, OpportunityScanner, ScanReport, ScanSummary};
pub use sqlite::{HarvestDb, QuoteTableOracle, SqliteHarvestStore};
pub use store::{CarryforwardDelta, HarvestCommit, HarvestStore};
pub use tax_calculator::TaxCalculator;
pub use wash_sale::{RiskCheck, RiskLevel, SaleEvent, WashSaleTracker};
