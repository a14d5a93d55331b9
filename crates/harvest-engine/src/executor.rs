//! Two-phase harvest execution: preview (pure projection) and execute
//! (atomic state transition).
//!
//! Execute refuses to run inside an active wash-sale window unless the
//! caller passes an explicit `force` override; preview only reports the
//! blocker. The commit itself — sell leg, optional replacement buy,
//! wash-sale window, history record, carryforward delta — is applied as one
//! unit by the store.

use chrono::{Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{HarvestError, Result};
use crate::models::{
    wash_sale_window_bounds, Holding, HoldingPeriod, Portfolio, UserTaxPreferences,
};
use crate::oracle::PriceOracle;
use crate::store::{CarryforwardDelta, HarvestCommit, HarvestStore, ReplacementLeg};
use crate::tax_calculator::TaxCalculator;
use crate::wash_sale::{RiskCheck, RiskLevel, WashSaleTracker};

#[derive(Debug, Clone, Deserialize)]
pub struct HarvestRequest {
    pub portfolio_id: i64,
    pub symbol: String,
    pub replacement_symbol: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExecuteRequest {
    pub portfolio_id: i64,
    pub symbol: String,
    pub replacement_symbol: Option<String>,
    pub lot_method: Option<String>,
    /// Explicit acceptance of wash-sale risk; without it, execution inside
    /// an active window is refused.
    #[serde(default)]
    pub force: bool,
}

/// Replacement leg as projected for a preview or commit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplacementPlan {
    pub symbol: String,
    pub shares: f64,
    pub price: f64,
    pub wash_sale_risk: RiskCheck,
}

/// Projection returned by preview; the execute path computes the same shape
/// before committing, so a confirmation UI renders identical data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HarvestPreview {
    pub portfolio_id: i64,
    pub symbol: String,
    pub shares: f64,
    pub avg_cost_basis: f64,
    pub current_price: f64,
    pub proceeds: f64,
    pub cost_basis: f64,
    pub realized_loss: f64,
    pub loss_percent: f64,
    pub holding_period: HoldingPeriod,
    pub tax_savings: f64,
    pub in_wash_sale_window: bool,
    pub replacement: Option<ReplacementPlan>,
    pub can_execute: bool,
    pub blockers: Vec<String>,
}

/// Receipt for a committed harvest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HarvestReceipt {
    pub history_id: i64,
    pub harvest_id: String,
    pub symbol: String,
    pub shares_sold: f64,
    pub sale_price: f64,
    pub realized_loss: f64,
    pub tax_savings: f64,
    pub holding_period: HoldingPeriod,
    pub replacement_symbol: Option<String>,
    pub replacement_shares: Option<f64>,
    pub replacement_price: Option<f64>,
    pub wash_sale_window_end: NaiveDate,
    pub wash_sale_safe: bool,
}

struct Projection {
    portfolio: Portfolio,
    holding: Holding,
    prefs: UserTaxPreferences,
    sector: Option<String>,
    price_is_live: bool,
    current_price: f64,
    proceeds: f64,
    cost_basis: f64,
    realized_loss: f64,
    loss_percent: f64,
    holding_period: HoldingPeriod,
    tax_savings: f64,
    in_wash_sale_window: bool,
}

#[derive(Clone)]
pub struct HarvestExecutor {
    store: Arc<dyn HarvestStore>,
    oracle: Arc<dyn PriceOracle>,
    tracker: WashSaleTracker,
    calculator: TaxCalculator,
}

impl HarvestExecutor {
    pub fn new(
        store: Arc<dyn HarvestStore>,
        oracle: Arc<dyn PriceOracle>,
        tracker: WashSaleTracker,
        calculator: TaxCalculator,
    ) -> Self {
        Self {
            store,
            oracle,
            tracker,
            calculator,
        }
    }

    async fn project(&self, portfolio_id: i64, symbol: &str) -> Result<Projection> {
        let symbol = symbol.to_uppercase();

        let portfolio = self
            .store
            .get_portfolio(portfolio_id)
            .await?
            .ok_or_else(|| HarvestError::NotFound(format!("portfolio {}", portfolio_id)))?;

        let holding = self
            .store
            .get_holding(portfolio_id, &symbol)
            .await?
            .ok_or_else(|| {
                HarvestError::NotFound(format!(
                    "holding {} not found in portfolio {}",
                    symbol, portfolio_id
                ))
            })?;

        let prefs = self
            .store
            .get_preferences(portfolio.user_id)
            .await?
            .unwrap_or_else(|| UserTaxPreferences::default_for(portfolio.user_id));

        let quote = self.oracle.quote(&symbol).await.unwrap_or(None);
        let price_is_live = quote.is_some();
        let current_price = quote.as_ref().map(|q| q.price).unwrap_or(holding.avg_cost_basis);
        let sector = holding
            .sector
            .clone()
            .or_else(|| quote.as_ref().and_then(|q| q.sector.clone()));

        let proceeds = holding.shares * current_price;
        let cost_basis = holding.cost_basis();
        let realized_loss = cost_basis - proceeds;
        let loss_percent =
            (current_price - holding.avg_cost_basis) / holding.avg_cost_basis * 100.0;

        let holding_period = self.calculator.holding_period(portfolio_id, &symbol).await?;
        let tax_savings = if realized_loss > 0.0 {
            TaxCalculator::tax_savings(realized_loss, holding_period, &prefs)
        } else {
            0.0
        };

        let in_wash_sale_window = self
            .tracker
            .in_active_window(portfolio.user_id, &symbol)
            .await?;

        Ok(Projection {
            portfolio,
            holding,
            prefs,
            sector,
            price_is_live,
            current_price,
            proceeds,
            cost_basis,
            realized_loss,
            loss_percent,
            holding_period,
            tax_savings,
            in_wash_sale_window,
        })
    }

    /// Price the replacement leg: equivalent dollar value at the
    /// replacement's current price, substituting the sale price when the
    /// quote is missing. The realized loss on the sell leg is already fixed
    /// either way.
    async fn plan_replacement(
        &self,
        symbol: &str,
        replacement_symbol: &str,
        proceeds: f64,
        sale_price: f64,
    ) -> Result<ReplacementPlan> {
        let replacement_symbol = replacement_symbol.to_uppercase();

        let price = match self.oracle.quote(&replacement_symbol).await {
            Ok(Some(q)) => q.price,
            Ok(None) => {
                warn!(
                    symbol = %replacement_symbol,
                    "no quote for replacement, substituting sale price"
                );
                sale_price
            }
            Err(e) => {
                warn!(
                    symbol = %replacement_symbol,
                    error = %e,
                    "replacement quote failed, substituting sale price"
                );
                sale_price
            }
        };

        let shares = if price > 0.0 { proceeds / price } else { 0.0 };

        Ok(ReplacementPlan {
            wash_sale_risk: self.tracker.check_risk(symbol, &replacement_symbol),
            symbol: replacement_symbol,
            shares,
            price,
        })
    }

    /// Read-only projection of a harvest. No writes occur.
    pub async fn preview(&self, request: &HarvestRequest) -> Result<HarvestPreview> {
        let p = self.project(request.portfolio_id, &request.symbol).await?;

        let replacement = match &request.replacement_symbol {
            Some(rep) => Some(
                self.plan_replacement(&p.holding.symbol, rep, p.proceeds, p.current_price)
                    .await?,
            ),
            None => None,
        };

        let mut blockers = Vec::new();
        if p.in_wash_sale_window {
            blockers.push(format!(
                "{} is in an active wash-sale window",
                p.holding.symbol
            ));
        }
        if !p.price_is_live {
            blockers.push(format!("no current price for {}", p.holding.symbol));
        }
        if p.realized_loss <= 0.0 {
            blockers.push("position has no realizable loss".to_string());
        }

        Ok(HarvestPreview {
            portfolio_id: request.portfolio_id,
            symbol: p.holding.symbol.clone(),
            shares: p.holding.shares,
            avg_cost_basis: p.holding.avg_cost_basis,
            current_price: p.current_price,
            proceeds: p.proceeds,
            cost_basis: p.cost_basis,
            realized_loss: p.realized_loss,
            loss_percent: p.loss_percent,
            holding_period: p.holding_period,
            tax_savings: p.tax_savings,
            in_wash_sale_window: p.in_wash_sale_window,
            replacement,
            can_execute: blockers.is_empty(),
            blockers,
        })
    }

    /// Execute the harvest: sell the full position, optionally buy the
    /// replacement, record the wash-sale window and history — atomically.
    pub async fn execute(&self, request: &ExecuteRequest) -> Result<HarvestReceipt> {
        let p = self.project(request.portfolio_id, &request.symbol).await?;

        // The sell leg needs a real price; the scan-time cost-basis fallback
        // would fabricate a fill here.
        if !p.price_is_live {
            return Err(HarvestError::PriceUnavailable(p.holding.symbol));
        }
        if p.in_wash_sale_window && !request.force {
            return Err(HarvestError::WashSaleBlocked(format!(
                "{} is in an active wash-sale window; pass force to accept the risk",
                p.holding.symbol
            )));
        }
        // force accepts wash-sale risk only; a position without a loss is
        // never harvestable through this path.
        if p.realized_loss <= 0.0 {
            return Err(HarvestError::Validation(format!(
                "{} has no realizable loss at the current price",
                p.holding.symbol
            )));
        }

        let replacement = match &request.replacement_symbol {
            Some(rep) => Some(
                self.plan_replacement(&p.holding.symbol, rep, p.proceeds, p.current_price)
                    .await?,
            ),
            None => None,
        };

        let wash_sale_safe = replacement
            .as_ref()
            .map(|r| r.wash_sale_risk.risk_level != RiskLevel::High)
            .unwrap_or(true);

        let sale_date = Utc::now().date_naive();
        let (window_start, window_end) = wash_sale_window_bounds(sale_date);
        let harvest_id = Uuid::new_v4().to_string();

        let carryforward = if p.realized_loss > 0.0 {
            let delta = match p.holding_period {
                HoldingPeriod::ShortTerm => CarryforwardDelta {
                    short_term_loss: p.realized_loss,
                    ..Default::default()
                },
                HoldingPeriod::LongTerm => CarryforwardDelta {
                    long_term_loss: p.realized_loss,
                    ..Default::default()
                },
            };
            Some((sale_date.year(), delta))
        } else {
            None
        };

        let commit = HarvestCommit {
            harvest_id: harvest_id.clone(),
            user_id: p.portfolio.user_id,
            portfolio_id: request.portfolio_id,
            symbol: p.holding.symbol.clone(),
            shares: p.holding.shares,
            sale_price: p.current_price,
            cost_basis: p.cost_basis,
            realized_loss: p.realized_loss,
            tax_savings: p.tax_savings,
            holding_period: p.holding_period.as_str().to_string(),
            lot_method: request
                .lot_method
                .clone()
                .unwrap_or_else(|| p.prefs.default_lot_method.clone()),
            sale_date,
            window_start,
            window_end,
            replacement: replacement.as_ref().map(|r| ReplacementLeg {
                symbol: r.symbol.clone(),
                shares: r.shares,
                price: r.price,
                sector: p.sector.clone(),
            }),
            wash_sale_safe,
            executed_at: Utc::now(),
            carryforward,
        };

        // The projection saw the holding; if the commit can't find it, a
        // concurrent execute won the race.
        let history_id = match self.store.commit_harvest(&commit).await {
            Ok(id) => id,
            Err(HarvestError::NotFound(_)) => {
                return Err(HarvestError::Conflict(format!(
                    "{} was liquidated by a concurrent harvest",
                    p.holding.symbol
                )))
            }
            Err(e) => return Err(e),
        };

        info!(
            portfolio_id = request.portfolio_id,
            symbol = %p.holding.symbol,
            realized_loss = p.realized_loss,
            tax_savings = p.tax_savings,
            replacement = replacement.as_ref().map(|r| r.symbol.as_str()),
            "harvest executed"
        );

        Ok(HarvestReceipt {
            history_id,
            harvest_id,
            symbol: p.holding.symbol,
            shares_sold: p.holding.shares,
            sale_price: p.current_price,
            realized_loss: p.realized_loss,
            tax_savings: p.tax_savings,
            holding_period: p.holding_period,
            replacement_symbol: replacement.as_ref().map(|r| r.symbol.clone()),
            replacement_shares: replacement.as_ref().map(|r| r.shares),
            replacement_price: replacement.as_ref().map(|r| r.price),
            wash_sale_window_end: window_end,
            wash_sale_safe,
        })
    }
}
