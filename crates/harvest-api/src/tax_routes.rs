//! Tax-loss harvesting endpoints.

use axum::{
    extract::{Path, Query, State},
    routing::{get, post, put},
    Json, Router,
};
use chrono::{Datelike, Utc};
use serde::{Deserialize, Serialize};

use harvest_engine::{
    AlternativeSet, CarryforwardDelta, CarryforwardReport, ExecuteRequest, HarvestError,
    HarvestHistoryRecord, HarvestPreview, HarvestReceipt, HarvestRequest, RiskCheck, ScanReport,
    SymbolRecommendation, TaxDashboard, UserTaxPreferences, WashSaleRecord, YearEndReport,
};

use crate::{ApiResponse, AppError, AppState};

#[derive(Deserialize)]
pub struct ThresholdQuery {
    #[serde(alias = "minThreshold")]
    pub min_threshold: Option<f64>,
}

#[derive(Deserialize)]
pub struct SectorQuery {
    pub sector: Option<String>,
}

#[derive(Deserialize)]
pub struct UserQuery {
    pub user_id: i64,
}

#[derive(Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<i64>,
}

#[derive(Deserialize)]
pub struct YearQuery {
    pub year: Option<i32>,
}

#[derive(Deserialize)]
pub struct WashSaleScopeQuery {
    #[serde(default)]
    pub active_only: bool,
}

/// Request to classify a sell/replacement pair.
#[derive(Deserialize)]
pub struct WashSaleCheckRequest {
    pub symbol: String,
    #[serde(alias = "replacementSymbol")]
    pub replacement_symbol: String,
}

#[derive(Serialize)]
pub struct WashSaleCheckResponse {
    pub symbol: String,
    pub replacement_symbol: String,
    pub check: RiskCheck,
}

/// Request to record a carryforward adjustment.
#[derive(Deserialize)]
pub struct CarryforwardUpdateRequest {
    pub user_id: i64,
    pub tax_year: i32,
    #[serde(default)]
    pub short_term_loss: f64,
    #[serde(default)]
    pub long_term_loss: f64,
    #[serde(default)]
    pub used_against_gains: f64,
    #[serde(default)]
    pub used_against_income: f64,
    pub idempotency_key: Option<String>,
}

#[derive(Serialize)]
pub struct CarryforwardUpdateResponse {
    pub applied: bool,
    pub report: CarryforwardReport,
}

/// Wash-sale window with the countdown precomputed for display.
#[derive(Serialize)]
pub struct WashSaleWindowView {
    #[serde(flatten)]
    pub window: WashSaleRecord,
    pub days_remaining: i64,
}

pub fn tax_routes() -> Router<AppState> {
    Router::new()
        // Dashboard and scanning
        .route("/api/tax/dashboard/:portfolio_id", get(get_dashboard))
        .route("/api/tax/opportunities/:portfolio_id", get(get_opportunities))
        // Replacements and risk
        .route("/api/tax/alternatives/:symbol", get(get_alternatives))
        .route("/api/tax/wash-sale-check", post(check_wash_sale))
        .route(
            "/api/tax/recommendation/:portfolio_id/:symbol",
            get(get_recommendation),
        )
        // Wash-sale windows
        .route("/api/tax/wash-sales/:portfolio_id", get(get_wash_sales))
        // Two-phase execution
        .route("/api/tax/harvest/preview", post(preview_harvest))
        .route("/api/tax/harvest/execute", post(execute_harvest))
        .route("/api/tax/history/:portfolio_id", get(get_history))
        // Carryforward and reporting
        .route("/api/tax/carryforward", get(get_carryforward))
        .route("/api/tax/carryforward", post(update_carryforward))
        .route("/api/tax/year-end/:portfolio_id", get(get_year_end))
        // Preferences
        .route("/api/tax/preferences", get(get_preferences))
        .route("/api/tax/preferences", put(put_preferences))
}

async fn get_dashboard(
    State(state): State<AppState>,
    Path(portfolio_id): Path<i64>,
) -> Result<Json<ApiResponse<TaxDashboard>>, AppError> {
    let dashboard = state.aggregator.dashboard(portfolio_id).await?;
    Ok(Json(ApiResponse::success(dashboard)))
}

async fn get_opportunities(
    State(state): State<AppState>,
    Path(portfolio_id): Path<i64>,
    Query(query): Query<ThresholdQuery>,
) -> Result<Json<ApiResponse<ScanReport>>, AppError> {
    let report = state.scanner.scan(portfolio_id, query.min_threshold).await?;
    Ok(Json(ApiResponse::success(report)))
}

async fn get_alternatives(
    State(state): State<AppState>,
    Path(symbol): Path<String>,
    Query(query): Query<SectorQuery>,
) -> Result<Json<ApiResponse<AlternativeSet>>, AppError> {
    let set = state
        .resolver
        .get_alternatives(&symbol, query.sector.as_deref());
    Ok(Json(ApiResponse::success(set)))
}

async fn check_wash_sale(
    State(state): State<AppState>,
    Json(request): Json<WashSaleCheckRequest>,
) -> Result<Json<ApiResponse<WashSaleCheckResponse>>, AppError> {
    let check = state
        .tracker
        .check_risk(&request.symbol, &request.replacement_symbol);
    Ok(Json(ApiResponse::success(WashSaleCheckResponse {
        symbol: request.symbol.to_uppercase(),
        replacement_symbol: request.replacement_symbol.to_uppercase(),
        check,
    })))
}

async fn get_recommendation(
    State(state): State<AppState>,
    Path((portfolio_id, symbol)): Path<(i64, String)>,
) -> Result<Json<ApiResponse<SymbolRecommendation>>, AppError> {
    let rec = state
        .aggregator
        .symbol_recommendation(portfolio_id, &symbol)
        .await?;
    Ok(Json(ApiResponse::success(rec)))
}

async fn get_wash_sales(
    State(state): State<AppState>,
    Path(portfolio_id): Path<i64>,
    Query(query): Query<WashSaleScopeQuery>,
) -> Result<Json<ApiResponse<Vec<WashSaleWindowView>>>, AppError> {
    let portfolio = state
        .store
        .get_portfolio(portfolio_id)
        .await?
        .ok_or_else(|| HarvestError::NotFound(format!("portfolio {}", portfolio_id)))?;

    let windows = if query.active_only {
        state
            .tracker
            .active_windows(portfolio.user_id, Some(portfolio_id))
            .await?
    } else {
        state
            .tracker
            .all_windows(portfolio.user_id, Some(portfolio_id))
            .await?
    };

    let today = Utc::now().date_naive();
    let views = windows
        .into_iter()
        .map(|w| WashSaleWindowView {
            days_remaining: w.days_remaining(today),
            window: w,
        })
        .collect();
    Ok(Json(ApiResponse::success(views)))
}

async fn preview_harvest(
    State(state): State<AppState>,
    Json(request): Json<HarvestRequest>,
) -> Result<Json<ApiResponse<HarvestPreview>>, AppError> {
    let preview = state.executor.preview(&request).await?;
    Ok(Json(ApiResponse::success(preview)))
}

async fn execute_harvest(
    State(state): State<AppState>,
    Json(request): Json<ExecuteRequest>,
) -> Result<Json<ApiResponse<HarvestReceipt>>, AppError> {
    let receipt = state.executor.execute(&request).await?;
    Ok(Json(ApiResponse::success(receipt)))
}

async fn get_history(
    State(state): State<AppState>,
    Path(portfolio_id): Path<i64>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<ApiResponse<Vec<HarvestHistoryRecord>>>, AppError> {
    let limit = query.limit.unwrap_or(50).clamp(1, 500);
    let records = state.store.list_history(portfolio_id, limit).await?;
    Ok(Json(ApiResponse::success(records)))
}

async fn get_carryforward(
    State(state): State<AppState>,
    Query(query): Query<UserQuery>,
) -> Result<Json<ApiResponse<CarryforwardReport>>, AppError> {
    let report = state.ledger.get_balance(query.user_id).await?;
    Ok(Json(ApiResponse::success(report)))
}

async fn update_carryforward(
    State(state): State<AppState>,
    Json(request): Json<CarryforwardUpdateRequest>,
) -> Result<Json<ApiResponse<CarryforwardUpdateResponse>>, AppError> {
    let applied = state
        .ledger
        .update_carryforward(
            request.user_id,
            request.tax_year,
            CarryforwardDelta {
                short_term_loss: request.short_term_loss,
                long_term_loss: request.long_term_loss,
                used_against_gains: request.used_against_gains,
                used_against_income: request.used_against_income,
            },
            request.idempotency_key.as_deref(),
        )
        .await?;

    let report = state.ledger.get_balance(request.user_id).await?;
    Ok(Json(ApiResponse::success(CarryforwardUpdateResponse {
        applied,
        report,
    })))
}

async fn get_year_end(
    State(state): State<AppState>,
    Path(portfolio_id): Path<i64>,
    Query(query): Query<YearQuery>,
) -> Result<Json<ApiResponse<YearEndReport>>, AppError> {
    let year = query.year.unwrap_or_else(|| Utc::now().year());
    let report = state.aggregator.year_end_report(portfolio_id, year).await?;
    Ok(Json(ApiResponse::success(report)))
}

async fn get_preferences(
    State(state): State<AppState>,
    Query(query): Query<UserQuery>,
) -> Result<Json<ApiResponse<UserTaxPreferences>>, AppError> {
    let prefs = state
        .store
        .get_preferences(query.user_id)
        .await?
        .unwrap_or_else(|| UserTaxPreferences::default_for(query.user_id));
    Ok(Json(ApiResponse::success(prefs)))
}

async fn put_preferences(
    State(state): State<AppState>,
    Json(prefs): Json<UserTaxPreferences>,
) -> Result<Json<ApiResponse<UserTaxPreferences>>, AppError> {
    prefs.validate()?;
    state.store.upsert_preferences(&prefs).await?;
    Ok(Json(ApiResponse::success(prefs)))
}
