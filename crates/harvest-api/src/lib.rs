//! HTTP surface for the harvesting engine.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use harvest_engine::{
    CarryforwardLedger, EtfAlternativeResolver, EtfDatabase, HarvestDb, HarvestError,
    HarvestExecutor, HarvestStore, OpportunityScanner, PriceOracle, QuoteTableOracle,
    SqliteHarvestStore, TaxCalculator, TaxDashboardAggregator, WashSaleTracker,
};

pub mod tax_routes;

/// Standard response envelope. Every endpoint returns this shape.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
        }
    }
}

/// Engine errors mapped to HTTP statuses.
#[derive(Debug)]
pub struct AppError(pub HarvestError);

impl From<HarvestError> for AppError {
    fn from(err: HarvestError) -> Self {
        Self(err)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            HarvestError::NotFound(_) => StatusCode::NOT_FOUND,
            HarvestError::Validation(_) => StatusCode::BAD_REQUEST,
            HarvestError::WashSaleBlocked(_) | HarvestError::Conflict(_) => StatusCode::CONFLICT,
            HarvestError::PriceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            HarvestError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self.0, "internal error");
        }

        (status, Json(ApiResponse::<()>::error(self.0.to_string()))).into_response()
    }
}

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn HarvestStore>,
    pub tracker: WashSaleTracker,
    pub resolver: EtfAlternativeResolver,
    pub scanner: OpportunityScanner,
    pub executor: HarvestExecutor,
    pub ledger: CarryforwardLedger,
    pub aggregator: TaxDashboardAggregator,
}

impl AppState {
    /// Wire the full engine over one database. Quotes come from the
    /// collaborator-fed `quotes` table.
    pub fn new(db: HarvestDb) -> Self {
        let store: Arc<dyn HarvestStore> = Arc::new(SqliteHarvestStore::new(db.clone()));
        let oracle: Arc<dyn PriceOracle> = Arc::new(QuoteTableOracle::new(db));
        Self::with_parts(store, oracle)
    }

    /// Wire the engine over caller-supplied storage and pricing, used by
    /// tests to substitute in-memory implementations.
    pub fn with_parts(store: Arc<dyn HarvestStore>, oracle: Arc<dyn PriceOracle>) -> Self {
        let etf_db = Arc::new(EtfDatabase::new());

        let tracker = WashSaleTracker::new(store.clone(), etf_db.clone());
        let resolver = EtfAlternativeResolver::new(etf_db);
        let calculator = TaxCalculator::new(store.clone());
        let scanner = OpportunityScanner::new(
            store.clone(),
            oracle.clone(),
            tracker.clone(),
            resolver.clone(),
            calculator.clone(),
        );
        let executor = HarvestExecutor::new(store.clone(), oracle, tracker.clone(), calculator);
        let ledger = CarryforwardLedger::new(store.clone());
        let aggregator = TaxDashboardAggregator::new(
            store.clone(),
            scanner.clone(),
            tracker.clone(),
            resolver.clone(),
            ledger.clone(),
        );

        Self {
            store,
            tracker,
            resolver,
            scanner,
            executor,
            ledger,
            aggregator,
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    tax_routes::tax_routes()
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

pub async fn run_server() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,sqlx=warn".into()),
        )
        .init();

    let database_url =
        std::env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite:harvest.db".to_string());
    let bind_addr = std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".to_string());

    let db = HarvestDb::new(&database_url).await?;
    let state = AppState::new(db);
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!(addr = %bind_addr, "harvest api listening");
    axum::serve(listener, app).await?;

    Ok(())
}
