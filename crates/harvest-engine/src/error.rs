//! Error taxonomy for the harvesting engine.
//!
//! Scan and dashboard paths degrade per-symbol instead of failing wholesale,
//! so most price/provider problems never surface here. The variants below are
//! the ones callers can actually observe.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum HarvestError {
    /// Portfolio, holding, or other keyed row is absent.
    #[error("not found: {0}")]
    NotFound(String),

    /// Out-of-range preference values or malformed request fields.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Execute refused because the symbol is inside an active wash-sale
    /// window and no override was supplied.
    #[error("wash sale blocked: {0}")]
    WashSaleBlocked(String),

    /// Concurrent execute lost the race for the same holding.
    #[error("conflict: {0}")]
    Conflict(String),

    /// No quote available and no fallback applies.
    #[error("price unavailable for {0}")]
    PriceUnavailable(String),

    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),
}

pub type Result<T> = std::result::Result<T, HarvestError>;
