//! Price collaborator seam.
//!
//! The engine never fails a scan because a quote is missing; callers fall
//! back to cost basis. `Ok(None)` is the cache-miss signal.

use async_trait::async_trait;
use dashmap::DashMap;

use crate::error::Result;
use crate::models::Quote;

#[async_trait]
pub trait PriceOracle: Send + Sync {
    async fn quote(&self, symbol: &str) -> Result<Option<Quote>>;
}

/// In-memory oracle for tests and development.
#[derive(Default)]
pub struct StaticPriceOracle {
    quotes: DashMap<String, Quote>,
}

impl StaticPriceOracle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_price(&self, symbol: &str, price: f64) {
        self.quotes.insert(
            symbol.to_uppercase(),
            Quote {
                symbol: symbol.to_uppercase(),
                price,
                sector: None,
                change_percent: None,
            },
        );
    }

    pub fn set_quote(&self, quote: Quote) {
        self.quotes.insert(quote.symbol.to_uppercase(), quote);
    }

    pub fn clear(&self, symbol: &str) {
        self.quotes.remove(&symbol.to_uppercase());
    }
}

#[async_trait]
impl PriceOracle for StaticPriceOracle {
    async fn quote(&self, symbol: &str) -> Result<Option<Quote>> {
        Ok(self.quotes.get(&symbol.to_uppercase()).map(|q| q.clone()))
    }
}
