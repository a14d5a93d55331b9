//! ETF alternative resolution for loss harvesting.
//!
//! Pure functions over the static mapping tables plus a caller-supplied
//! exclusion set. No persistence, no mutation.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;

use crate::etf_map::{EtfDatabase, BROAD_MARKET_FALLBACK};
use crate::wash_sale::{RiskCheck, WashSaleTracker};

/// Ranked alternative tickers for a symbol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlternativeSet {
    pub symbol: String,
    pub sector: Option<String>,
    pub alternatives: Vec<String>,
}

/// Recommended replacement after exclusions are applied.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplacementRecommendation {
    pub symbol: String,
    pub replacement: Option<String>,
    pub wash_sale_risk: Option<RiskCheck>,
    pub considered: Vec<String>,
}

#[derive(Clone)]
pub struct EtfAlternativeResolver {
    etf_db: Arc<EtfDatabase>,
}

impl EtfAlternativeResolver {
    pub fn new(etf_db: Arc<EtfDatabase>) -> Self {
        Self { etf_db }
    }

    /// Resolution order: exact stock mapping, then sector mapping, then the
    /// broad-market fallback. Deduplicated preserving first-seen order; the
    /// symbol itself never appears.
    pub fn get_alternatives(&self, symbol: &str, sector: Option<&str>) -> AlternativeSet {
        let symbol = symbol.to_uppercase();
        let mut resolved_sector = sector.map(|s| s.to_string());
        let mut candidates: Vec<String> = Vec::new();

        if let Some(mapping) = self.etf_db.stock(&symbol) {
            resolved_sector.get_or_insert_with(|| mapping.sector.to_string());
            candidates.push(mapping.primary_etf.to_string());
            candidates.extend(mapping.thematic.iter().map(|s| s.to_string()));
        }

        if let Some(sector_name) = &resolved_sector {
            if let Some(sector_etfs) = self.etf_db.sector(sector_name) {
                candidates.push(sector_etfs.primary.to_string());
                candidates.extend(sector_etfs.alternatives.iter().map(|s| s.to_string()));
            }
        }

        if candidates.is_empty() {
            candidates.extend(BROAD_MARKET_FALLBACK.iter().map(|s| s.to_string()));
        }

        let mut seen = HashSet::new();
        let alternatives: Vec<String> = candidates
            .into_iter()
            .filter(|c| *c != symbol && seen.insert(c.clone()))
            .collect();

        AlternativeSet {
            symbol,
            sector: resolved_sector,
            alternatives,
        }
    }

    /// First alternative surviving the exclusion set, falling back to the
    /// broad-market list when every sector candidate is excluded. Callers
    /// pass already-owned symbols and symbols in active wash-sale windows as
    /// exclusions.
    pub fn recommend_replacement(
        &self,
        symbol: &str,
        sector: Option<&str>,
        exclude: &[String],
    ) -> ReplacementRecommendation {
        let set = self.get_alternatives(symbol, sector);
        let excluded: HashSet<String> = exclude
            .iter()
            .map(|s| s.to_uppercase())
            .chain(std::iter::once(set.symbol.clone()))
            .collect();

        let pick = set
            .alternatives
            .iter()
            .find(|c| !excluded.contains(*c))
            .cloned()
            .or_else(|| {
                BROAD_MARKET_FALLBACK
                    .iter()
                    .map(|s| s.to_string())
                    .find(|c| !excluded.contains(c))
            });

        let wash_sale_risk = pick
            .as_ref()
            .map(|p| WashSaleTracker::classify_risk(&self.etf_db, &set.symbol, p));

        ReplacementRecommendation {
            symbol: set.symbol.clone(),
            replacement: pick,
            wash_sale_risk,
            considered: set.alternatives,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wash_sale::RiskLevel;

    fn resolver() -> EtfAlternativeResolver {
        EtfAlternativeResolver::new(Arc::new(EtfDatabase::new()))
    }

    #[test]
    fn test_stock_resolution_order_and_dedup() {
        let set = resolver().get_alternatives("AAPL", None);
        assert_eq!(set.sector.as_deref(), Some("Technology"));
        // Stock primary first, then thematic, then sector list; VGT appears
        // once despite being in both.
        assert_eq!(set.alternatives[0], "XLK");
        assert!(set.alternatives.contains(&"QQQ".to_string()));
        let vgt_count = set.alternatives.iter().filter(|s| *s == "VGT").count();
        assert_eq!(vgt_count, 1);
        assert!(!set.alternatives.contains(&"AAPL".to_string()));
    }

    #[test]
    fn test_sector_only_resolution() {
        let set = resolver().get_alternatives("ZZZZ", Some("Energy"));
        assert_eq!(set.alternatives[0], "XLE");
    }

    #[test]
    fn test_broad_market_fallback() {
        let set = resolver().get_alternatives("ZZZZ", None);
        assert_eq!(
            set.alternatives,
            vec!["VTI".to_string(), "SPY".to_string(), "VOO".to_string()]
        );
    }

    #[test]
    fn test_recommendation_honors_exclusions() {
        let rec = resolver().recommend_replacement(
            "AAPL",
            Some("Technology"),
            &["QQQ".to_string()],
        );
        let pick = rec.replacement.unwrap();
        assert_ne!(pick, "QQQ");
        assert_ne!(pick, "AAPL");
        // A sector ETF pick against a single stock is at most low risk.
        assert_ne!(rec.wash_sale_risk.unwrap().risk_level, RiskLevel::High);
    }

    #[test]
    fn test_recommendation_falls_back_when_all_excluded() {
        let r = resolver();
        let set = r.get_alternatives("AAPL", Some("Technology"));
        let rec = r.recommend_replacement("AAPL", Some("Technology"), &set.alternatives);
        // Everything sector-specific excluded: falls back to broad market.
        assert_eq!(rec.replacement.as_deref(), Some("VTI"));
    }
}
