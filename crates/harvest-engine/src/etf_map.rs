//! Static ETF mapping tables.
//!
//! Built once at construction into an immutable lookup structure and shared
//! via `Arc` by every component that classifies substitutions. Symbols are
//! stored uppercase; callers normalize before lookup.

use std::collections::{HashMap, HashSet};

/// Primary ETF plus ranked alternatives for a sector.
#[derive(Debug, Clone)]
pub struct SectorEtfs {
    pub primary: &'static str,
    pub alternatives: &'static [&'static str],
}

/// Mapping from a single stock to its sector and substitute ETFs.
#[derive(Debug, Clone)]
pub struct StockMapping {
    pub sector: &'static str,
    pub primary_etf: &'static str,
    pub thematic: &'static [&'static str],
}

/// Broad-market fallback used when neither a stock nor a sector mapping
/// resolves, in preference order.
pub const BROAD_MARKET_FALLBACK: &[&str] = &["VTI", "SPY", "VOO"];

pub struct EtfDatabase {
    sector_etfs: HashMap<&'static str, SectorEtfs>,
    stock_map: HashMap<&'static str, StockMapping>,
    index_groups: Vec<HashSet<&'static str>>,
}

impl Default for EtfDatabase {
    fn default() -> Self {
        let mut sector_etfs = HashMap::new();
        sector_etfs.insert(
            "Technology",
            SectorEtfs { primary: "XLK", alternatives: &["VGT", "IYW", "FTEC"] },
        );
        sector_etfs.insert(
            "Healthcare",
            SectorEtfs { primary: "XLV", alternatives: &["VHT", "IYH"] },
        );
        sector_etfs.insert(
            "Financial",
            SectorEtfs { primary: "XLF", alternatives: &["VFH", "IYF"] },
        );
        sector_etfs.insert(
            "Energy",
            SectorEtfs { primary: "XLE", alternatives: &["VDE", "IYE"] },
        );
        sector_etfs.insert(
            "Consumer Discretionary",
            SectorEtfs { primary: "XLY", alternatives: &["VCR"] },
        );
        sector_etfs.insert(
            "Consumer Staples",
            SectorEtfs { primary: "XLP", alternatives: &["VDC"] },
        );
        sector_etfs.insert(
            "Industrial",
            SectorEtfs { primary: "XLI", alternatives: &["VIS"] },
        );
        sector_etfs.insert(
            "Utilities",
            SectorEtfs { primary: "XLU", alternatives: &["VPU"] },
        );
        sector_etfs.insert(
            "Materials",
            SectorEtfs { primary: "XLB", alternatives: &["VAW"] },
        );
        sector_etfs.insert(
            "Real Estate",
            SectorEtfs { primary: "XLRE", alternatives: &["VNQ", "IYR"] },
        );
        sector_etfs.insert(
            "Communication",
            SectorEtfs { primary: "XLC", alternatives: &["VOX"] },
        );

        let mut stock_map = HashMap::new();
        stock_map.insert(
            "AAPL",
            StockMapping { sector: "Technology", primary_etf: "XLK", thematic: &["QQQ", "VGT"] },
        );
        stock_map.insert(
            "MSFT",
            StockMapping { sector: "Technology", primary_etf: "XLK", thematic: &["QQQ", "VGT"] },
        );
        stock_map.insert(
            "NVDA",
            StockMapping { sector: "Technology", primary_etf: "XLK", thematic: &["SMH", "SOXX"] },
        );
        stock_map.insert(
            "GOOGL",
            StockMapping { sector: "Communication", primary_etf: "XLC", thematic: &["QQQ"] },
        );
        stock_map.insert(
            "GOOG",
            StockMapping { sector: "Communication", primary_etf: "XLC", thematic: &["QQQ"] },
        );
        stock_map.insert(
            "META",
            StockMapping { sector: "Communication", primary_etf: "XLC", thematic: &["QQQ"] },
        );
        stock_map.insert(
            "AMZN",
            StockMapping { sector: "Consumer Discretionary", primary_etf: "XLY", thematic: &["QQQ"] },
        );
        stock_map.insert(
            "TSLA",
            StockMapping { sector: "Consumer Discretionary", primary_etf: "XLY", thematic: &["DRIV"] },
        );
        stock_map.insert(
            "JPM",
            StockMapping { sector: "Financial", primary_etf: "XLF", thematic: &["VFH"] },
        );
        stock_map.insert(
            "BAC",
            StockMapping { sector: "Financial", primary_etf: "XLF", thematic: &["VFH"] },
        );
        stock_map.insert(
            "GS",
            StockMapping { sector: "Financial", primary_etf: "XLF", thematic: &["IYG"] },
        );
        stock_map.insert(
            "JNJ",
            StockMapping { sector: "Healthcare", primary_etf: "XLV", thematic: &["VHT"] },
        );
        stock_map.insert(
            "PFE",
            StockMapping { sector: "Healthcare", primary_etf: "XLV", thematic: &["IHE"] },
        );
        stock_map.insert(
            "UNH",
            StockMapping { sector: "Healthcare", primary_etf: "XLV", thematic: &["IHF"] },
        );
        stock_map.insert(
            "XOM",
            StockMapping { sector: "Energy", primary_etf: "XLE", thematic: &["VDE"] },
        );
        stock_map.insert(
            "CVX",
            StockMapping { sector: "Energy", primary_etf: "XLE", thematic: &["VDE"] },
        );

        // Curated sets of tickers considered substantially identical for
        // wash-sale purposes. Checked by set membership, never by similarity.
        let index_groups: Vec<HashSet<&'static str>> = vec![
            // S&P 500
            ["SPY", "IVV", "VOO", "SPLG"].into_iter().collect(),
            // Total US market
            ["VTI", "ITOT", "SCHB"].into_iter().collect(),
            // NASDAQ-100
            ["QQQ", "QQQM"].into_iter().collect(),
            // Russell 2000
            ["IWM", "VTWO"].into_iter().collect(),
            // US aggregate bond
            ["AGG", "BND", "SCHZ"].into_iter().collect(),
            // MSCI EAFE
            ["EFA", "IEFA"].into_iter().collect(),
            // Emerging markets
            ["EEM", "IEMG", "VWO"].into_iter().collect(),
            // Share classes of the same issuer
            ["GOOGL", "GOOG"].into_iter().collect(),
            ["BRK.A", "BRK.B"].into_iter().collect(),
        ];

        Self {
            sector_etfs,
            stock_map,
            index_groups,
        }
    }
}

impl EtfDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stock(&self, symbol: &str) -> Option<&StockMapping> {
        self.stock_map.get(symbol)
    }

    pub fn sector(&self, sector: &str) -> Option<&SectorEtfs> {
        self.sector_etfs.get(sector)
    }

    /// Whether both symbols belong to one index-tracking equivalence group.
    pub fn same_index_group(&self, a: &str, b: &str) -> bool {
        self.index_groups
            .iter()
            .any(|group| group.contains(a) && group.contains(b))
    }

    /// The designated primary sector ETF for a mapped stock.
    pub fn primary_sector_etf(&self, stock: &str) -> Option<&'static str> {
        self.stock_map.get(stock).map(|m| m.primary_etf)
    }

    /// True when one side is a mapped stock and the other is exactly that
    /// stock's primary sector ETF.
    pub fn is_stock_and_primary_etf(&self, a: &str, b: &str) -> bool {
        self.primary_sector_etf(a) == Some(b) || self.primary_sector_etf(b) == Some(a)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_group_membership() {
        let db = EtfDatabase::new();
        assert!(db.same_index_group("SPY", "IVV"));
        assert!(db.same_index_group("VOO", "SPLG"));
        assert!(!db.same_index_group("SPY", "QQQ"));
        assert!(!db.same_index_group("SPY", "AAPL"));
    }

    #[test]
    fn test_stock_primary_etf_pairing() {
        let db = EtfDatabase::new();
        assert!(db.is_stock_and_primary_etf("AAPL", "XLK"));
        assert!(db.is_stock_and_primary_etf("XLK", "AAPL"));
        assert!(!db.is_stock_and_primary_etf("AAPL", "XLE"));
    }

    #[test]
    fn test_stock_lookup_resolves_sector() {
        let db = EtfDatabase::new();
        let mapping = db.stock("XOM").unwrap();
        assert_eq!(mapping.sector, "Energy");
        assert_eq!(mapping.primary_etf, "XLE");
    }
}
