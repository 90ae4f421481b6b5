// =============================================================================
// Price sources — the collaborator that supplies bar series
// =============================================================================
//
// The engine never fetches over the network itself.  A `PriceSource` hands it
// the most recent `lookback` bars of (symbol, bar); retries, caching and
// provider quirks belong to whatever sits behind the trait.

use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::{Context, Result};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::types::{PriceBar, PriceSeries};

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

pub trait PriceSource: Send + Sync {
    /// The most recent `lookback` bars of `symbol` at bar size `bar`.
    fn load(&self, symbol: &str, bar: &str, lookback: usize) -> Result<PriceSeries>;
}

/// Composite key that identifies one bar series.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct SeriesKey {
    pub symbol: String,
    pub bar: String,
}

impl SeriesKey {
    pub fn new(symbol: impl Into<String>, bar: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            bar: bar.into(),
        }
    }
}

impl std::fmt::Display for SeriesKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.symbol, self.bar)
    }
}

// ---------------------------------------------------------------------------
// JsonDirSource -- {root}/{symbol}/{bar}.json
// ---------------------------------------------------------------------------

/// Reads bar arrays from `{root}/{symbol}/{bar}.json`.
///
/// Each file is a JSON array of `PriceBar` objects in time order.
#[derive(Debug, Clone)]
pub struct JsonDirSource {
    root: PathBuf,
}

impl JsonDirSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn path_for(&self, symbol: &str, bar: &str) -> PathBuf {
        self.root.join(symbol).join(format!("{}.json", bar))
    }
}

impl PriceSource for JsonDirSource {
    fn load(&self, symbol: &str, bar: &str, lookback: usize) -> Result<PriceSeries> {
        let path = self.path_for(symbol, bar);

        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read bars from {}", path.display()))?;

        let bars: Vec<PriceBar> = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse bars from {}", path.display()))?;

        if bars.is_empty() {
            warn!(path = %path.display(), "bar file is empty");
        }

        let series = PriceSeries::new(symbol, bar, bars).tail(lookback);
        debug!(
            key = %SeriesKey::new(symbol, bar),
            bars = series.len(),
            "series loaded from disk"
        );
        Ok(series)
    }
}

// ---------------------------------------------------------------------------
// InMemorySource -- thread-safe map of series, used in tests
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct InMemorySource {
    series: RwLock<HashMap<SeriesKey, Vec<PriceBar>>>,
}

impl InMemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the series for (series.symbol, series.bar).
    pub fn insert(&self, series: PriceSeries) {
        let key = SeriesKey::new(series.symbol, series.bar);
        self.series.write().insert(key, series.bars);
    }
}

impl PriceSource for InMemorySource {
    fn load(&self, symbol: &str, bar: &str, lookback: usize) -> Result<PriceSeries> {
        let key = SeriesKey::new(symbol, bar);
        let bars = self
            .series
            .read()
            .get(&key)
            .cloned()
            .with_context(|| format!("no series for {}", key))?;
        Ok(PriceSeries::new(symbol, bar, bars).tail(lookback))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::series;

    #[test]
    fn memory_source_returns_latest_bars() {
        let src = InMemorySource::new();
        src.insert(series("SPY", "1h", &[1.0, 2.0, 3.0, 4.0], 3_600));
        let s = src.load("SPY", "1h", 2).unwrap();
        assert_eq!(s.closes(), vec![3.0, 4.0]);
        assert!(src.load("SPY", "15m", 2).is_err());
    }

    #[test]
    fn json_dir_source_reads_symbol_bar_file() {
        let root = std::env::temp_dir().join(format!("regime-data-{}", uuid::Uuid::new_v4()));
        let src = JsonDirSource::new(&root);
        let path = src.path_for("QQQ", "1d");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        let s = series("QQQ", "1d", &[10.0, 11.0, 12.0], 86_400);
        std::fs::write(&path, serde_json::to_string(&s.bars).unwrap()).unwrap();

        let loaded = src.load("QQQ", "1d", 10).unwrap();
        assert_eq!(loaded.symbol, "QQQ");
        assert_eq!(loaded.closes(), vec![10.0, 11.0, 12.0]);
        assert_eq!(loaded.bars[0].timestamp, s.bars[0].timestamp);

        assert!(src.load("QQQ", "4h", 10).is_err());
        let _ = std::fs::remove_dir_all(&root);
    }

    #[test]
    fn series_key_display() {
        assert_eq!(SeriesKey::new("SPY", "15m").to_string(), "SPY@15m");
    }
}
