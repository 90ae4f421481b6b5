// =============================================================================
// Shared types used across the regime engine
// =============================================================================

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Closed set of regime labels.
///
/// `Uncertain` is only ever emitted by hysteresis while a new label is pending
/// confirmation; the classifier never produces it directly.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum RegimeLabel {
    Trending,
    MeanReverting,
    Random,
    VolatileTrending,
    Uncertain,
}

impl RegimeLabel {
    /// The three labels tracked by the transition matrix.
    pub const CANONICAL: [RegimeLabel; 3] = [
        RegimeLabel::Trending,
        RegimeLabel::MeanReverting,
        RegimeLabel::Random,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Trending => "trending",
            Self::MeanReverting => "mean_reverting",
            Self::Random => "random",
            Self::VolatileTrending => "volatile_trending",
            Self::Uncertain => "uncertain",
        }
    }

    /// Fold onto the canonical three-state alphabet.
    ///
    /// `VolatileTrending` collapses into `Trending`; `Uncertain` has no
    /// canonical counterpart.
    pub fn canonical(self) -> Option<RegimeLabel> {
        match self {
            Self::Trending | Self::VolatileTrending => Some(Self::Trending),
            Self::MeanReverting => Some(Self::MeanReverting),
            Self::Random => Some(Self::Random),
            Self::Uncertain => None,
        }
    }

    /// Sign of the directional view: +1 trending, -1 mean-reverting, 0 otherwise.
    pub fn bias(self) -> i8 {
        match self {
            Self::Trending | Self::VolatileTrending => 1,
            Self::MeanReverting => -1,
            Self::Random | Self::Uncertain => 0,
        }
    }

    /// True when the two labels take opposite directional views.
    pub fn opposes(self, other: RegimeLabel) -> bool {
        self.bias() * other.bias() < 0
    }
}

impl std::fmt::Display for RegimeLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RegimeLabel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "trending" => Ok(Self::Trending),
            "mean_reverting" => Ok(Self::MeanReverting),
            "random" => Ok(Self::Random),
            "volatile_trending" => Ok(Self::VolatileTrending),
            "uncertain" => Ok(Self::Uncertain),
            other => Err(format!("unknown regime label '{}'", other)),
        }
    }
}

/// Analysis timeframe.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub enum Tier {
    /// Roughly daily bars.
    #[serde(rename = "LT")]
    LongTerm,
    /// Roughly 4-hour bars.
    #[serde(rename = "MT")]
    MediumTerm,
    /// Roughly 15-minute bars.
    #[serde(rename = "ST")]
    ShortTerm,
    /// Sub-minute bars.
    #[serde(rename = "US")]
    UltraShort,
}

impl Tier {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::LongTerm => "LT",
            Self::MediumTerm => "MT",
            Self::ShortTerm => "ST",
            Self::UltraShort => "US",
        }
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "LT" => Ok(Self::LongTerm),
            "MT" => Ok(Self::MediumTerm),
            "ST" => Ok(Self::ShortTerm),
            "US" => Ok(Self::UltraShort),
            other => Err(format!("unknown tier '{}'", other)),
        }
    }
}

/// Duration of a bar size such as "30s", "15m", "4h", "1d" or "1w" in seconds.
pub fn bar_seconds(bar: &str) -> Option<i64> {
    let bar = bar.trim();
    let split = bar.find(|c: char| !c.is_ascii_digit())?;
    let (count, unit) = bar.split_at(split);
    let count: i64 = count.parse().ok()?;
    let unit_secs = match unit {
        "s" => 1,
        "m" | "min" => 60,
        "h" => 3_600,
        "d" => 86_400,
        "w" => 604_800,
        _ => return None,
    };
    (count > 0).then_some(count * unit_secs)
}

/// Discrete reading of the lag-1 autocorrelation of returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AcfRegime {
    Trending,
    MeanReverting,
    Neutral,
}

/// One bar of a price series. Missing closes are represented as NaN.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceBar {
    pub timestamp: DateTime<Utc>,
    pub close: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub high: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub low: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume: Option<f64>,
}

/// An ordered price series for one symbol at one bar size.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceSeries {
    pub symbol: String,
    pub bar: String,
    pub bars: Vec<PriceBar>,
}

impl PriceSeries {
    pub fn new(symbol: impl Into<String>, bar: impl Into<String>, bars: Vec<PriceBar>) -> Self {
        Self {
            symbol: symbol.into(),
            bar: bar.into(),
            bars,
        }
    }

    pub fn closes(&self) -> Vec<f64> {
        self.bars.iter().map(|b| b.close).collect()
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    /// Keep only the most recent `count` bars.
    pub fn tail(mut self, count: usize) -> Self {
        if self.bars.len() > count {
            let start = self.bars.len() - count;
            self.bars.drain(..start);
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn label_roundtrips_through_strings() {
        for label in [
            RegimeLabel::Trending,
            RegimeLabel::MeanReverting,
            RegimeLabel::Random,
            RegimeLabel::VolatileTrending,
            RegimeLabel::Uncertain,
        ] {
            assert_eq!(label.as_str().parse::<RegimeLabel>().unwrap(), label);
        }
        assert!("sideways".parse::<RegimeLabel>().is_err());
    }

    #[test]
    fn label_serialises_snake_case() {
        let json = serde_json::to_string(&RegimeLabel::MeanReverting).unwrap();
        assert_eq!(json, "\"mean_reverting\"");
    }

    #[test]
    fn canonical_folding() {
        assert_eq!(
            RegimeLabel::VolatileTrending.canonical(),
            Some(RegimeLabel::Trending)
        );
        assert_eq!(RegimeLabel::Uncertain.canonical(), None);
    }

    #[test]
    fn opposing_views() {
        assert!(RegimeLabel::Trending.opposes(RegimeLabel::MeanReverting));
        assert!(RegimeLabel::VolatileTrending.opposes(RegimeLabel::MeanReverting));
        assert!(!RegimeLabel::Trending.opposes(RegimeLabel::Random));
        assert!(!RegimeLabel::Uncertain.opposes(RegimeLabel::Trending));
    }

    #[test]
    fn tier_serialises_short_codes() {
        assert_eq!(serde_json::to_string(&Tier::ShortTerm).unwrap(), "\"ST\"");
        assert_eq!("mt".parse::<Tier>().unwrap(), Tier::MediumTerm);
    }

    #[test]
    fn bar_sizes_parse() {
        assert_eq!(bar_seconds("15m"), Some(900));
        assert_eq!(bar_seconds("4h"), Some(14_400));
        assert_eq!(bar_seconds("1d"), Some(86_400));
        assert_eq!(bar_seconds("d"), None);
        assert_eq!(bar_seconds("5y"), None);
        assert_eq!(bar_seconds("0m"), None);
    }

    #[test]
    fn tail_keeps_latest_bars() {
        let bars = (0..10)
            .map(|i| PriceBar {
                timestamp: DateTime::<Utc>::from_timestamp(i * 60, 0).unwrap(),
                close: 100.0 + i as f64,
                high: None,
                low: None,
                volume: None,
            })
            .collect();
        let series = PriceSeries::new("BTCUSDT", "1m", bars).tail(3);
        assert_eq!(series.closes(), vec![107.0, 108.0, 109.0]);
    }
}
