// =============================================================================
// Input Validation & Data Quality
// =============================================================================
//
// Validation runs before any statistic and rejects a series outright when:
//
//   - it is empty, or every close is missing (NaN)
//   - timestamps are not strictly increasing
//   - any present close is zero, negative or infinite
//   - more than 20% of closes are missing
//   - fewer than `min_points` closes remain
//   - it has >= 50 points but fewer than 5 distinct values
//   - more than 5% of simple returns exceed 1000%
//
// A series that passes is scored in [0, 1] for quality: small samples,
// missingness, outliers and repeated values each subtract a bounded penalty.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use tracing::trace;

use crate::config::FeatureParams;
use crate::error::{RegimeError, Result};
use crate::stats;
use crate::types::PriceSeries;

const MAX_MISSING_FRACTION: f64 = 0.20;
const FLATNESS_MIN_POINTS: usize = 50;
const MIN_UNIQUE_VALUES: usize = 5;
const EXTREME_RETURN: f64 = 10.0;
const MAX_EXTREME_FRACTION: f64 = 0.05;

/// A series that passed validation, with missing closes dropped.
#[derive(Debug, Clone)]
pub struct CleanSeries {
    pub closes: Vec<f64>,
    pub log_returns: Vec<f64>,
    pub missing_fraction: f64,
    pub as_of: DateTime<Utc>,
}

/// Data-quality assessment of a validated series.
#[derive(Debug, Clone)]
pub struct QualityReport {
    pub score: f64,
    pub completeness: f64,
    pub outlier_fraction: f64,
    pub repetition_fraction: f64,
    pub flags: Vec<String>,
}

/// Validate `series` and return its cleaned closes and log returns.
pub fn validate_series(series: &PriceSeries, params: &FeatureParams) -> Result<CleanSeries> {
    let last = series
        .bars
        .last()
        .ok_or_else(|| RegimeError::invalid("price series is empty"))?;

    if series.bars.windows(2).any(|w| w[1].timestamp <= w[0].timestamp) {
        return Err(RegimeError::invalid(
            "timestamps must be unique and strictly increasing",
        ));
    }

    let total = series.bars.len();
    let mut closes = Vec::with_capacity(total);
    let mut missing = 0usize;
    for bar in &series.bars {
        let c = bar.close;
        if c.is_nan() {
            missing += 1;
        } else if !c.is_finite() || c <= 0.0 {
            return Err(RegimeError::invalid(format!(
                "non-positive or infinite price {} at {}",
                c, bar.timestamp
            )));
        } else {
            closes.push(c);
        }
    }

    if closes.is_empty() {
        return Err(RegimeError::invalid("every close is missing"));
    }

    let missing_fraction = missing as f64 / total as f64;
    if missing_fraction > MAX_MISSING_FRACTION {
        return Err(RegimeError::invalid(format!(
            "{:.1}% of closes missing (limit {:.0}%)",
            missing_fraction * 100.0,
            MAX_MISSING_FRACTION * 100.0
        )));
    }

    if closes.len() < params.min_points {
        return Err(RegimeError::invalid(format!(
            "series too short: {} points, need {}",
            closes.len(),
            params.min_points
        )));
    }

    if closes.len() >= FLATNESS_MIN_POINTS {
        let unique: HashSet<u64> = closes.iter().map(|c| c.to_bits()).collect();
        if unique.len() < MIN_UNIQUE_VALUES {
            return Err(RegimeError::invalid(format!(
                "only {} distinct values over {} points",
                unique.len(),
                closes.len()
            )));
        }
    }

    let extreme = closes
        .windows(2)
        .filter(|w| (w[1] / w[0] - 1.0).abs() > EXTREME_RETURN)
        .count();
    let extreme_fraction = extreme as f64 / (closes.len() - 1) as f64;
    if extreme_fraction > MAX_EXTREME_FRACTION {
        return Err(RegimeError::invalid(format!(
            "{:.1}% of returns exceed {:.0}%",
            extreme_fraction * 100.0,
            EXTREME_RETURN * 100.0
        )));
    }

    let log_returns: Vec<f64> = closes.windows(2).map(|w| (w[1] / w[0]).ln()).collect();

    trace!(
        points = closes.len(),
        missing,
        "series validated"
    );

    Ok(CleanSeries {
        closes,
        log_returns,
        missing_fraction,
        as_of: last.timestamp,
    })
}

/// Score the quality of a validated series.
pub fn assess_quality(clean: &CleanSeries, params: &FeatureParams) -> QualityReport {
    let n = clean.closes.len();
    let returns = &clean.log_returns;
    let mut flags = Vec::new();

    // Sample size: linear penalty up to `full_quality_points`.
    let full = params.full_quality_points.max(1) as f64;
    let sample_penalty = 0.3 * (1.0 - (n as f64 / full).min(1.0));
    if n < params.full_quality_points {
        flags.push("low_sample".to_string());
    }

    // Missingness: the full penalty at the 20% rejection limit.
    let missing_penalty = 0.3 * (clean.missing_fraction / MAX_MISSING_FRACTION).min(1.0);
    if clean.missing_fraction > 0.05 {
        flags.push("high_missing".to_string());
    }

    let outlier_fraction = outlier_fraction(returns, params.outlier_mad_multiple);
    let outlier_penalty = 0.2 * (outlier_fraction * 10.0).min(1.0);
    if outlier_fraction > 0.02 {
        flags.push("outliers".to_string());
    }

    // Repetition: fraction of bars whose close equals the previous close.
    let repetition_fraction = if returns.is_empty() {
        0.0
    } else {
        returns.iter().filter(|r| r.abs() < f64::EPSILON).count() as f64 / returns.len() as f64
    };
    let repetition_penalty = 0.2 * ((repetition_fraction - 0.1).max(0.0) / 0.4).min(1.0);
    if repetition_fraction > 0.1 {
        flags.push("repetitive".to_string());
    }

    let score =
        (1.0 - sample_penalty - missing_penalty - outlier_penalty - repetition_penalty).clamp(0.0, 1.0);

    QualityReport {
        score,
        completeness: 1.0 - clean.missing_fraction,
        outlier_fraction,
        repetition_fraction,
        flags,
    }
}

/// Fraction of returns further than `k` robust standard deviations from the
/// median. Falls back to the sample standard deviation when the MAD is zero.
fn outlier_fraction(returns: &[f64], k: f64) -> f64 {
    if returns.len() < 3 {
        return 0.0;
    }
    let centre = stats::median(returns).unwrap_or(0.0);
    let mut scale = 1.4826 * stats::mad(returns).unwrap_or(0.0);
    if scale < f64::EPSILON {
        scale = stats::std_dev(returns);
    }
    if scale < f64::EPSILON {
        return 0.0;
    }
    returns
        .iter()
        .filter(|r| ((*r - centre) / scale).abs() > k)
        .count() as f64
        / returns.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PriceBar;

    fn series(closes: &[f64]) -> PriceSeries {
        let bars = closes
            .iter()
            .enumerate()
            .map(|(i, &close)| PriceBar {
                timestamp: DateTime::<Utc>::from_timestamp(1_700_000_000 + i as i64 * 60, 0)
                    .unwrap(),
                close,
                high: None,
                low: None,
                volume: None,
            })
            .collect();
        PriceSeries::new("TEST", "1m", bars)
    }

    fn wavy(len: usize) -> Vec<f64> {
        (0..len).map(|i| 100.0 + (i as f64 * 0.7).sin() * 3.0 + i as f64 * 0.01).collect()
    }

    fn is_invalid(r: Result<CleanSeries>) -> bool {
        matches!(r, Err(RegimeError::InvalidInput { .. }))
    }

    #[test]
    fn accepts_clean_series() {
        let clean = validate_series(&series(&wavy(120)), &FeatureParams::default()).unwrap();
        assert_eq!(clean.closes.len(), 120);
        assert_eq!(clean.log_returns.len(), 119);
        assert_eq!(clean.missing_fraction, 0.0);
    }

    #[test]
    fn rejects_empty_and_all_nan() {
        let params = FeatureParams::default();
        assert!(is_invalid(validate_series(&series(&[]), &params)));
        assert!(is_invalid(validate_series(&series(&[f64::NAN; 30]), &params)));
    }

    #[test]
    fn rejects_non_positive_prices() {
        let mut closes = wavy(60);
        closes[10] = 0.0;
        assert!(is_invalid(validate_series(&series(&closes), &FeatureParams::default())));
        closes[10] = -5.0;
        assert!(is_invalid(validate_series(&series(&closes), &FeatureParams::default())));
    }

    #[test]
    fn rejects_excessive_missing() {
        let mut closes = wavy(100);
        for c in closes.iter_mut().take(21) {
            *c = f64::NAN;
        }
        assert!(is_invalid(validate_series(&series(&closes), &FeatureParams::default())));
    }

    #[test]
    fn tolerates_light_missing() {
        let mut closes = wavy(100);
        closes[5] = f64::NAN;
        closes[50] = f64::NAN;
        let clean = validate_series(&series(&closes), &FeatureParams::default()).unwrap();
        assert_eq!(clean.closes.len(), 98);
        assert!((clean.missing_fraction - 0.02).abs() < 1e-12);
    }

    #[test]
    fn rejects_short_series() {
        assert!(is_invalid(validate_series(&series(&wavy(19)), &FeatureParams::default())));
    }

    #[test]
    fn rejects_flat_series() {
        let closes: Vec<f64> = (0..60).map(|i| 100.0 + (i % 4) as f64).collect();
        assert!(is_invalid(validate_series(&series(&closes), &FeatureParams::default())));
    }

    #[test]
    fn rejects_extreme_returns() {
        let closes: Vec<f64> = (0..40)
            .map(|i| if i % 2 == 0 { 1.0 } else { 20.0 + i as f64 * 0.01 })
            .collect();
        assert!(is_invalid(validate_series(&series(&closes), &FeatureParams::default())));
    }

    #[test]
    fn rejects_unordered_timestamps() {
        let mut s = series(&wavy(30));
        s.bars.swap(3, 4);
        assert!(is_invalid(validate_series(&s, &FeatureParams::default())));
    }

    #[test]
    fn quality_penalises_small_samples() {
        let params = FeatureParams::default();
        let small = assess_quality(&validate_series(&series(&wavy(30)), &params).unwrap(), &params);
        let large = assess_quality(&validate_series(&series(&wavy(300)), &params).unwrap(), &params);
        assert!(small.score < large.score);
        assert!(small.flags.contains(&"low_sample".to_string()));
        assert!(!large.flags.contains(&"low_sample".to_string()));
        assert!((0.0..=1.0).contains(&small.score));
    }

    #[test]
    fn quality_flags_repetition() {
        let params = FeatureParams::default();
        let closes: Vec<f64> = (0..200)
            .map(|i| 100.0 + ((i / 3) as f64 * 0.9).sin() * 2.0)
            .collect();
        let q = assess_quality(&validate_series(&series(&closes), &params).unwrap(), &params);
        assert!(q.repetition_fraction > 0.5);
        assert!(q.flags.contains(&"repetitive".to_string()));
        assert!(q.score < 0.85);
    }

    #[test]
    fn quality_flags_outliers() {
        let params = FeatureParams::default();
        let clean = assess_quality(&validate_series(&series(&wavy(300)), &params).unwrap(), &params);
        assert_eq!(clean.outlier_fraction, 0.0);
        assert!(!clean.flags.contains(&"outliers".to_string()));

        // Six isolated +50% spikes: each makes one jump up and one back down.
        let mut closes = wavy(300);
        for i in (40..=240).step_by(40) {
            closes[i] *= 1.5;
        }
        let spiked = assess_quality(&validate_series(&series(&closes), &params).unwrap(), &params);
        assert!((spiked.outlier_fraction - 12.0 / 299.0).abs() < 1e-12, "{}", spiked.outlier_fraction);
        assert!(spiked.flags.contains(&"outliers".to_string()));
        assert!(spiked.score < clean.score);
        assert!((clean.score - spiked.score - 0.2 * (spiked.outlier_fraction * 10.0)).abs() < 1e-9);
    }
}
