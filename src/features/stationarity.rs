// =============================================================================
// Stationarity — Augmented Dickey-Fuller test and mean-reversion half-life
// =============================================================================
//
// ADF regression on log prices y (constant, no trend):
//
//   dy_t = a + g * y_{t-1} + sum_{i=1..p} b_i * dy_{t-i} + e_t
//
// The statistic is t(g).  p < 0.05 rejects the unit root, i.e. the price is
// mean-reverting around a level.  p-values follow MacKinnon's (1994) response
// surface for the constant-only case with one series.
//
// Half-life: regress dy_t on y_{t-1}; with slope l < 0 the deviation from the
// mean halves every -ln(2) / l bars.

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::error::{RegimeError, Result};
use crate::stats;

/// Fewest log prices for which the ADF regression is attempted.
const ADF_MIN_POINTS: usize = 20;

// MacKinnon (1994) constant-only coefficients.
const TAU_MAX: f64 = 2.74;
const TAU_MIN: f64 = -18.83;
const TAU_STAR: f64 = -1.61;
const TAU_SMALL_P: [f64; 3] = [2.1659, 1.4412, 0.038269];
const TAU_LARGE_P: [f64; 4] = [1.7339, 0.93202, -0.12745, -0.010368];

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AdfResult {
    pub statistic: f64,
    pub p_value: f64,
    pub lags: usize,
    pub observations: usize,
}

/// Augmented Dickey-Fuller test on `log_prices`.
///
/// The augmentation order is the smaller of `max_lags` and Schwert's rule
/// `12 * (n / 100)^(1/4)`, further reduced until the regression is
/// well-determined.
pub fn adf_test(log_prices: &[f64], max_lags: usize) -> Result<AdfResult> {
    let n = log_prices.len();
    if n < ADF_MIN_POINTS {
        return Err(RegimeError::insufficient("adf", ADF_MIN_POINTS, n));
    }

    let diffs: Vec<f64> = log_prices.windows(2).map(|w| w[1] - w[0]).collect();
    let schwert = (12.0 * (n as f64 / 100.0).powf(0.25)).floor() as usize;
    let mut lags = max_lags.min(schwert);
    // Keep at least ~3 observations per regressor.
    while lags > 0 && diffs.len() - lags < 3 * (lags + 2) {
        lags -= 1;
    }

    let mut rows = Vec::with_capacity(diffs.len() - lags);
    let mut y = Vec::with_capacity(diffs.len() - lags);
    for t in lags..diffs.len() {
        let mut row = Vec::with_capacity(lags + 2);
        row.push(1.0);
        // diffs[t] = y[t+1] - y[t]; the lagged level is y[t].
        row.push(log_prices[t]);
        for i in 1..=lags {
            row.push(diffs[t - i]);
        }
        rows.push(row);
        y.push(diffs[t]);
    }

    let fit = stats::ols(&rows, &y)
        .ok_or_else(|| RegimeError::insufficient("adf", n + 1, n))?;
    let se = fit.std_errors[1];
    if se.is_nan() || se <= 0.0 {
        return Err(RegimeError::insufficient("adf", n + 1, n));
    }
    let statistic = fit.coefficients[1] / se;
    let p_value = mackinnon_p_value(statistic);

    trace!(
        statistic = format!("{:.4}", statistic),
        p = format!("{:.4}", p_value),
        lags,
        "ADF computed"
    );

    Ok(AdfResult {
        statistic,
        p_value,
        lags,
        observations: y.len(),
    })
}

/// Approximate asymptotic p-value of an ADF statistic (constant, no trend).
pub fn mackinnon_p_value(stat: f64) -> f64 {
    if stat.is_nan() {
        return 1.0;
    }
    if stat > TAU_MAX {
        return 1.0;
    }
    if stat < TAU_MIN {
        return 0.0;
    }
    let poly = if stat <= TAU_STAR {
        TAU_SMALL_P[0] + TAU_SMALL_P[1] * stat + TAU_SMALL_P[2] * stat * stat
    } else {
        TAU_LARGE_P[0]
            + TAU_LARGE_P[1] * stat
            + TAU_LARGE_P[2] * stat * stat
            + TAU_LARGE_P[3] * stat * stat * stat
    };
    stats::normal_cdf(poly).clamp(0.0, 1.0)
}

/// Mean-reversion half-life in bars; `None` when the series does not revert.
pub fn half_life(log_prices: &[f64]) -> Option<f64> {
    if log_prices.len() < 3 {
        return None;
    }
    let rows: Vec<Vec<f64>> = log_prices[..log_prices.len() - 1]
        .iter()
        .map(|&lvl| vec![1.0, lvl])
        .collect();
    let y: Vec<f64> = log_prices.windows(2).map(|w| w[1] - w[0]).collect();
    let lambda = stats::ols(&rows, &y)?.coefficients[1];
    if lambda < 0.0 && lambda.is_finite() {
        Some(-std::f64::consts::LN_2 / lambda)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{mean_reverting_prices, Noise};

    fn logs(prices: &[f64]) -> Vec<f64> {
        prices.iter().map(|p| p.ln()).collect()
    }

    #[test]
    fn mackinnon_reference_points() {
        assert!((mackinnon_p_value(-2.86) - 0.05).abs() < 0.005);
        assert!((mackinnon_p_value(-3.43) - 0.01).abs() < 0.003);
        assert!(mackinnon_p_value(0.0) > 0.9);
        assert_eq!(mackinnon_p_value(5.0), 1.0);
        assert_eq!(mackinnon_p_value(-25.0), 0.0);
    }

    #[test]
    fn mackinnon_is_continuous_at_the_switch_point() {
        let below = mackinnon_p_value(TAU_STAR - 1e-9);
        let above = mackinnon_p_value(TAU_STAR + 1e-9);
        assert!((below - above).abs() < 0.01);
    }

    #[test]
    fn mean_reverting_series_rejects_unit_root() {
        let y = logs(&mean_reverting_prices(500, 100.0, 0.3, 0.01, 41));
        let adf = adf_test(&y, 8).unwrap();
        assert!(adf.p_value < 0.01, "p={:.4}", adf.p_value);
        assert!(adf.statistic < -3.43);
    }

    #[test]
    fn explosive_series_does_not_reject() {
        let mut rng = Noise::new(9);
        let mut level = 1.0_f64;
        let y: Vec<f64> = (0..300)
            .map(|_| {
                level = 1.01 * level + 0.001 * rng.gaussian();
                level
            })
            .collect();
        let adf = adf_test(&y, 0).unwrap();
        assert!(adf.statistic > 0.0);
        assert!(adf.p_value > 0.9, "p={:.4}", adf.p_value);
    }

    #[test]
    fn short_series_is_insufficient() {
        assert!(matches!(
            adf_test(&[4.6; 10], 4),
            Err(RegimeError::InsufficientHistory { .. })
        ));
    }

    #[test]
    fn half_life_matches_reversion_speed() {
        let y = logs(&mean_reverting_prices(3000, 100.0, 0.1, 0.005, 7));
        let hl = half_life(&y).unwrap();
        // -ln2 / ln(1 - 0.1) ~ 6.6 bars; the regression approximation gives ~6.9.
        assert!((4.0..10.0).contains(&hl), "half-life {:.2}", hl);
    }

    #[test]
    fn trending_series_has_no_half_life() {
        let y: Vec<f64> = (0..200).map(|t| 4.6 + 0.001 * (t * t) as f64 / 100.0).collect();
        assert!(half_life(&y).is_none());
    }
}
