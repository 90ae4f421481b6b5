// =============================================================================
// Hurst Exponent — Rescaled Range (R/S) and Detrended Fluctuation (DFA)
// =============================================================================
//
// Both estimators operate on log returns, i.e. on the partial sums of the
// return series:
//
//   H > 0.5  =>  persistent / trending
//   H ~ 0.5  =>  random walk
//   H < 0.5  =>  anti-persistent / mean-reverting
//
// R/S:
//   1. For each window size n in {8, 16, 32, ...} up to half the sample:
//      split returns into non-overlapping chunks, compute R/S per chunk
//      (range of cumulative deviations over population sigma) and average.
//   2. Slope of log(avg R/S) on log(n) is H.
//
// DFA (order 1):
//   1. Profile Y = cumsum(r - mean(r)).
//   2. For log-spaced scales s: linear detrend Y in each non-overlapping
//      window, F(s) = RMS of residuals across windows.
//   3. Slope of log F(s) on log s is H.
//
// Below `min_window` returns both estimators return exactly 0.5, the neutral
// "no opinion" value.  Results are clamped to [0, 1].

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::trace;

use crate::stats;

/// Neutral Hurst value returned when there is too little data.
pub const NEUTRAL_HURST: f64 = 0.5;

/// Smallest R/S chunk.
const MIN_RS_CHUNK: usize = 8;

/// Smallest DFA scale (a line needs at least a few points to detrend).
const MIN_DFA_SCALE: usize = 4;

/// A point estimate with an optional 95% confidence interval.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HurstEstimate {
    pub value: f64,
    pub ci: Option<(f64, f64)>,
}

/// Hurst exponent by rescaled-range analysis.
pub fn hurst_rs(returns: &[f64], min_window: usize) -> f64 {
    if returns.len() < min_window.max(2 * MIN_RS_CHUNK) {
        trace!(
            len = returns.len(),
            min = min_window,
            "Hurst R/S: insufficient data"
        );
        return NEUTRAL_HURST;
    }

    let mut log_n: Vec<f64> = Vec::new();
    let mut log_rs: Vec<f64> = Vec::new();

    let mut window = MIN_RS_CHUNK;
    while window <= returns.len() / 2 {
        let num_chunks = returns.len() / window;

        let mut rs_sum = 0.0_f64;
        let mut valid_chunks = 0usize;

        for chunk in returns.chunks_exact(window).take(num_chunks) {
            let mean = chunk.iter().sum::<f64>() / window as f64;

            let variance = chunk.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / window as f64;
            let std_dev = variance.sqrt();

            if std_dev < f64::EPSILON {
                continue;
            }

            let mut running = 0.0_f64;
            let mut max_dev = f64::NEG_INFINITY;
            let mut min_dev = f64::INFINITY;
            for &val in chunk {
                running += val - mean;
                max_dev = max_dev.max(running);
                min_dev = min_dev.min(running);
            }

            rs_sum += (max_dev - min_dev) / std_dev;
            valid_chunks += 1;
        }

        if valid_chunks > 0 {
            let avg_rs = rs_sum / valid_chunks as f64;
            if avg_rs > 0.0 {
                log_n.push((window as f64).ln());
                log_rs.push(avg_rs.ln());
            }
        }

        window *= 2;
    }

    if log_n.len() < 2 {
        trace!("Hurst R/S: insufficient valid window sizes for regression");
        return NEUTRAL_HURST;
    }

    match stats::ols_slope(&log_n, &log_rs) {
        Some(slope) if slope.is_finite() => {
            let hurst = slope.clamp(0.0, 1.0);
            trace!(
                hurst = format!("{:.4}", hurst),
                points = log_n.len(),
                "Hurst R/S computed"
            );
            hurst
        }
        _ => NEUTRAL_HURST,
    }
}

/// Hurst exponent by first-order detrended fluctuation analysis.
pub fn hurst_dfa(returns: &[f64], min_window: usize) -> f64 {
    let n = returns.len();
    if n < min_window.max(4 * MIN_DFA_SCALE) {
        trace!(len = n, min = min_window, "Hurst DFA: insufficient data");
        return NEUTRAL_HURST;
    }

    let mean = stats::mean(returns);
    let mut profile = Vec::with_capacity(n);
    let mut running = 0.0_f64;
    for r in returns {
        running += r - mean;
        profile.push(running);
    }

    let mut log_s = Vec::new();
    let mut log_f = Vec::new();
    for scale in dfa_scales(n) {
        if let Some(f) = fluctuation(&profile, scale) {
            if f > 0.0 {
                log_s.push((scale as f64).ln());
                log_f.push(f.ln());
            }
        }
    }

    if log_s.len() < 2 {
        trace!("Hurst DFA: fewer than two usable scales");
        return NEUTRAL_HURST;
    }

    match stats::ols_slope(&log_s, &log_f) {
        Some(slope) if slope.is_finite() => {
            let hurst = slope.clamp(0.0, 1.0);
            trace!(
                hurst = format!("{:.4}", hurst),
                scales = log_s.len(),
                "Hurst DFA computed"
            );
            hurst
        }
        _ => NEUTRAL_HURST,
    }
}

/// Log-spaced integer scales between MIN_DFA_SCALE and n / 4.
fn dfa_scales(n: usize) -> Vec<usize> {
    let max_scale = n / 4;
    if max_scale < MIN_DFA_SCALE {
        return Vec::new();
    }
    let lo = (MIN_DFA_SCALE as f64).ln();
    let hi = (max_scale as f64).ln();
    let steps = 12usize;
    let mut scales: Vec<usize> = (0..=steps)
        .map(|i| (lo + (hi - lo) * i as f64 / steps as f64).exp().round() as usize)
        .collect();
    scales.dedup();
    scales
}

/// RMS residual of a linear detrend of `profile` over windows of `scale`.
fn fluctuation(profile: &[f64], scale: usize) -> Option<f64> {
    let windows = profile.len() / scale;
    if windows == 0 {
        return None;
    }

    // x = 0..scale is shared by every window.
    let x_mean = (scale - 1) as f64 / 2.0;
    let sxx: f64 = (0..scale).map(|i| (i as f64 - x_mean).powi(2)).sum();

    let mut total = 0.0_f64;
    for seg in profile.chunks_exact(scale).take(windows) {
        let y_mean = seg.iter().sum::<f64>() / scale as f64;
        let sxy: f64 = seg
            .iter()
            .enumerate()
            .map(|(i, y)| (i as f64 - x_mean) * (y - y_mean))
            .sum();
        let slope = sxy / sxx;
        total += seg
            .iter()
            .enumerate()
            .map(|(i, y)| {
                let fitted = y_mean + slope * (i as f64 - x_mean);
                (y - fitted).powi(2)
            })
            .sum::<f64>();
    }

    Some((total / (windows * scale) as f64).sqrt())
}

/// Point estimate plus a moving-block bootstrap CI.
///
/// The CI is omitted below `min_window` or when `resamples` is zero.
pub fn with_block_bootstrap<F>(
    returns: &[f64],
    min_window: usize,
    resamples: usize,
    seed: u64,
    estimator: F,
) -> HurstEstimate
where
    F: Fn(&[f64], usize) -> f64,
{
    let value = estimator(returns, min_window);
    let n = returns.len();
    if n < min_window.max(2) || resamples == 0 {
        return HurstEstimate { value, ci: None };
    }

    let block = ((n as f64).sqrt().round() as usize).clamp(2, n);
    let mut rng = StdRng::seed_from_u64(seed);
    let mut draws = Vec::with_capacity(resamples);
    let mut sample = Vec::with_capacity(n);

    for _ in 0..resamples {
        sample.clear();
        while sample.len() < n {
            let start = rng.gen_range(0..=n - block);
            let take = block.min(n - sample.len());
            sample.extend_from_slice(&returns[start..start + take]);
        }
        draws.push(estimator(&sample, min_window));
    }

    let ci = stats::percentile_interval(&mut draws)
        .map(|(lo, hi)| (lo.clamp(0.0, 1.0), hi.clamp(0.0, 1.0)));
    HurstEstimate { value, ci }
}

/// DFA on returns winsorised at `k` robust standard deviations.
///
/// `None` below `min_window`.
pub fn robust_hurst(returns: &[f64], min_window: usize, k: f64) -> Option<f64> {
    if returns.len() < min_window {
        return None;
    }
    let centre = stats::median(returns)?;
    let scale = 1.4826 * stats::mad(returns)?;
    if scale < f64::EPSILON {
        return Some(hurst_dfa(returns, min_window));
    }
    let lo = centre - k * scale;
    let hi = centre + k * scale;
    let clipped: Vec<f64> = returns.iter().map(|r| r.clamp(lo, hi)).collect();
    Some(hurst_dfa(&clipped, min_window))
}

/// Mean and standard deviation of R/S Hurst over sliding windows.
///
/// `None` unless at least two full windows fit.
pub fn rolling_hurst(returns: &[f64], window: usize, step: usize) -> Option<(f64, f64)> {
    if window == 0 || step == 0 || returns.len() < window {
        return None;
    }
    let values: Vec<f64> = (0..=returns.len() - window)
        .step_by(step)
        .map(|start| hurst_rs(&returns[start..start + window], window.min(2 * MIN_RS_CHUNK)))
        .collect();
    if values.len() < 2 {
        return None;
    }
    Some((stats::mean(&values), stats::std_dev(&values)))
}
