// =============================================================================
// Variance Ratio — Lo-MacKinlay (1988) overlapping estimator
// =============================================================================
//
//   VR(q) = Var(q-period return) / (q * Var(1-period return))
//
// Under the random-walk null VR(q) = 1; VR > 1 indicates positive serial
// correlation (trending), VR < 1 negative (mean-reverting).  Significance uses
// the heteroskedasticity-robust statistic z*(q) and a two-sided normal
// p-value.

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::error::{RegimeError, Result};
use crate::stats;

/// Variance ratio at one horizon.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VarianceRatio {
    pub lag: usize,
    pub ratio: f64,
    pub z_stat: f64,
    pub p_value: f64,
}

/// Variance ratio of the log-price path implied by `returns` at horizon `lag`.
pub fn variance_ratio(returns: &[f64], lag: usize) -> Result<VarianceRatio> {
    let n = returns.len();
    if lag < 2 || n < 2 * lag {
        return Err(RegimeError::insufficient("variance_ratio", 2 * lag.max(2), n));
    }

    let mu = stats::mean(returns);
    let deviations: Vec<f64> = returns.iter().map(|r| r - mu).collect();
    let ss: f64 = deviations.iter().map(|d| d * d).sum();
    let var_1 = ss / (n - 1) as f64;
    if var_1 < f64::EPSILON * f64::EPSILON {
        return Err(RegimeError::insufficient("variance_ratio", n + 1, n));
    }

    // Overlapping q-period sums of demeaned returns.
    let q = lag as f64;
    let nf = n as f64;
    let m = q * (nf - q + 1.0) * (1.0 - q / nf);
    let mut window: f64 = deviations[..lag].iter().sum();
    let mut var_q_sum = window * window;
    for t in lag..n {
        window += deviations[t] - deviations[t - lag];
        var_q_sum += window * window;
    }
    let var_q = var_q_sum / m;
    let ratio = (var_q / var_1).max(0.0);

    // Heteroskedasticity-robust asymptotic variance.
    let mut theta = 0.0_f64;
    for j in 1..lag {
        let delta_num: f64 = (j..n)
            .map(|t| deviations[t].powi(2) * deviations[t - j].powi(2))
            .sum();
        let delta = nf * delta_num / (ss * ss);
        let w = 2.0 * (q - j as f64) / q;
        theta += w * w * delta;
    }

    let z_stat = if theta > 0.0 {
        (ratio - 1.0) / (theta / nf).sqrt()
    } else {
        0.0
    };
    let p_value = stats::normal_two_sided_p(z_stat);

    trace!(
        lag,
        ratio = format!("{:.4}", ratio),
        z = format!("{:.3}", z_stat),
        p = format!("{:.4}", p_value),
        "variance ratio computed"
    );

    Ok(VarianceRatio {
        lag,
        ratio,
        z_stat,
        p_value,
    })
}
