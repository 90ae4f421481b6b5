// =============================================================================
// Numerical helpers shared by the feature and transition modules
// =============================================================================
//
// Everything here is a pure function over slices.  Sample statistics use the
// unbiased (n - 1) denominator unless the name says otherwise; quantiles use
// linear interpolation between closest ranks.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use statrs::distribution::{ChiSquared, ContinuousCDF, Normal};

/// Two-sided 95% normal critical value.
pub const Z_95: f64 = 1.959_963_984_540_054;

pub fn mean(xs: &[f64]) -> f64 {
    if xs.is_empty() {
        return 0.0;
    }
    xs.iter().sum::<f64>() / xs.len() as f64
}

/// Unbiased sample variance. Zero for fewer than two points.
pub fn variance(xs: &[f64]) -> f64 {
    if xs.len() < 2 {
        return 0.0;
    }
    let m = mean(xs);
    xs.iter().map(|x| (x - m).powi(2)).sum::<f64>() / (xs.len() - 1) as f64
}

pub fn std_dev(xs: &[f64]) -> f64 {
    variance(xs).sqrt()
}

/// Quantile `q` in [0, 1] with linear interpolation. `None` on empty input.
pub fn quantile(xs: &[f64], q: f64) -> Option<f64> {
    if xs.is_empty() {
        return None;
    }
    let mut sorted = xs.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    Some(quantile_sorted(&sorted, q))
}

/// Quantile of an already-sorted, non-empty slice.
pub fn quantile_sorted(sorted: &[f64], q: f64) -> f64 {
    let q = q.clamp(0.0, 1.0);
    let pos = q * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    let frac = pos - lo as f64;
    sorted[lo] + (sorted[hi] - sorted[lo]) * frac
}

pub fn median(xs: &[f64]) -> Option<f64> {
    quantile(xs, 0.5)
}

/// Slope of the simple least-squares fit of `y` on `x`.
pub fn ols_slope(x: &[f64], y: &[f64]) -> Option<f64> {
    if x.len() != y.len() || x.len() < 2 {
        return None;
    }
    let x_mean = mean(x);
    let y_mean = mean(y);
    let mut numerator = 0.0_f64;
    let mut denominator = 0.0_f64;
    for (xi, yi) in x.iter().zip(y) {
        let dx = xi - x_mean;
        numerator += dx * (yi - y_mean);
        denominator += dx * dx;
    }
    if denominator.abs() < f64::EPSILON {
        return None;
    }
    Some(numerator / denominator)
}

/// Result of a multi-regressor least-squares fit.
#[derive(Debug, Clone)]
pub struct OlsFit {
    pub coefficients: Vec<f64>,
    pub std_errors: Vec<f64>,
    pub r_squared: f64,
    pub residuals: Vec<f64>,
}

/// Ordinary least squares of `y` on the design matrix `rows` (one row per
/// observation; include a column of ones for an intercept).
///
/// Returns `None` when the system is under-determined or `X'X` is singular.
pub fn ols(rows: &[Vec<f64>], y: &[f64]) -> Option<OlsFit> {
    let n = rows.len();
    let k = rows.first()?.len();
    if n != y.len() || k == 0 || n <= k {
        return None;
    }

    let mut xtx = vec![vec![0.0_f64; k]; k];
    let mut xty = vec![0.0_f64; k];
    for (row, &yi) in rows.iter().zip(y) {
        for a in 0..k {
            xty[a] += row[a] * yi;
            for b in 0..k {
                xtx[a][b] += row[a] * row[b];
            }
        }
    }

    let inv = invert(xtx)?;
    let coefficients: Vec<f64> = (0..k)
        .map(|a| (0..k).map(|b| inv[a][b] * xty[b]).sum())
        .collect();

    let residuals: Vec<f64> = rows
        .iter()
        .zip(y)
        .map(|(row, &yi)| yi - row.iter().zip(&coefficients).map(|(x, c)| x * c).sum::<f64>())
        .collect();

    let rss: f64 = residuals.iter().map(|e| e * e).sum();
    let y_mean = mean(y);
    let tss: f64 = y.iter().map(|v| (v - y_mean).powi(2)).sum();
    let r_squared = if tss > f64::EPSILON {
        (1.0 - rss / tss).clamp(0.0, 1.0)
    } else {
        0.0
    };

    let sigma2 = rss / (n - k) as f64;
    let std_errors = (0..k).map(|a| (sigma2 * inv[a][a]).max(0.0).sqrt()).collect();

    Some(OlsFit {
        coefficients,
        std_errors,
        r_squared,
        residuals,
    })
}

/// Gauss-Jordan inversion with partial pivoting.
///
/// A pivot smaller than 1e-12 of its column's original diagonal is treated as
/// collinear, so badly scaled but well-conditioned regressors still invert.
fn invert(mut m: Vec<Vec<f64>>) -> Option<Vec<Vec<f64>>> {
    let k = m.len();
    let scale: Vec<f64> = (0..k).map(|i| m[i][i].abs()).collect();
    let mut inv: Vec<Vec<f64>> = (0..k)
        .map(|i| (0..k).map(|j| if i == j { 1.0 } else { 0.0 }).collect())
        .collect();

    for col in 0..k {
        let pivot = (col..k).max_by(|&a, &b| m[a][col].abs().total_cmp(&m[b][col].abs()))?;
        let magnitude = m[pivot][col].abs();
        if !magnitude.is_finite() || magnitude == 0.0 || magnitude < 1e-12 * scale[col] {
            return None;
        }
        m.swap(col, pivot);
        inv.swap(col, pivot);

        let p = m[col][col];
        for j in 0..k {
            m[col][j] /= p;
            inv[col][j] /= p;
        }
        for row in 0..k {
            if row == col {
                continue;
            }
            let factor = m[row][col];
            if factor == 0.0 {
                continue;
            }
            for j in 0..k {
                m[row][j] -= factor * m[col][j];
                inv[row][j] -= factor * inv[col][j];
            }
        }
    }
    Some(inv)
}

/// Standard normal CDF.
pub fn normal_cdf(x: f64) -> f64 {
    match Normal::new(0.0, 1.0) {
        Ok(dist) => dist.cdf(x),
        Err(_) => 0.5,
    }
}

/// Two-sided p-value of a standard-normal test statistic.
pub fn normal_two_sided_p(z: f64) -> f64 {
    if !z.is_finite() {
        return if z.is_nan() { 1.0 } else { 0.0 };
    }
    (2.0 * (1.0 - normal_cdf(z.abs()))).clamp(0.0, 1.0)
}

/// Upper-tail probability of a chi-squared statistic with `dof` degrees of
/// freedom.
pub fn chi_squared_sf(stat: f64, dof: usize) -> f64 {
    if !stat.is_finite() || stat <= 0.0 || dof == 0 {
        return 1.0;
    }
    match ChiSquared::new(dof as f64) {
        Ok(dist) => (1.0 - dist.cdf(stat)).clamp(0.0, 1.0),
        Err(_) => 1.0,
    }
}

/// Wilson score interval for `successes` out of `trials` at critical value `z`.
pub fn wilson_interval(successes: usize, trials: usize, z: f64) -> Option<(f64, f64)> {
    if trials == 0 {
        return None;
    }
    let n = trials as f64;
    let p = successes as f64 / n;
    let z2 = z * z;
    let denom = 1.0 + z2 / n;
    let centre = (p + z2 / (2.0 * n)) / denom;
    let margin = z * (p * (1.0 - p) / n + z2 / (4.0 * n * n)).sqrt() / denom;
    Some(((centre - margin).max(0.0), (centre + margin).min(1.0)))
}

/// Percentile bootstrap (i.i.d. resampling) of `stat` over `data`.
///
/// Returns the 2.5 / 97.5 percentiles of the resampled statistic; resamples for
/// which `stat` returns `None` are discarded.
pub fn bootstrap_ci<T, F>(data: &[T], resamples: usize, seed: u64, stat: F) -> Option<(f64, f64)>
where
    T: Clone,
    F: Fn(&[T]) -> Option<f64>,
{
    if data.is_empty() || resamples == 0 {
        return None;
    }
    let mut rng = StdRng::seed_from_u64(seed);
    let mut draws = Vec::with_capacity(resamples);
    let mut sample = Vec::with_capacity(data.len());
    for _ in 0..resamples {
        sample.clear();
        for _ in 0..data.len() {
            sample.push(data[rng.gen_range(0..data.len())].clone());
        }
        if let Some(v) = stat(&sample) {
            if v.is_finite() {
                draws.push(v);
            }
        }
    }
    percentile_interval(&mut draws)
}

/// 2.5 / 97.5 percentiles of a set of bootstrap draws.
pub fn percentile_interval(draws: &mut [f64]) -> Option<(f64, f64)> {
    if draws.is_empty() {
        return None;
    }
    draws.sort_by(|a, b| a.total_cmp(b));
    Some((quantile_sorted(draws, 0.025), quantile_sorted(draws, 0.975)))
}

/// Median absolute deviation around the median.
pub fn mad(xs: &[f64]) -> Option<f64> {
    let m = median(xs)?;
    let deviations: Vec<f64> = xs.iter().map(|x| (x - m).abs()).collect();
    median(&deviations)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quantiles_interpolate() {
        let xs = [1.0, 2.0, 3.0, 4.0];
        assert!((quantile(&xs, 0.5).unwrap() - 2.5).abs() < 1e-12);
        assert!((quantile(&xs, 0.25).unwrap() - 1.75).abs() < 1e-12);
        assert!(quantile(&[], 0.5).is_none());
    }

    #[test]
    fn ols_recovers_exact_line() {
        let rows: Vec<Vec<f64>> = (0..20).map(|i| vec![1.0, i as f64]).collect();
        let y: Vec<f64> = (0..20).map(|i| 3.0 + 0.5 * i as f64).collect();
        let fit = ols(&rows, &y).unwrap();
        assert!((fit.coefficients[0] - 3.0).abs() < 1e-9);
        assert!((fit.coefficients[1] - 0.5).abs() < 1e-9);
        assert!((fit.r_squared - 1.0).abs() < 1e-9);
    }

    #[test]
    fn ols_rejects_collinear_design() {
        let rows: Vec<Vec<f64>> = (0..10).map(|i| vec![i as f64, 2.0 * i as f64]).collect();
        let y: Vec<f64> = (0..10).map(|i| i as f64).collect();
        assert!(ols(&rows, &y).is_none());
    }

    #[test]
    fn wilson_matches_hand_calculation() {
        let (lo, hi) = wilson_interval(9, 10, Z_95).unwrap();
        assert!((lo - 0.5958).abs() < 1e-3, "lo={}", lo);
        assert!((hi - 0.9821).abs() < 1e-3, "hi={}", hi);
        assert!(wilson_interval(0, 0, Z_95).is_none());
    }

    #[test]
    fn normal_p_values() {
        assert!((normal_two_sided_p(1.96) - 0.05).abs() < 1e-3);
        assert!((normal_two_sided_p(0.0) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn chi_squared_tail() {
        // 95th percentile of chi2(1) is 3.841.
        assert!((chi_squared_sf(3.841, 1) - 0.05).abs() < 1e-3);
        assert!((chi_squared_sf(0.0, 3) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn bootstrap_is_deterministic_for_a_seed() {
        let data: Vec<f64> = (0..50).map(|i| (i % 7) as f64).collect();
        let a = bootstrap_ci(&data, 200, 11, |s| Some(mean(s)));
        let b = bootstrap_ci(&data, 200, 11, |s| Some(mean(s)));
        assert_eq!(a, b);
        let (lo, hi) = a.unwrap();
        assert!(lo <= mean(&data) && mean(&data) <= hi);
    }
}
