// =============================================================================
// ARCH-LM — Engle's Lagrange-multiplier test for volatility clustering
// =============================================================================
//
// Auxiliary regression of squared demeaned returns on q of their own lags:
//
//   e_t^2 = a0 + a1 * e_{t-1}^2 + ... + aq * e_{t-q}^2 + u_t
//
// LM = (n - q) * R^2 ~ chi^2(q) under the null of no ARCH effects.  This
// signal is orthogonal to the trend / mean-reversion axis; it only
// corroborates "volatile" readings.

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::error::{RegimeError, Result};
use crate::stats;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ArchLm {
    pub statistic: f64,
    pub p_value: f64,
    pub lags: usize,
}

pub fn arch_lm(returns: &[f64], lags: usize) -> Result<ArchLm> {
    let required = 5 * (lags + 1);
    if lags == 0 || returns.len() < required {
        return Err(RegimeError::insufficient("arch_lm", required, returns.len()));
    }

    let mu = stats::mean(returns);
    let sq: Vec<f64> = returns.iter().map(|r| (r - mu).powi(2)).collect();

    let rows: Vec<Vec<f64>> = (lags..sq.len())
        .map(|t| {
            let mut row = Vec::with_capacity(lags + 1);
            row.push(1.0);
            row.extend((1..=lags).map(|i| sq[t - i]));
            row
        })
        .collect();
    let y = &sq[lags..];

    let fit = stats::ols(&rows, y)
        .ok_or_else(|| RegimeError::insufficient("arch_lm", required + 1, returns.len()))?;
    let statistic = y.len() as f64 * fit.r_squared;
    let p_value = stats::chi_squared_sf(statistic, lags);

    trace!(
        statistic = format!("{:.3}", statistic),
        p = format!("{:.4}", p_value),
        lags,
        "ARCH-LM computed"
    );

    Ok(ArchLm {
        statistic,
        p_value,
        lags,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::Noise;

    /// GARCH(1,1)-style returns with strong clustering.
    fn clustered_returns(len: usize, seed: u64) -> Vec<f64> {
        let mut rng = Noise::new(seed);
        let mut var = 1e-4;
        let mut prev = 0.0_f64;
        (0..len)
            .map(|_| {
                var = 1e-6 + 0.6 * prev * prev + 0.35 * var;
                prev = var.sqrt() * rng.gaussian();
                prev
            })
            .collect()
    }

    #[test]
    fn detects_volatility_clustering() {
        let r = clustered_returns(2000, 77);
        let lm = arch_lm(&r, 5).unwrap();
        assert!(lm.p_value < 0.01, "p={:.4}", lm.p_value);
    }

    #[test]
    fn homoskedastic_noise_is_not_flagged_strongly() {
        let mut rng = Noise::new(78);
        let r: Vec<f64> = (0..2000).map(|_| 0.01 * rng.gaussian()).collect();
        let lm = arch_lm(&r, 5).unwrap();
        assert!(lm.p_value > 0.001, "p={:.4}", lm.p_value);
        assert!((0.0..=1.0).contains(&lm.p_value));
    }

    #[test]
    fn short_input_is_insufficient() {
        let r = vec![0.01, -0.01, 0.02];
        assert!(matches!(
            arch_lm(&r, 5),
            Err(RegimeError::InsufficientHistory { .. })
        ));
    }
}
