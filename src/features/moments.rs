// =============================================================================
// Return moments and lag-1 autocorrelation
// =============================================================================

use serde::{Deserialize, Serialize};

use crate::stats;
use crate::types::AcfRegime;

/// Volatility, skew and excess kurtosis of a return series.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReturnMoments {
    pub volatility: f64,
    pub skew: f64,
    pub kurtosis: f64,
}

pub fn return_moments(returns: &[f64]) -> ReturnMoments {
    let n = returns.len();
    let volatility = stats::std_dev(returns);
    if n < 3 || volatility < f64::EPSILON {
        return ReturnMoments {
            volatility,
            skew: 0.0,
            kurtosis: 0.0,
        };
    }

    let m = stats::mean(returns);
    let nf = n as f64;
    let m2 = returns.iter().map(|r| (r - m).powi(2)).sum::<f64>() / nf;
    let m3 = returns.iter().map(|r| (r - m).powi(3)).sum::<f64>() / nf;
    let m4 = returns.iter().map(|r| (r - m).powi(4)).sum::<f64>() / nf;

    ReturnMoments {
        volatility,
        skew: m3 / m2.powf(1.5),
        kurtosis: m4 / (m2 * m2) - 3.0,
    }
}

/// Lag-1 sample autocorrelation; zero for degenerate input.
pub fn lag1_autocorrelation(returns: &[f64]) -> f64 {
    if returns.len() < 3 {
        return 0.0;
    }
    let m = stats::mean(returns);
    let denom: f64 = returns.iter().map(|r| (r - m).powi(2)).sum();
    if denom < f64::EPSILON * f64::EPSILON {
        return 0.0;
    }
    let num: f64 = returns
        .windows(2)
        .map(|w| (w[0] - m) * (w[1] - m))
        .sum();
    (num / denom).clamp(-1.0, 1.0)
}

pub fn acf_regime(acf1: f64, threshold: f64) -> AcfRegime {
    if acf1 > threshold {
        AcfRegime::Trending
    } else if acf1 < -threshold {
        AcfRegime::MeanReverting
    } else {
        AcfRegime::Neutral
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::ar1_returns;

    #[test]
    fn symmetric_returns_have_zero_skew() {
        let r = [-0.02, -0.01, 0.0, 0.01, 0.02];
        let m = return_moments(&r);
        assert!(m.skew.abs() < 1e-12);
        assert!(m.volatility > 0.0);
    }

    #[test]
    fn constant_returns_are_degenerate() {
        let m = return_moments(&[0.01; 20]);
        assert!(m.volatility < 1e-12);
        assert_eq!(m.skew, 0.0);
        assert_eq!(m.kurtosis, 0.0);
    }

    #[test]
    fn autocorrelation_sign_follows_process() {
        let pos = lag1_autocorrelation(&ar1_returns(2000, 0.6, 0.01, 1));
        let neg = lag1_autocorrelation(&ar1_returns(2000, -0.6, 0.01, 2));
        assert!(pos > 0.5, "acf {:.3}", pos);
        assert!(neg < -0.5, "acf {:.3}", neg);
        assert_eq!(acf_regime(pos, 0.05), AcfRegime::Trending);
        assert_eq!(acf_regime(neg, 0.05), AcfRegime::MeanReverting);
        assert_eq!(acf_regime(0.01, 0.05), AcfRegime::Neutral);
    }
}
