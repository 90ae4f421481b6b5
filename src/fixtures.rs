// =============================================================================
// Deterministic series generators for unit tests
// =============================================================================

use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::features::FeatureBundle;
use crate::types::{AcfRegime, PriceBar, PriceSeries, Tier};

/// Seeded noise source; the same seed always yields the same path.
pub struct Noise(StdRng);

impl Noise {
    pub fn new(seed: u64) -> Self {
        Self(StdRng::seed_from_u64(seed))
    }

    /// Uniform in [-0.5, 0.5).
    pub fn uniform(&mut self) -> f64 {
        self.0.gen::<f64>() - 0.5
    }

    /// Approximately standard normal (Irwin-Hall with 12 draws).
    pub fn gaussian(&mut self) -> f64 {
        (0..12).map(|_| self.uniform()).sum()
    }
}

/// AR(1) returns `r_t = phi * r_{t-1} + scale * e_t`.
pub fn ar1_returns(len: usize, phi: f64, scale: f64, seed: u64) -> Vec<f64> {
    let mut rng = Noise::new(seed);
    let mut out = Vec::with_capacity(len);
    let mut prev = 0.0;
    for _ in 0..len {
        let r = phi * prev + scale * rng.gaussian();
        out.push(r);
        prev = r;
    }
    out
}

/// Price path from log returns, starting at `start`.
pub fn prices_from_returns(returns: &[f64], start: f64) -> Vec<f64> {
    let mut out = Vec::with_capacity(returns.len() + 1);
    let mut p = start;
    out.push(p);
    for r in returns {
        p *= r.exp();
        out.push(p);
    }
    out
}

/// Ornstein-Uhlenbeck style mean-reverting log price around `ln(level)`.
pub fn mean_reverting_prices(len: usize, level: f64, kappa: f64, scale: f64, seed: u64) -> Vec<f64> {
    let mut rng = Noise::new(seed);
    let anchor = level.ln();
    let mut x = anchor;
    let mut out = Vec::with_capacity(len);
    for _ in 0..len {
        x += kappa * (anchor - x) + scale * rng.gaussian();
        out.push(x.exp());
    }
    out
}

/// Wrap closes into a series with `step_secs` spacing.
pub fn series(symbol: &str, bar: &str, closes: &[f64], step_secs: i64) -> PriceSeries {
    let bars = closes
        .iter()
        .enumerate()
        .map(|(i, &close)| PriceBar {
            timestamp: DateTime::<Utc>::from_timestamp(1_700_000_000 + i as i64 * step_secs, 0)
                .unwrap_or_default(),
            close,
            high: None,
            low: None,
            volume: None,
        })
        .collect();
    PriceSeries::new(symbol, bar, bars)
}

/// A hand-built bundle with the given classifier inputs and neutral
/// everything else.
pub fn bundle(
    hurst: f64,
    vr: Option<f64>,
    vr_p: Option<f64>,
    adf_p: Option<f64>,
) -> FeatureBundle {
    FeatureBundle {
        symbol: "TEST".to_string(),
        tier: Tier::ShortTerm,
        bar: "15m".to_string(),
        as_of: DateTime::<Utc>::from_timestamp(1_700_000_000, 0).unwrap_or_default(),
        sample_count: 500,
        hurst_rs: hurst,
        hurst_rs_ci: None,
        hurst_dfa: hurst,
        hurst_dfa_ci: None,
        hurst_robust: None,
        rolling_hurst_mean: None,
        rolling_hurst_std: None,
        acf_lag1: 0.0,
        acf_regime: AcfRegime::Neutral,
        vr,
        vr_p_value: vr_p,
        vr_lag: 2,
        vr_profile: Vec::new(),
        adf_statistic: None,
        adf_p_value: adf_p,
        arch_lm_statistic: None,
        arch_lm_p_value: None,
        half_life: None,
        volatility: 0.01,
        skew: 0.0,
        kurtosis: 0.0,
        data_quality_score: 1.0,
        completeness: 1.0,
        outlier_fraction: 0.0,
        quality_flags: Vec::new(),
    }
}
