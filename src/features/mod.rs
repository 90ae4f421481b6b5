// =============================================================================
// Feature Computer — regime-diagnostic statistics from a price series
// =============================================================================
//
// Turns one validated close-price series into an immutable FeatureBundle:
//
// - Hurst exponent (R/S and DFA, block-bootstrap CIs, robust and rolling)
// - Variance ratio at several horizons with robust p-values
// - ADF stationarity test and mean-reversion half-life
// - ARCH-LM volatility-clustering test
// - Lag-1 autocorrelation and return moments
// - Data-quality score
//
// Validation failures abort with `InvalidInput`.  A statistic whose own sample
// requirement is unmet degrades to `None` (or the neutral 0.5 for Hurst)
// without failing the bundle.

pub mod arch;
pub mod hurst;
pub mod moments;
pub mod stationarity;
pub mod validation;
pub mod variance_ratio;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::FeatureParams;
use crate::error::Result;
use crate::types::{AcfRegime, PriceSeries, Tier};

pub use validation::{validate_series, CleanSeries, QualityReport};
pub use variance_ratio::VarianceRatio;

/// Regime diagnostics for one (symbol, tier, timestamp).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureBundle {
    pub symbol: String,
    pub tier: Tier,
    pub bar: String,
    /// Timestamp of the last bar in the analysed series.
    pub as_of: DateTime<Utc>,
    pub sample_count: usize,

    pub hurst_rs: f64,
    pub hurst_rs_ci: Option<(f64, f64)>,
    pub hurst_dfa: f64,
    pub hurst_dfa_ci: Option<(f64, f64)>,
    pub hurst_robust: Option<f64>,
    pub rolling_hurst_mean: Option<f64>,
    pub rolling_hurst_std: Option<f64>,

    pub acf_lag1: f64,
    pub acf_regime: AcfRegime,

    /// Primary-horizon variance ratio.
    pub vr: Option<f64>,
    pub vr_p_value: Option<f64>,
    pub vr_lag: usize,
    /// Every horizon that could be computed.
    pub vr_profile: Vec<VarianceRatio>,

    pub adf_statistic: Option<f64>,
    pub adf_p_value: Option<f64>,
    pub arch_lm_statistic: Option<f64>,
    pub arch_lm_p_value: Option<f64>,
    pub half_life: Option<f64>,

    pub volatility: f64,
    pub skew: f64,
    pub kurtosis: f64,

    pub data_quality_score: f64,
    pub completeness: f64,
    pub outlier_fraction: f64,
    pub quality_flags: Vec<String>,
}

impl FeatureBundle {
    /// Mean of the R/S and DFA estimates.
    pub fn hurst_average(&self) -> f64 {
        (self.hurst_rs + self.hurst_dfa) / 2.0
    }
}

/// Stateless computer parameterised by [`FeatureParams`].
#[derive(Debug, Clone, Default)]
pub struct FeatureComputer {
    params: FeatureParams,
}

impl FeatureComputer {
    pub fn new(params: FeatureParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &FeatureParams {
        &self.params
    }

    /// Validate `series` and compute its bundle.
    pub fn compute(&self, series: &PriceSeries, tier: Tier) -> Result<FeatureBundle> {
        let p = &self.params;
        let clean = validate_series(series, p)?;
        let quality = validation::assess_quality(&clean, p);
        let returns = &clean.log_returns;
        let log_prices: Vec<f64> = clean.closes.iter().map(|c| c.ln()).collect();

        let rs = hurst::with_block_bootstrap(
            returns,
            p.hurst_min_window,
            p.bootstrap_samples,
            p.bootstrap_seed,
            hurst::hurst_rs,
        );
        let dfa = hurst::with_block_bootstrap(
            returns,
            p.hurst_min_window,
            p.bootstrap_samples,
            p.bootstrap_seed.wrapping_add(1),
            hurst::hurst_dfa,
        );
        let hurst_robust = hurst::robust_hurst(returns, p.hurst_min_window, p.outlier_mad_multiple);
        let rolling = hurst::rolling_hurst(returns, p.rolling_hurst_window, p.rolling_hurst_step);

        let acf_lag1 = moments::lag1_autocorrelation(returns);
        let acf_regime = moments::acf_regime(acf_lag1, p.acf_threshold);

        let mut vr_profile = Vec::with_capacity(p.vr_lags.len());
        for &lag in &p.vr_lags {
            match variance_ratio::variance_ratio(returns, lag) {
                Ok(vr) => vr_profile.push(vr),
                Err(e) => debug!(symbol = %series.symbol, lag, error = %e, "variance ratio skipped"),
            }
        }
        let primary = vr_profile
            .iter()
            .find(|v| v.lag == p.primary_vr_lag)
            .or_else(|| vr_profile.first())
            .copied();

        let adf = stationarity::adf_test(&log_prices, p.adf_max_lags)
            .map_err(|e| debug!(symbol = %series.symbol, error = %e, "ADF skipped"))
            .ok();
        let arch = arch::arch_lm(returns, p.arch_lags)
            .map_err(|e| debug!(symbol = %series.symbol, error = %e, "ARCH-LM skipped"))
            .ok();
        let half_life = stationarity::half_life(&log_prices);
        let m = moments::return_moments(returns);

        let bundle = FeatureBundle {
            symbol: series.symbol.clone(),
            tier,
            bar: series.bar.clone(),
            as_of: clean.as_of,
            sample_count: clean.closes.len(),
            hurst_rs: rs.value,
            hurst_rs_ci: rs.ci,
            hurst_dfa: dfa.value,
            hurst_dfa_ci: dfa.ci,
            hurst_robust,
            rolling_hurst_mean: rolling.map(|(mean, _)| mean),
            rolling_hurst_std: rolling.map(|(_, std)| std),
            acf_lag1,
            acf_regime,
            vr: primary.map(|v| v.ratio),
            vr_p_value: primary.map(|v| v.p_value),
            vr_lag: primary.map(|v| v.lag).unwrap_or(p.primary_vr_lag),
            vr_profile,
            adf_statistic: adf.map(|a| a.statistic),
            adf_p_value: adf.map(|a| a.p_value),
            arch_lm_statistic: arch.map(|a| a.statistic),
            arch_lm_p_value: arch.map(|a| a.p_value),
            half_life,
            volatility: m.volatility,
            skew: m.skew,
            kurtosis: m.kurtosis,
            data_quality_score: quality.score,
            completeness: quality.completeness,
            outlier_fraction: quality.outlier_fraction,
            quality_flags: quality.flags,
        };

        debug!(
            symbol = %bundle.symbol,
            tier = %tier,
            bar = %bundle.bar,
            n = bundle.sample_count,
            hurst_rs = format!("{:.4}", bundle.hurst_rs),
            hurst_dfa = format!("{:.4}", bundle.hurst_dfa),
            vr = ?bundle.vr.map(|v| format!("{:.4}", v)),
            adf_p = ?bundle.adf_p_value.map(|v| format!("{:.4}", v)),
            quality = format!("{:.2}", bundle.data_quality_score),
            "feature bundle computed"
        );

        Ok(bundle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RegimeError;
    use crate::fixtures::{ar1_returns, mean_reverting_prices, prices_from_returns, series};

    fn computer() -> FeatureComputer {
        FeatureComputer::new(FeatureParams {
            bootstrap_samples: 30,
            ..FeatureParams::default()
        })
    }

    #[test]
    fn bundle_fields_are_in_range() {
        let closes = prices_from_returns(&ar1_returns(400, 0.2, 0.01, 5), 100.0);
        let b = computer().compute(&series("SPY", "1d", &closes, 86_400), Tier::LongTerm).unwrap();
        assert_eq!(b.sample_count, 401);
        assert!((0.0..=1.0).contains(&b.hurst_rs));
        assert!((0.0..=1.0).contains(&b.hurst_dfa));
        for p in [b.vr_p_value, b.adf_p_value, b.arch_lm_p_value].into_iter().flatten() {
            assert!((0.0..=1.0).contains(&p));
        }
        assert!((0.0..=1.0).contains(&b.data_quality_score));
        assert!((0.0..=1.0).contains(&b.completeness));
        assert_eq!(b.vr_lag, 2);
        assert_eq!(b.vr_profile.len(), 4);
        assert!(b.hurst_rs_ci.is_some() && b.hurst_dfa_ci.is_some());
        assert!(b.rolling_hurst_mean.is_some());
    }

    #[test]
    fn short_series_degrades_to_neutral() {
        let closes = prices_from_returns(&ar1_returns(24, 0.0, 0.01, 6), 50.0);
        let b = computer().compute(&series("SPY", "1d", &closes, 86_400), Tier::LongTerm).unwrap();
        assert_eq!(b.hurst_rs, 0.5);
        assert_eq!(b.hurst_dfa, 0.5);
        assert!(b.hurst_rs_ci.is_none());
        assert!(b.arch_lm_p_value.is_none());
        assert!(b.rolling_hurst_mean.is_none());
        assert!(b.quality_flags.contains(&"low_sample".to_string()));
    }

    #[test]
    fn mean_reverting_series_reads_as_such() {
        let closes = mean_reverting_prices(600, 100.0, 0.3, 0.01, 9);
        let b = computer().compute(&series("GLD", "1h", &closes, 3_600), Tier::MediumTerm).unwrap();
        assert!(b.hurst_average() < 0.5);
        assert!(b.vr.unwrap() < 1.0);
        assert!(b.adf_p_value.unwrap() < 0.05);
        assert!(b.half_life.is_some());
        assert_eq!(b.acf_regime, AcfRegime::MeanReverting);
    }

    #[test]
    fn invalid_series_produces_no_bundle() {
        let closes = vec![100.0; 10];
        let err = computer()
            .compute(&series("SPY", "1d", &closes, 86_400), Tier::LongTerm)
            .unwrap_err();
        assert!(matches!(err, RegimeError::InvalidInput { .. }));
    }

    #[test]
    fn bundle_is_reproducible() {
        let closes = prices_from_returns(&ar1_returns(300, 0.1, 0.01, 15), 100.0);
        let s = series("SPY", "1d", &closes, 86_400);
        let a = computer().compute(&s, Tier::LongTerm).unwrap();
        let b = computer().compute(&s, Tier::LongTerm).unwrap();
        assert_eq!(a.hurst_dfa_ci, b.hurst_dfa_ci);
        assert_eq!(a.vr, b.vr);
    }
}
