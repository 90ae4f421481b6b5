// =============================================================================
// Engine Configuration — JSON settings with atomic save
// =============================================================================
//
// Every tunable constant of the regime engine lives here.  The classifier
// breakpoints and hysteresis defaults are empirically chosen and exposed so
// they can be recalibrated without a rebuild.
//
// Persistence uses an atomic tmp + rename pattern.  All fields carry serde
// defaults so that adding new fields never breaks loading an older file.
//
// =============================================================================

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::RegimeError;
use crate::types::Tier;

// =============================================================================
// Default-value helpers
// =============================================================================

fn default_symbols() -> Vec<String> {
    vec!["SPY".to_string(), "QQQ".to_string()]
}

fn default_tiers() -> Vec<TierSettings> {
    vec![
        TierSettings {
            tier: Tier::LongTerm,
            bar: "1d".to_string(),
            lookback: 500,
        },
        TierSettings {
            tier: Tier::MediumTerm,
            bar: "4h".to_string(),
            lookback: 500,
        },
        TierSettings {
            tier: Tier::ShortTerm,
            bar: "15m".to_string(),
            lookback: 500,
        },
    ]
}

fn default_alternate_bars() -> BTreeMap<String, String> {
    [("15m", "1h"), ("1h", "15m"), ("4h", "1d"), ("1d", "4h")]
        .into_iter()
        .map(|(a, b)| (a.to_string(), b.to_string()))
        .collect()
}

// =============================================================================
// FeatureParams
// =============================================================================

/// Parameters of the feature computer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureParams {
    /// Series shorter than this are rejected outright.
    pub min_points: usize,
    /// Below this many points the bundle is flagged `low_sample`.
    pub full_quality_points: usize,
    /// Hurst estimators return exactly 0.5 below this many returns.
    pub hurst_min_window: usize,
    /// Variance-ratio horizons.
    pub vr_lags: Vec<usize>,
    /// Horizon reported as the bundle's primary VR.
    pub primary_vr_lag: usize,
    /// Upper bound on ADF augmentation lags.
    pub adf_max_lags: usize,
    /// Lags of the ARCH-LM auxiliary regression.
    pub arch_lags: usize,
    /// Block-bootstrap resamples for the Hurst CIs (0 disables).
    pub bootstrap_samples: usize,
    pub bootstrap_seed: u64,
    pub rolling_hurst_window: usize,
    pub rolling_hurst_step: usize,
    /// |acf1| above this is read as trending / mean-reverting.
    pub acf_threshold: f64,
    /// Returns further than this many MADs from the median count as outliers.
    pub outlier_mad_multiple: f64,
}

impl Default for FeatureParams {
    fn default() -> Self {
        Self {
            min_points: 20,
            full_quality_points: 100,
            hurst_min_window: 32,
            vr_lags: vec![2, 4, 8, 16],
            primary_vr_lag: 2,
            adf_max_lags: 8,
            arch_lags: 5,
            bootstrap_samples: 100,
            bootstrap_seed: 42,
            rolling_hurst_window: 64,
            rolling_hurst_step: 16,
            acf_threshold: 0.05,
            outlier_mad_multiple: 5.0,
        }
    }
}

// =============================================================================
// ClassifierParams
// =============================================================================

/// Weights and breakpoints of the unified classifier.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierParams {
    pub hurst_weight: f64,
    pub vr_weight: f64,
    pub adf_weight: f64,
    /// |score| at or above this yields a directional label.
    pub score_threshold: f64,
    /// Confidence at |score| == score_threshold.
    pub confidence_floor: f64,
    /// Confidence at |score| == 1.
    pub confidence_ceiling: f64,
    /// Confidence of a `random` read at score 0.
    pub random_base: f64,
    /// Confidence lost per unit |score| inside the random band.
    pub random_slope: f64,
    pub adf_significance: f64,
    /// Entropy normaliser in the persistence factor.
    pub entropy_norm: f64,
    /// Lower clamp of the persistence factor.
    pub min_persistence: f64,
    /// ARCH-LM p-value below which a trending read becomes volatile_trending.
    pub volatile_arch_pvalue: f64,
    pub llm_verdict_cap: f64,
    pub context_nudge_cap: f64,
    /// Execution gate: minimum effective confidence.
    pub min_execution_confidence: f64,
    /// Execution gate: per-bar return volatility above this blocks.
    pub max_bar_volatility: f64,
}

impl Default for ClassifierParams {
    fn default() -> Self {
        Self {
            hurst_weight: 0.4,
            vr_weight: 0.4,
            adf_weight: 0.2,
            score_threshold: 0.10,
            confidence_floor: 0.60,
            confidence_ceiling: 0.80,
            random_base: 0.50,
            random_slope: 2.0,
            adf_significance: 0.05,
            entropy_norm: 1.10,
            min_persistence: 0.10,
            volatile_arch_pvalue: 0.01,
            llm_verdict_cap: 0.15,
            context_nudge_cap: 0.05,
            min_execution_confidence: 0.30,
            max_bar_volatility: 0.05,
        }
    }
}

// =============================================================================
// HysteresisParams
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HysteresisParams {
    /// Consecutive agreeing runs needed to switch the confirmed label.
    pub confirmation_bars: u32,
    /// Confidence cap while a new label is pending.
    pub transition_confidence_cap: f64,
    /// Report `uncertain` instead of the prior label while pending.
    pub use_transition_state: bool,
    pub memory_path: String,
}

impl Default for HysteresisParams {
    fn default() -> Self {
        Self {
            confirmation_bars: 3,
            transition_confidence_cap: 0.4,
            use_transition_state: false,
            memory_path: "regime_memory.json".to_string(),
        }
    }
}

// =============================================================================
// TransitionParams
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransitionParams {
    /// Maximum number of labels (and runs) retained.
    pub window_bars: usize,
    pub flip_density_alert: f64,
    pub min_median_duration: f64,
    pub min_runs_for_duration_ci: usize,
    pub min_labels_for_entropy_ci: usize,
    pub bootstrap_samples: usize,
    pub bootstrap_seed: u64,
    pub max_hazard_age: usize,
    /// Bars on either side of a flip counted as "around" it.
    pub flip_vol_radius: usize,
}

impl Default for TransitionParams {
    fn default() -> Self {
        Self {
            window_bars: 200,
            flip_density_alert: 0.15,
            min_median_duration: 2.0,
            min_runs_for_duration_ci: 10,
            min_labels_for_entropy_ci: 30,
            bootstrap_samples: 500,
            bootstrap_seed: 7,
            max_hazard_age: 20,
            flip_vol_radius: 2,
        }
    }
}

// =============================================================================
// ContradictorParams
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContradictorParams {
    /// Tiers the contradictor runs on.
    pub tiers: Vec<Tier>,
    /// Primary bar -> alternate bar.
    pub alternate_bars: BTreeMap<String, String>,
    pub significance: f64,
    /// Half-width of the borderline band around `significance`.
    pub borderline_threshold: f64,
    /// p-values at or below this are never borderline.
    pub borderline_floor: f64,
    pub penalty_per_contradiction: f64,
    pub max_penalty: f64,
}

impl Default for ContradictorParams {
    fn default() -> Self {
        Self {
            tiers: vec![Tier::ShortTerm],
            alternate_bars: default_alternate_bars(),
            significance: 0.05,
            borderline_threshold: 0.02,
            borderline_floor: 0.01,
            penalty_per_contradiction: 0.10,
            max_penalty: 0.30,
        }
    }
}

// =============================================================================
// TierSettings
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TierSettings {
    pub tier: Tier,
    /// Bar size requested from the price source (e.g. "15m").
    pub bar: String,
    /// Number of most recent bars analysed.
    pub lookback: usize,
}

// =============================================================================
// EngineConfig
// =============================================================================

/// Top-level configuration of the regime engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_symbols")]
    pub symbols: Vec<String>,

    #[serde(default = "default_tiers")]
    pub tiers: Vec<TierSettings>,

    /// UTC hours during which the execution gate reports a blackout.
    #[serde(default)]
    pub blackout_utc_hours: Vec<u32>,

    #[serde(default)]
    pub features: FeatureParams,

    #[serde(default)]
    pub classifier: ClassifierParams,

    #[serde(default)]
    pub hysteresis: HysteresisParams,

    #[serde(default)]
    pub transitions: TransitionParams,

    #[serde(default)]
    pub contradictor: ContradictorParams,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            symbols: default_symbols(),
            tiers: default_tiers(),
            blackout_utc_hours: Vec::new(),
            features: FeatureParams::default(),
            classifier: ClassifierParams::default(),
            hysteresis: HysteresisParams::default(),
            transitions: TransitionParams::default(),
            contradictor: ContradictorParams::default(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from a JSON file at `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read engine config from {}", path.display()))?;

        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse engine config from {}", path.display()))?;

        config
            .validate()
            .with_context(|| format!("invalid engine config in {}", path.display()))?;

        info!(
            path = %path.display(),
            symbols = ?config.symbols,
            tiers = config.tiers.len(),
            "engine config loaded"
        );

        Ok(config)
    }

    /// Persist the configuration to `path` using an atomic write.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        let content = serde_json::to_string_pretty(self)
            .context("failed to serialise engine config to JSON")?;

        let tmp_path = path.with_extension("json.tmp");

        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp config to {}", tmp_path.display()))?;

        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename tmp config to {}", path.display()))?;

        info!(path = %path.display(), "engine config saved (atomic)");
        Ok(())
    }

    /// Settings for `tier`, if configured.
    pub fn tier(&self, tier: Tier) -> Option<&TierSettings> {
        self.tiers.iter().find(|t| t.tier == tier)
    }

    /// Reject parameter combinations the engine cannot honour.
    pub fn validate(&self) -> std::result::Result<(), RegimeError> {
        self.classifier.validate()?;

        if self.hysteresis.confirmation_bars == 0 {
            return Err(RegimeError::Configuration(
                "hysteresis.confirmation_bars must be >= 1".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.hysteresis.transition_confidence_cap) {
            return Err(RegimeError::Configuration(format!(
                "hysteresis.transition_confidence_cap {} outside [0, 1]",
                self.hysteresis.transition_confidence_cap
            )));
        }
        if self.features.vr_lags.is_empty() || self.features.vr_lags.iter().any(|&k| k < 2) {
            return Err(RegimeError::Configuration(
                "features.vr_lags must be non-empty with every lag >= 2".to_string(),
            ));
        }
        if self.transitions.window_bars < 2 {
            return Err(RegimeError::Configuration(
                "transitions.window_bars must be >= 2".to_string(),
            ));
        }
        if let Some(h) = self.blackout_utc_hours.iter().find(|&&h| h > 23) {
            return Err(RegimeError::Configuration(format!(
                "blackout hour {} outside 0..=23",
                h
            )));
        }
        Ok(())
    }
}

impl ClassifierParams {
    /// Weights rescaled to sum to one: (hurst, vr, adf).
    ///
    /// Errors on negative / non-finite weights or a zero sum.
    pub fn normalized_weights(&self) -> std::result::Result<(f64, f64, f64), RegimeError> {
        let w = [self.hurst_weight, self.vr_weight, self.adf_weight];
        if w.iter().any(|x| !x.is_finite() || *x < 0.0) {
            return Err(RegimeError::Configuration(format!(
                "classifier weights must be finite and non-negative, got {:?}",
                w
            )));
        }
        let total: f64 = w.iter().sum();
        if total <= f64::EPSILON {
            return Err(RegimeError::Configuration(
                "classifier weights sum to zero".to_string(),
            ));
        }
        Ok((w[0] / total, w[1] / total, w[2] / total))
    }

    pub fn validate(&self) -> std::result::Result<(), RegimeError> {
        self.normalized_weights()?;
        if !(0.0..1.0).contains(&self.score_threshold) {
            return Err(RegimeError::Configuration(format!(
                "classifier.score_threshold {} outside [0, 1)",
                self.score_threshold
            )));
        }
        if !(0.0..=1.0).contains(&self.confidence_floor)
            || !(0.0..=1.0).contains(&self.confidence_ceiling)
            || self.confidence_floor > self.confidence_ceiling
        {
            return Err(RegimeError::Configuration(format!(
                "classifier confidence band [{}, {}] invalid",
                self.confidence_floor, self.confidence_ceiling
            )));
        }
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_expected_values() {
        let cfg = EngineConfig::default();
        assert!((cfg.classifier.hurst_weight - 0.4).abs() < f64::EPSILON);
        assert!((cfg.classifier.adf_weight - 0.2).abs() < f64::EPSILON);
        assert_eq!(cfg.hysteresis.confirmation_bars, 3);
        assert!((cfg.hysteresis.transition_confidence_cap - 0.4).abs() < f64::EPSILON);
        assert_eq!(cfg.transitions.window_bars, 200);
        assert_eq!(cfg.contradictor.alternate_bars.get("15m").unwrap(), "1h");
        assert_eq!(cfg.tiers.len(), 3);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn deserialise_empty_json_uses_defaults() {
        let cfg: EngineConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.features.min_points, 20);
        assert_eq!(cfg.contradictor.tiers, vec![Tier::ShortTerm]);
        assert!(!cfg.hysteresis.use_transition_state);
    }

    #[test]
    fn deserialise_partial_section_fills_defaults() {
        let json = r#"{ "hysteresis": { "confirmation_bars": 5 }, "symbols": ["AAPL"] }"#;
        let cfg: EngineConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.hysteresis.confirmation_bars, 5);
        assert!((cfg.hysteresis.transition_confidence_cap - 0.4).abs() < f64::EPSILON);
        assert_eq!(cfg.symbols, vec!["AAPL"]);
    }

    #[test]
    fn weights_are_renormalised() {
        let params = ClassifierParams {
            hurst_weight: 2.0,
            vr_weight: 2.0,
            adf_weight: 1.0,
            ..ClassifierParams::default()
        };
        let (h, v, a) = params.normalized_weights().unwrap();
        assert!((h - 0.4).abs() < 1e-12);
        assert!((v - 0.4).abs() < 1e-12);
        assert!((a - 0.2).abs() < 1e-12);
    }

    #[test]
    fn malformed_weights_are_configuration_errors() {
        let params = ClassifierParams {
            hurst_weight: 0.0,
            vr_weight: 0.0,
            adf_weight: 0.0,
            ..ClassifierParams::default()
        };
        assert!(matches!(
            params.normalized_weights(),
            Err(RegimeError::Configuration(_))
        ));

        let mut cfg = EngineConfig::default();
        cfg.classifier.vr_weight = -1.0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn zero_confirmation_bars_rejected() {
        let mut cfg = EngineConfig::default();
        cfg.hysteresis.confirmation_bars = 0;
        assert!(matches!(cfg.validate(), Err(RegimeError::Configuration(_))));
    }

    #[test]
    fn save_then_load_roundtrips() {
        let path = std::env::temp_dir().join(format!("regime-config-{}.json", uuid::Uuid::new_v4()));
        let mut cfg = EngineConfig::default();
        cfg.symbols = vec!["ETHUSD".to_string()];
        cfg.save(&path).unwrap();
        let loaded = EngineConfig::load(&path).unwrap();
        assert_eq!(loaded.symbols, cfg.symbols);
        assert_eq!(loaded.hysteresis.confirmation_bars, cfg.hysteresis.confirmation_bars);
        let _ = std::fs::remove_file(&path);
    }
}
