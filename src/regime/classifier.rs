// =============================================================================
// Unified Regime Classifier
// =============================================================================
//
// Fuses three statistics into one score in [-1, +1] (positive = trending):
//
//   hurst component = (H - 0.5) / 0.5
//   vr component    = 1 - VR
//   adf component   = sign(p - 0.05) * (1 - p)   (0 when p is missing)
//
//   score = w_h * hurst + w_vr * vr + w_adf * adf      (weights sum to 1)
//
// Score -> label / raw confidence:
//
//   score >= +0.10  =>  trending,        confidence 0.60 .. 0.80
//   score <= -0.10  =>  mean_reverting,  confidence 0.60 .. 0.80
//   otherwise       =>  random,          confidence 0.50 - 2 * |score|
//
// Statistics alone never push confidence above ~0.80.  A trending read with a
// significant ARCH-LM test is promoted to volatile_trending.
//
// Persistence damping from transition history:
//
//   factor = (1 - flip_density) * (1 - min(entropy / 1.10, 1)),  in [0.1, 1]
//   effective_confidence = raw_confidence * factor

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::config::ClassifierParams;
use crate::error::Result;
use crate::features::FeatureBundle;
use crate::regime::transitions::TransitionStats;
use crate::types::RegimeLabel;

// =============================================================================
// Types
// =============================================================================

/// Weighted contribution of each signal to the unified score.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ComponentContributions {
    pub hurst: f64,
    pub vr: f64,
    pub adf: f64,
}

/// Output of one classification call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegimeScore {
    /// Unified score in [-1, 1].
    pub score: f64,
    pub label: RegimeLabel,
    pub raw_confidence: f64,
    /// `raw_confidence` damped by regime persistence.
    pub effective_confidence: f64,
    pub persistence_factor: f64,
    pub contributions: ComponentContributions,
    pub rationale: String,
}

/// Stability inputs to the persistence factor.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TransitionMetrics {
    pub flip_density: Option<f64>,
    pub entropy: Option<f64>,
}

impl From<&TransitionStats> for TransitionMetrics {
    fn from(stats: &TransitionStats) -> Self {
        Self {
            flip_density: stats.flip_density,
            entropy: stats.entropy,
        }
    }
}

/// Context for the execution gates that lives outside the score.
#[derive(Debug, Clone, Default)]
pub struct GateContext {
    /// Per-bar return volatility of the analysed series.
    pub volatility: f64,
    pub in_blackout: bool,
    /// Reported label of the next-higher timeframe, if known.
    pub higher_tf_label: Option<RegimeLabel>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Posture {
    Momentum,
    MeanReversion,
    StandAside,
}

/// What would be done if the gates were open.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HypotheticalPlan {
    pub label: RegimeLabel,
    pub posture: Posture,
    pub size_multiplier: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionGates {
    pub execution_ready: bool,
    pub blockers: Vec<String>,
    pub hypothetical_plan: HypotheticalPlan,
}

// =============================================================================
// UnifiedRegimeClassifier
// =============================================================================

#[derive(Debug, Clone)]
pub struct UnifiedRegimeClassifier {
    params: ClassifierParams,
    /// Normalised (hurst, vr, adf) weights.
    weights: (f64, f64, f64),
}

impl UnifiedRegimeClassifier {
    /// Errors with `Configuration` when the weights are malformed.
    pub fn new(params: ClassifierParams) -> Result<Self> {
        params.validate()?;
        let weights = params.normalized_weights()?;
        Ok(Self { params, weights })
    }

    pub fn params(&self) -> &ClassifierParams {
        &self.params
    }

    /// Classify one bundle, optionally damped by transition history.
    pub fn classify(
        &self,
        features: &FeatureBundle,
        transitions: Option<TransitionMetrics>,
    ) -> RegimeScore {
        let p = &self.params;
        let (w_h, w_vr, w_adf) = self.weights;

        let hurst_c = hurst_component(features.hurst_average());
        let vr_c = features.vr.map(vr_component).unwrap_or(0.0);
        let adf_c = adf_component(features.adf_p_value, p.adf_significance);

        let contributions = ComponentContributions {
            hurst: w_h * hurst_c,
            vr: w_vr * vr_c,
            adf: w_adf * adf_c,
        };
        let score = (contributions.hurst + contributions.vr + contributions.adf).clamp(-1.0, 1.0);

        let (mut label, raw_confidence) = self.label_for(score);
        if label == RegimeLabel::Trending
            && features
                .arch_lm_p_value
                .is_some_and(|ap| ap < p.volatile_arch_pvalue)
        {
            label = RegimeLabel::VolatileTrending;
        }

        let persistence_factor = transitions
            .map(|t| self.persistence_factor(t))
            .unwrap_or(1.0);
        let effective_confidence = (raw_confidence * persistence_factor).clamp(0.0, 1.0);

        let rationale = format!(
            "score={:+.3} (hurst {:+.3}, vr {:+.3}, adf {:+.3}) -> {} raw={:.3} x persistence {:.3} = {:.3}",
            score,
            contributions.hurst,
            contributions.vr,
            contributions.adf,
            label,
            raw_confidence,
            persistence_factor,
            effective_confidence
        );

        debug!(
            symbol = %features.symbol,
            tier = %features.tier,
            label = %label,
            score = format!("{:.3}", score),
            raw = format!("{:.3}", raw_confidence),
            effective = format!("{:.3}", effective_confidence),
            "regime classified"
        );

        RegimeScore {
            score,
            label,
            raw_confidence,
            effective_confidence,
            persistence_factor,
            contributions,
            rationale,
        }
    }

    /// Map a unified score onto (label, raw confidence).
    fn label_for(&self, score: f64) -> (RegimeLabel, f64) {
        let p = &self.params;
        if score >= p.score_threshold {
            let c = remap(score, p.score_threshold, 1.0, p.confidence_floor, p.confidence_ceiling);
            (RegimeLabel::Trending, c)
        } else if score <= -p.score_threshold {
            let c = remap(-score, p.score_threshold, 1.0, p.confidence_floor, p.confidence_ceiling);
            (RegimeLabel::MeanReverting, c)
        } else {
            let c = (p.random_base - p.random_slope * score.abs()).clamp(0.0, 1.0);
            (RegimeLabel::Random, c)
        }
    }

    /// `(1 - flip_density) * (1 - min(entropy / norm, 1))`, clamped to
    /// `[min_persistence, 1]`. Missing inputs count as perfectly stable.
    pub fn persistence_factor(&self, t: TransitionMetrics) -> f64 {
        let p = &self.params;
        let flip = t.flip_density.unwrap_or(0.0).clamp(0.0, 1.0);
        let entropy = t.entropy.unwrap_or(0.0).max(0.0);
        let norm = if p.entropy_norm > 0.0 { p.entropy_norm } else { 1.0 };
        let factor = (1.0 - flip) * (1.0 - (entropy / norm).min(1.0));
        trace!(
            flip = format!("{:.3}", flip),
            entropy = format!("{:.3}", entropy),
            factor = format!("{:.3}", factor),
            "persistence factor"
        );
        factor.clamp(p.min_persistence, 1.0)
    }

    /// Nudge effective confidence by an external verdict and context delta.
    ///
    /// Each delta is clamped to its own cap before being applied; the result
    /// is re-clamped to [0, 1].  Returns a new score.
    pub fn apply_llm_adjustment(
        &self,
        score: &RegimeScore,
        verdict_delta: f64,
        context_nudge: f64,
    ) -> RegimeScore {
        let p = &self.params;
        let verdict = clamp_symmetric(verdict_delta, p.llm_verdict_cap);
        let context = clamp_symmetric(context_nudge, p.context_nudge_cap);
        let adjusted = (score.effective_confidence + verdict + context).clamp(0.0, 1.0);

        let mut out = score.clone();
        out.effective_confidence = adjusted;
        out.rationale = format!(
            "{}; external verdict {:+.3}, context {:+.3} -> {:.3}",
            score.rationale, verdict, context, adjusted
        );
        out
    }

    /// Evaluate the execution blockers for `score`.
    ///
    /// Pure: reports what would happen without acting on it.
    pub fn check_execution_gates(&self, score: &RegimeScore, ctx: &GateContext) -> ExecutionGates {
        let p = &self.params;
        let mut blockers = Vec::new();

        if score.effective_confidence < p.min_execution_confidence {
            blockers.push(format!(
                "confidence {:.3} below minimum {:.2}",
                score.effective_confidence, p.min_execution_confidence
            ));
        }

        if ctx.volatility > p.max_bar_volatility {
            blockers.push(format!(
                "volatility gate: {:.4} > {:.4}",
                ctx.volatility, p.max_bar_volatility
            ));
        }

        if ctx.in_blackout {
            blockers.push("execution blackout window".to_string());
        }

        if let Some(htf) = ctx.higher_tf_label {
            if htf.opposes(score.label) {
                blockers.push(format!(
                    "higher timeframe disagrees: {} vs {}",
                    htf, score.label
                ));
            }
        }

        let posture = match score.label {
            RegimeLabel::Trending | RegimeLabel::VolatileTrending => Posture::Momentum,
            RegimeLabel::MeanReverting => Posture::MeanReversion,
            RegimeLabel::Random | RegimeLabel::Uncertain => Posture::StandAside,
        };
        let size_multiplier = if posture == Posture::StandAside {
            0.0
        } else {
            score.effective_confidence
        };

        let hypothetical_plan = HypotheticalPlan {
            label: score.label,
            posture,
            size_multiplier,
        };

        ExecutionGates {
            execution_ready: blockers.is_empty(),
            blockers,
            hypothetical_plan,
        }
    }
}

// =============================================================================
// Component mappings
// =============================================================================

fn hurst_component(hurst: f64) -> f64 {
    ((hurst - 0.5) / 0.5).clamp(-1.0, 1.0)
}

fn vr_component(vr: f64) -> f64 {
    (1.0 - vr).clamp(-1.0, 1.0)
}

fn adf_component(p_value: Option<f64>, significance: f64) -> f64 {
    match p_value {
        Some(p) if p.is_finite() => {
            let p = p.clamp(0.0, 1.0);
            let sign = if p > significance {
                1.0
            } else if p < significance {
                -1.0
            } else {
                0.0
            };
            sign * (1.0 - p)
        }
        _ => 0.0,
    }
}

fn clamp_symmetric(value: f64, cap: f64) -> f64 {
    if !value.is_finite() {
        return 0.0;
    }
    let cap = cap.abs();
    value.clamp(-cap, cap)
}

/// Linearly remap `value` from `[in_lo, in_hi]` to `[out_lo, out_hi]`, clamped
/// to the output range.
fn remap(value: f64, in_lo: f64, in_hi: f64, out_lo: f64, out_hi: f64) -> f64 {
    let t = if (in_hi - in_lo).abs() < f64::EPSILON {
        0.5
    } else {
        (value - in_lo) / (in_hi - in_lo)
    };
    let clamped = t.clamp(0.0, 1.0);
    out_lo + clamped * (out_hi - out_lo)
}
