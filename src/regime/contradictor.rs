// =============================================================================
// Contradictor — red-team re-derivation on an alternate bar size
// =============================================================================
//
// Recomputes the feature bundle of the same symbol on an alternate bar size
// (e.g. 15m <-> 1h) over the same time span and compares conclusions:
//
//   hurst       average Hurst on opposite sides of 0.5
//   vr          VR on opposite sides of 1.0, both significant
//   borderline  a VR p-value within +-threshold of the significance level
//               (and above a floor), counted once per bar
//
// Each contradiction costs 0.10 of confidence, capped at 0.30 total.  A missing
// alternate mapping or unloadable alternate data yields an empty report with a
// note; the contradictor never fails the caller.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::{ContradictorParams, FeatureParams};
use crate::data::PriceSource;
use crate::features::{FeatureBundle, FeatureComputer};
use crate::types::{bar_seconds, PriceSeries, Tier};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContradictorReport {
    pub original_confidence: f64,
    pub adjusted_confidence: f64,
    pub alternate_bar: Option<String>,
    pub contradictions: Vec<String>,
    pub notes: Vec<String>,
}

impl ContradictorReport {
    fn unchanged(original_confidence: f64, alternate_bar: Option<String>, note: String) -> Self {
        Self {
            original_confidence,
            adjusted_confidence: original_confidence,
            alternate_bar,
            contradictions: Vec::new(),
            notes: vec![note],
        }
    }
}

pub struct Contradictor {
    params: ContradictorParams,
    computer: FeatureComputer,
}

impl Contradictor {
    pub fn new(params: ContradictorParams, features: FeatureParams) -> Self {
        Self {
            params,
            computer: FeatureComputer::new(features),
        }
    }

    pub fn params(&self) -> &ContradictorParams {
        &self.params
    }

    /// Whether the contradictor is configured to run on `tier`.
    pub fn applies_to(&self, tier: Tier) -> bool {
        self.params.tiers.contains(&tier)
    }

    pub fn alternate_bar(&self, bar: &str) -> Option<&str> {
        self.params.alternate_bars.get(bar).map(String::as_str)
    }

    /// Challenge a primary reading with the alternate bar size from `source`.
    pub fn challenge<P: PriceSource + ?Sized>(
        &self,
        source: &P,
        primary_series: &PriceSeries,
        primary: &FeatureBundle,
        original_confidence: f64,
    ) -> ContradictorReport {
        let Some(alt_bar) = self.alternate_bar(&primary.bar) else {
            debug!(symbol = %primary.symbol, bar = %primary.bar, "no alternate bar configured");
            return ContradictorReport::unchanged(
                original_confidence,
                None,
                format!("no alternate bar configured for {}", primary.bar),
            );
        };

        let lookback = alternate_lookback(primary_series.len(), &primary.bar, alt_bar);
        let alt_series = match source.load(&primary.symbol, alt_bar, lookback) {
            Ok(s) => s,
            Err(e) => {
                warn!(symbol = %primary.symbol, bar = alt_bar, error = %e, "alternate data unavailable");
                return ContradictorReport::unchanged(
                    original_confidence,
                    Some(alt_bar.to_string()),
                    format!("alternate {} data unavailable: {:#}", alt_bar, e),
                );
            }
        };

        let alternate = match self.computer.compute(&alt_series, primary.tier) {
            Ok(b) => b,
            Err(e) => {
                warn!(symbol = %primary.symbol, bar = alt_bar, error = %e, "alternate features failed");
                return ContradictorReport::unchanged(
                    original_confidence,
                    Some(alt_bar.to_string()),
                    format!("alternate {} features unavailable: {}", alt_bar, e),
                );
            }
        };

        self.report(primary, &alternate, original_confidence)
    }

    /// Compare two bundles and price the disagreements.
    pub fn report(
        &self,
        primary: &FeatureBundle,
        alternate: &FeatureBundle,
        original_confidence: f64,
    ) -> ContradictorReport {
        let contradictions = compare(primary, alternate, &self.params);
        let adjusted_confidence = adjust_confidence(original_confidence, contradictions.len(), &self.params);

        debug!(
            symbol = %primary.symbol,
            primary_bar = %primary.bar,
            alternate_bar = %alternate.bar,
            contradictions = contradictions.len(),
            original = format!("{:.3}", original_confidence),
            adjusted = format!("{:.3}", adjusted_confidence),
            "contradictor report"
        );

        let notes = vec![format!(
            "{} vs {}: hurst {:.3}/{:.3}, vr {}/{}",
            primary.bar,
            alternate.bar,
            primary.hurst_average(),
            alternate.hurst_average(),
            fmt_opt(primary.vr),
            fmt_opt(alternate.vr)
        )];

        ContradictorReport {
            original_confidence,
            adjusted_confidence,
            alternate_bar: Some(alternate.bar.clone()),
            contradictions,
            notes,
        }
    }
}

/// Disagreements between the primary and the alternate bundle.
pub fn compare(
    primary: &FeatureBundle,
    alternate: &FeatureBundle,
    params: &ContradictorParams,
) -> Vec<String> {
    let mut out = Vec::new();

    let (h1, h2) = (primary.hurst_average(), alternate.hurst_average());
    if (h1 - 0.5) * (h2 - 0.5) < 0.0 {
        out.push(format!(
            "hurst disagrees: {} {:.3} vs {} {:.3}",
            primary.bar, h1, alternate.bar, h2
        ));
    }

    if let (Some(v1), Some(p1), Some(v2), Some(p2)) = (
        primary.vr,
        primary.vr_p_value,
        alternate.vr,
        alternate.vr_p_value,
    ) {
        if (v1 - 1.0) * (v2 - 1.0) < 0.0 && p1 < params.significance && p2 < params.significance {
            out.push(format!(
                "variance ratio disagrees: {} {:.3} (p={:.3}) vs {} {:.3} (p={:.3})",
                primary.bar, v1, p1, alternate.bar, v2, p2
            ));
        }
    }

    for bundle in [primary, alternate] {
        if let Some(p) = bundle.vr_p_value {
            if is_borderline(p, params) {
                out.push(format!(
                    "borderline variance ratio on {}: p={:.3} near {:.2}",
                    bundle.bar, p, params.significance
                ));
            }
        }
    }

    out
}

fn is_borderline(p: f64, params: &ContradictorParams) -> bool {
    p > params.borderline_floor && (p - params.significance).abs() <= params.borderline_threshold
}

/// `max(0, original - min(per * n, cap))`.
pub fn adjust_confidence(original: f64, contradictions: usize, params: &ContradictorParams) -> f64 {
    let penalty = (params.penalty_per_contradiction * contradictions as f64).min(params.max_penalty);
    (original - penalty).clamp(0.0, 1.0)
}

/// Bars of `alt_bar` spanning the same time as `primary_len` bars of
/// `primary_bar`; falls back to `primary_len` for unparseable bar sizes.
fn alternate_lookback(primary_len: usize, primary_bar: &str, alt_bar: &str) -> usize {
    match (bar_seconds(primary_bar), bar_seconds(alt_bar)) {
        (Some(p), Some(a)) => {
            let span = primary_len as i64 * p;
            ((span + a - 1) / a).max(1) as usize
        }
        _ => primary_len,
    }
}

fn fmt_opt(v: Option<f64>) -> String {
    v.map(|x| format!("{:.3}", x)).unwrap_or_else(|| "n/a".to_string())
}
