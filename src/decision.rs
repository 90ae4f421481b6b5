// =============================================================================
// Regime Decision — auditable record of every reported regime
// =============================================================================
//
// A classification passes through two layers before it is reported: the
// unified classifier (raw label + confidence) and hysteresis (reported label).
// The decision captures both so that any reported regime can be traced back
// to the statistics and the confirmation state that produced it.
// =============================================================================

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::regime::classifier::{ComponentContributions, RegimeScore};
use crate::regime::hysteresis::HysteresisState;
use crate::types::{RegimeLabel, Tier};

/// Reported regime for one (symbol, tier) run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegimeDecision {
    /// Unique identifier for this decision (UUID v4).
    pub id: String,

    pub symbol: String,
    pub tier: Tier,

    /// Label after hysteresis.
    pub label: RegimeLabel,

    /// Label the classifier produced this run.
    pub raw_label: RegimeLabel,

    pub raw_confidence: f64,
    pub effective_confidence: f64,

    /// Confidence after the hysteresis cap; what consumers should size on.
    pub confidence: f64,

    pub state: HysteresisState,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub pending_label: Option<RegimeLabel>,
    pub pending_count: u32,

    pub score: f64,
    pub contributions: ComponentContributions,
    pub rationale: String,

    pub created_at: DateTime<Utc>,
}

impl RegimeDecision {
    /// Build a decision from the classifier output and the hysteresis verdict.
    pub fn from_score(
        symbol: impl Into<String>,
        tier: Tier,
        score: &RegimeScore,
        label: RegimeLabel,
        confidence: f64,
        state: HysteresisState,
        pending: Option<(RegimeLabel, u32)>,
    ) -> Self {
        let rationale = match state {
            HysteresisState::Pending => format!(
                "{}; hysteresis {} (pending {:?} x{}) reports {} at {:.3}",
                score.rationale,
                state,
                pending.map(|(l, _)| l.as_str()),
                pending.map(|(_, c)| c).unwrap_or(0),
                label,
                confidence
            ),
            _ => format!(
                "{}; hysteresis {} reports {} at {:.3}",
                score.rationale, state, label, confidence
            ),
        };

        Self {
            id: uuid::Uuid::new_v4().to_string(),
            symbol: symbol.into(),
            tier,
            label,
            raw_label: score.label,
            raw_confidence: score.raw_confidence,
            effective_confidence: score.effective_confidence,
            confidence: confidence.clamp(0.0, 1.0),
            state,
            pending_label: pending.map(|(l, _)| l),
            pending_count: pending.map(|(_, c)| c).unwrap_or(0),
            score: score.score,
            contributions: score.contributions,
            rationale,
            created_at: Utc::now(),
        }
    }

    /// True when hysteresis is holding back a new label.
    pub fn is_transitioning(&self) -> bool {
        self.state == HysteresisState::Pending
    }
}
