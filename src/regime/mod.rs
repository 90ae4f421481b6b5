// =============================================================================
// Regime Module
// =============================================================================
//
// Turns feature bundles into reported regimes:
// - Unified classifier (Hurst / variance ratio / ADF fusion + persistence)
// - Transition tracker (label-history stability)
// - Hysteresis (confirmation before a new label is reported)
// - Contradictor (alternate-bar red team)

pub mod classifier;
pub mod contradictor;
pub mod hysteresis;
pub mod transitions;

pub use classifier::{
    ComponentContributions, ExecutionGates, GateContext, HypotheticalPlan, Posture, RegimeScore,
    TransitionMetrics, UnifiedRegimeClassifier,
};
pub use contradictor::{Contradictor, ContradictorReport};
pub use hysteresis::{
    HysteresisState, InMemoryStore, JsonFileStore, MemoryStore, RegimeHysteresis, RegimeMemory,
};
pub use transitions::{DurationStats, TransitionStats, TransitionTracker};
