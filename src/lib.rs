// =============================================================================
// Regime Engine — regime classification and transition tracking
// =============================================================================
//
// Statistics (features) -> unified classifier -> hysteresis -> reported
// decision, with label-history stability feeding back into confidence and an
// alternate-bar contradictor penalising disagreement.
// =============================================================================

pub mod config;
pub mod data;
pub mod decision;
pub mod error;
pub mod features;
pub mod pipeline;
pub mod regime;
pub mod stats;
pub mod types;

#[cfg(test)]
mod fixtures;

pub use config::EngineConfig;
pub use decision::RegimeDecision;
pub use error::{RegimeError, Result};
pub use features::{FeatureBundle, FeatureComputer};
pub use pipeline::{RegimePipeline, SymbolReport, TierReport};
pub use types::{PriceBar, PriceSeries, RegimeLabel, Tier};
