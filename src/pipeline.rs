// =============================================================================
// Regime Pipeline — one (symbol, tier) run end to end
// =============================================================================
//
//   source -> FeatureComputer -> classifier (+ prior transition snapshot)
//          -> hysteresis -> transition tracker (reported label)
//          -> contradictor (alternate bar) -> execution gates
//
// Runs for different (symbol, tier) keys share nothing mutable except the
// hysteresis store and the tracker map.  Both hand out one lock per key; the
// map lock is only held to fetch it, never across a snapshot.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{Timelike, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::EngineConfig;
use crate::data::PriceSource;
use crate::decision::RegimeDecision;
use crate::error::{RegimeError, Result};
use crate::features::{FeatureBundle, FeatureComputer};
use crate::regime::{
    Contradictor, ContradictorReport, ExecutionGates, GateContext, MemoryStore, RegimeHysteresis,
    RegimeScore, TransitionMetrics, TransitionStats, TransitionTracker, UnifiedRegimeClassifier,
};
use crate::types::{PriceSeries, RegimeLabel, Tier};

/// Everything produced for one (symbol, tier) run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TierReport {
    pub symbol: String,
    pub tier: Tier,
    pub bar: String,
    pub features: FeatureBundle,
    pub score: RegimeScore,
    pub decision: RegimeDecision,
    pub transitions: TransitionStats,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contradictor: Option<ContradictorReport>,
    /// Decision confidence after the contradictor penalty.
    pub final_confidence: f64,
    pub gates: ExecutionGates,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SymbolReport {
    pub symbol: String,
    pub tiers: Vec<TierReport>,
    /// Tiers that failed, as "TIER: error".
    pub errors: Vec<String>,
}

pub struct RegimePipeline<P: PriceSource, M: MemoryStore> {
    config: EngineConfig,
    source: P,
    computer: FeatureComputer,
    classifier: UnifiedRegimeClassifier,
    hysteresis: RegimeHysteresis<M>,
    contradictor: Contradictor,
    trackers: Mutex<HashMap<(String, Tier), Arc<Mutex<TransitionTracker>>>>,
}

impl<P: PriceSource, M: MemoryStore> RegimePipeline<P, M> {
    pub fn new(config: EngineConfig, source: P, store: M) -> Result<Self> {
        config.validate()?;
        let classifier = UnifiedRegimeClassifier::new(config.classifier.clone())?;
        Ok(Self {
            computer: FeatureComputer::new(config.features.clone()),
            hysteresis: RegimeHysteresis::new(config.hysteresis.clone(), store),
            contradictor: Contradictor::new(config.contradictor.clone(), config.features.clone()),
            classifier,
            source,
            config,
            trackers: Mutex::new(HashMap::new()),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn classifier(&self) -> &UnifiedRegimeClassifier {
        &self.classifier
    }

    pub fn hysteresis(&self) -> &RegimeHysteresis<M> {
        &self.hysteresis
    }

    /// Rebuild a tracker from a full label history.
    pub fn seed_history(&self, symbol: &str, tier: Tier, labels: &[RegimeLabel]) {
        self.tracker(symbol, tier).lock().ingest_sequence(labels);
    }

    /// Current transition snapshot of (symbol, tier), if any labels exist.
    pub fn transition_stats(&self, symbol: &str, tier: Tier) -> Option<TransitionStats> {
        let tracker = self.trackers.lock().get(&(symbol.to_string(), tier)).cloned()?;
        let tracker = tracker.lock();
        (!tracker.is_empty()).then(|| tracker.snapshot())
    }

    fn tracker(&self, symbol: &str, tier: Tier) -> Arc<Mutex<TransitionTracker>> {
        self.trackers
            .lock()
            .entry((symbol.to_string(), tier))
            .or_insert_with(|| {
                Arc::new(Mutex::new(TransitionTracker::new(self.config.transitions.clone())))
            })
            .clone()
    }

    /// Run every stage for one (symbol, tier).
    ///
    /// `higher_tf_label` is the reported label of the next-longer tier, used by
    /// the execution gates.
    pub fn run_tier(
        &self,
        symbol: &str,
        tier: Tier,
        higher_tf_label: Option<RegimeLabel>,
    ) -> Result<TierReport> {
        let settings = self
            .config
            .tier(tier)
            .ok_or_else(|| RegimeError::Configuration(format!("tier {} not configured", tier)))?;

        let series = self
            .source
            .load(symbol, &settings.bar, settings.lookback)
            .map_err(|e| RegimeError::DataUnavailable(format!("{}@{}: {:#}", symbol, settings.bar, e)))?;

        let features = self.computer.compute(&series, tier)?;

        let prior = self.transition_stats(symbol, tier);
        let score = self
            .classifier
            .classify(&features, prior.as_ref().map(TransitionMetrics::from));

        let decision = self.hysteresis.observe(symbol, tier, &score);
        let transitions = self.record_label(symbol, tier, decision.label, last_return(&series));

        let contradictor = self.contradictor.applies_to(tier).then(|| {
            self.contradictor
                .challenge(&self.source, &series, &features, decision.confidence)
        });
        let final_confidence = contradictor
            .as_ref()
            .map(|c| c.adjusted_confidence)
            .unwrap_or(decision.confidence);

        let reported = RegimeScore {
            label: decision.label,
            effective_confidence: final_confidence,
            ..score.clone()
        };
        let gates = self.classifier.check_execution_gates(
            &reported,
            &GateContext {
                volatility: features.volatility,
                in_blackout: self.in_blackout(),
                higher_tf_label,
            },
        );

        info!(
            symbol,
            tier = %tier,
            bar = %settings.bar,
            label = %decision.label,
            raw = %score.label,
            confidence = format!("{:.3}", final_confidence),
            ready = gates.execution_ready,
            "regime run complete"
        );

        Ok(TierReport {
            symbol: symbol.to_string(),
            tier,
            bar: settings.bar.clone(),
            features,
            score,
            decision,
            transitions,
            contradictor,
            final_confidence,
            gates,
        })
    }

    /// Run every configured tier, longest first, passing each reported label
    /// down as the next tier's higher-timeframe context.
    pub fn run_symbol(&self, symbol: &str) -> SymbolReport {
        let mut tiers: Vec<Tier> = self.config.tiers.iter().map(|t| t.tier).collect();
        tiers.sort();
        tiers.dedup();

        let mut reports = Vec::with_capacity(tiers.len());
        let mut errors = Vec::new();
        let mut higher: Option<RegimeLabel> = None;

        for tier in tiers {
            match self.run_tier(symbol, tier, higher) {
                Ok(report) => {
                    higher = Some(report.decision.label);
                    reports.push(report);
                }
                Err(e) => {
                    warn!(symbol, tier = %tier, error = %e, "tier run failed");
                    errors.push(format!("{}: {}", tier, e));
                }
            }
        }

        SymbolReport {
            symbol: symbol.to_string(),
            tiers: reports,
            errors,
        }
    }

    fn record_label(
        &self,
        symbol: &str,
        tier: Tier,
        label: RegimeLabel,
        ret: Option<f64>,
    ) -> TransitionStats {
        let tracker = self.tracker(symbol, tier);
        let mut tracker = tracker.lock();
        let idx = tracker.next_index();
        match ret {
            Some(r) => tracker.ingest_with_return(label, idx, r),
            None => tracker.ingest(label, idx),
        }
        tracker.snapshot()
    }

    fn in_blackout(&self) -> bool {
        let hour = Utc::now().hour();
        self.config.blackout_utc_hours.contains(&hour)
    }
}

/// Log return of the final bar, when both of the last two closes are usable.
fn last_return(series: &PriceSeries) -> Option<f64> {
    let n = series.bars.len();
    if n < 2 {
        return None;
    }
    let (prev, last) = (series.bars[n - 2].close, series.bars[n - 1].close);
    (prev > 0.0 && last > 0.0 && prev.is_finite() && last.is_finite()).then(|| (last / prev).ln())
}
