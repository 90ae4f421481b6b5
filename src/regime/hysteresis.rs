// =============================================================================
// Regime Hysteresis — confirmation before a new label is reported
// =============================================================================
//
// Per (symbol, tier) state machine across pipeline invocations:
//
//   (no memory) --raw--> Bootstrapped   adopt raw immediately
//   Confirmed   --raw == confirmed-->   Confirmed   (pending streak reset)
//   Confirmed   --raw != confirmed-->   Pending     (streak = 1, or +1 if same
//                                                    pending label)
//   Pending     --streak == N------->   Switched    (pending becomes confirmed)
//
// While pending, the reported label is the prior confirmed label (or
// `uncertain` with `use_transition_state`) and confidence is capped at
// `transition_confidence_cap`.
//
// Memory lives behind the `MemoryStore` trait.  Load/save failures are logged
// and the run proceeds from fresh memory; they never fail the caller.  Each
// read-modify-write holds a per-key lock, so concurrent runs for one
// (symbol, tier) never lose progress while different keys never contend.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::HysteresisParams;
use crate::decision::RegimeDecision;
use crate::error::{RegimeError, Result};
use crate::regime::classifier::RegimeScore;
use crate::types::{RegimeLabel, Tier};

// =============================================================================
// Memory
// =============================================================================

/// Persisted hysteresis state of one (symbol, tier).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegimeMemory {
    pub confirmed_label: Option<RegimeLabel>,
    pub pending_label: Option<RegimeLabel>,
    pub pending_count: u32,
    pub last_updated: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HysteresisState {
    /// No prior memory; the raw label was adopted.
    Bootstrapped,
    /// Raw label agrees with the confirmed label.
    Confirmed,
    /// Raw label disagrees; waiting for the streak to complete.
    Pending,
    /// The pending label just became the confirmed label.
    Switched,
}

impl std::fmt::Display for HysteresisState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Bootstrapped => "bootstrapped",
            Self::Confirmed => "confirmed",
            Self::Pending => "pending",
            Self::Switched => "switched",
        };
        f.write_str(s)
    }
}

/// Result of one state-machine step.
#[derive(Debug, Clone, PartialEq)]
pub struct HysteresisStep {
    pub memory: RegimeMemory,
    pub state: HysteresisState,
    /// Label to report this run.
    pub reported_label: RegimeLabel,
}

/// Pure transition function of the hysteresis state machine.
pub fn advance(
    memory: &RegimeMemory,
    raw: RegimeLabel,
    params: &HysteresisParams,
    now: DateTime<Utc>,
) -> HysteresisStep {
    let needed = params.confirmation_bars.max(1);

    let Some(confirmed) = memory.confirmed_label else {
        return HysteresisStep {
            memory: RegimeMemory {
                confirmed_label: Some(raw),
                pending_label: Some(raw),
                pending_count: needed,
                last_updated: Some(now),
            },
            state: HysteresisState::Bootstrapped,
            reported_label: raw,
        };
    };

    if raw == confirmed {
        return HysteresisStep {
            memory: RegimeMemory {
                confirmed_label: Some(confirmed),
                pending_label: None,
                pending_count: 0,
                last_updated: Some(now),
            },
            state: HysteresisState::Confirmed,
            reported_label: confirmed,
        };
    }

    let streak = if memory.pending_label == Some(raw) {
        memory.pending_count.saturating_add(1)
    } else {
        1
    };

    if streak >= needed {
        return HysteresisStep {
            memory: RegimeMemory {
                confirmed_label: Some(raw),
                pending_label: None,
                pending_count: 0,
                last_updated: Some(now),
            },
            state: HysteresisState::Switched,
            reported_label: raw,
        };
    }

    let reported_label = if params.use_transition_state {
        RegimeLabel::Uncertain
    } else {
        confirmed
    };
    HysteresisStep {
        memory: RegimeMemory {
            confirmed_label: Some(confirmed),
            pending_label: Some(raw),
            pending_count: streak,
            last_updated: Some(now),
        },
        state: HysteresisState::Pending,
        reported_label,
    }
}

// =============================================================================
// MemoryStore
// =============================================================================

/// Keyed persistence of [`RegimeMemory`].
pub trait MemoryStore: Send + Sync {
    fn load(&self, symbol: &str, tier: Tier) -> Result<Option<RegimeMemory>>;
    fn save(&self, symbol: &str, tier: Tier, memory: &RegimeMemory) -> Result<()>;
}

/// Process-local store, used in tests and dry runs.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    entries: Mutex<HashMap<(String, Tier), RegimeMemory>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MemoryStore for InMemoryStore {
    fn load(&self, symbol: &str, tier: Tier) -> Result<Option<RegimeMemory>> {
        Ok(self.entries.lock().get(&(symbol.to_string(), tier)).cloned())
    }

    fn save(&self, symbol: &str, tier: Tier, memory: &RegimeMemory) -> Result<()> {
        self.entries
            .lock()
            .insert((symbol.to_string(), tier), memory.clone());
        Ok(())
    }
}

/// On-disk record; labels stay plain strings until re-parsed on load.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct StoredMemory {
    #[serde(default)]
    confirmed_label: Option<String>,
    #[serde(default)]
    pending_label: Option<String>,
    #[serde(default)]
    pending_count: u32,
    #[serde(default)]
    last_updated: Option<DateTime<Utc>>,
}

/// `{symbol: {tier: {...}}}`
type StoredDocument = BTreeMap<String, BTreeMap<String, StoredMemory>>;

/// JSON document `{symbol: {tier: memory}}` with atomic tmp + rename writes.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    /// Serialises whole-document read-modify-write across keys.
    file_lock: Mutex<()>,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            file_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_document(&self) -> Result<StoredDocument> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(StoredDocument::new()),
            Err(e) => {
                return Err(RegimeError::Persistence(format!(
                    "failed to read {}: {}",
                    self.path.display(),
                    e
                )))
            }
        };
        if content.trim().is_empty() {
            return Ok(StoredDocument::new());
        }
        let raw: BTreeMap<String, serde_json::Value> = serde_json::from_str(&content).map_err(|e| {
            RegimeError::Persistence(format!("failed to parse {}: {}", self.path.display(), e))
        })?;
        Ok(parse_document(raw))
    }

    fn write_document(&self, doc: &StoredDocument) -> Result<()> {
        let content = serde_json::to_string_pretty(doc)
            .map_err(|e| RegimeError::Persistence(format!("failed to serialise memory: {}", e)))?;

        let tmp_path = self.path.with_extension("json.tmp");
        std::fs::write(&tmp_path, content).map_err(|e| {
            RegimeError::Persistence(format!("failed to write {}: {}", tmp_path.display(), e))
        })?;
        std::fs::rename(&tmp_path, &self.path).map_err(|e| {
            RegimeError::Persistence(format!("failed to rename to {}: {}", self.path.display(), e))
        })
    }
}

/// Keep every well-formed (symbol, tier) entry; malformed ones are dropped
/// individually so one bad record cannot wipe the rest on the next save.
fn parse_document(raw: BTreeMap<String, serde_json::Value>) -> StoredDocument {
    let mut doc = StoredDocument::new();
    for (symbol, tiers) in raw {
        let serde_json::Value::Object(tiers) = tiers else {
            warn!(symbol = %symbol, "ignoring malformed regime memory entry");
            continue;
        };
        let mut parsed = BTreeMap::new();
        for (tier, value) in tiers {
            match serde_json::from_value::<StoredMemory>(value) {
                Ok(stored) => {
                    parsed.insert(tier, stored);
                }
                Err(e) => {
                    warn!(symbol = %symbol, tier = %tier, error = %e, "ignoring malformed regime memory entry");
                }
            }
        }
        if !parsed.is_empty() {
            doc.insert(symbol, parsed);
        }
    }
    doc
}

fn parse_stored_label(raw: Option<&str>, symbol: &str, tier: Tier, field: &str) -> Option<RegimeLabel> {
    let raw = raw?;
    match raw.parse::<RegimeLabel>() {
        Ok(label) => Some(label),
        Err(e) => {
            warn!(symbol, tier = %tier, field, error = %e, "ignoring unknown stored regime label");
            None
        }
    }
}

impl MemoryStore for JsonFileStore {
    fn load(&self, symbol: &str, tier: Tier) -> Result<Option<RegimeMemory>> {
        let doc = {
            let _guard = self.file_lock.lock();
            self.read_document()?
        };

        let Some(stored) = doc.get(symbol).and_then(|tiers| tiers.get(tier.as_str())) else {
            return Ok(None);
        };

        Ok(Some(RegimeMemory {
            confirmed_label: parse_stored_label(
                stored.confirmed_label.as_deref(),
                symbol,
                tier,
                "confirmed_label",
            ),
            pending_label: parse_stored_label(
                stored.pending_label.as_deref(),
                symbol,
                tier,
                "pending_label",
            ),
            pending_count: stored.pending_count,
            last_updated: stored.last_updated,
        }))
    }

    fn save(&self, symbol: &str, tier: Tier, memory: &RegimeMemory) -> Result<()> {
        let _guard = self.file_lock.lock();

        let mut doc = match self.read_document() {
            Ok(doc) => doc,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "regime memory unreadable, rewriting");
                StoredDocument::new()
            }
        };

        doc.entry(symbol.to_string()).or_default().insert(
            tier.as_str().to_string(),
            StoredMemory {
                confirmed_label: memory.confirmed_label.map(|l| l.as_str().to_string()),
                pending_label: memory.pending_label.map(|l| l.as_str().to_string()),
                pending_count: memory.pending_count,
                last_updated: memory.last_updated,
            },
        );

        self.write_document(&doc)?;
        debug!(path = %self.path.display(), symbol, tier = %tier, "regime memory saved (atomic)");
        Ok(())
    }
}

// =============================================================================
// RegimeHysteresis
// =============================================================================

pub struct RegimeHysteresis<S: MemoryStore> {
    params: HysteresisParams,
    store: S,
    key_locks: Mutex<HashMap<(String, Tier), Arc<Mutex<()>>>>,
}

impl<S: MemoryStore> RegimeHysteresis<S> {
    pub fn new(params: HysteresisParams, store: S) -> Self {
        Self {
            params,
            store,
            key_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn params(&self) -> &HysteresisParams {
        &self.params
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    fn key_lock(&self, symbol: &str, tier: Tier) -> Arc<Mutex<()>> {
        self.key_locks
            .lock()
            .entry((symbol.to_string(), tier))
            .or_default()
            .clone()
    }

    /// Feed one raw classification through the state machine and report.
    pub fn observe(&self, symbol: &str, tier: Tier, score: &RegimeScore) -> RegimeDecision {
        let lock = self.key_lock(symbol, tier);
        let _guard = lock.lock();

        let memory = match self.store.load(symbol, tier) {
            Ok(Some(m)) => m,
            Ok(None) => RegimeMemory::default(),
            Err(e) => {
                warn!(symbol, tier = %tier, error = %e, "regime memory load failed, starting fresh");
                RegimeMemory::default()
            }
        };

        let step = advance(&memory, score.label, &self.params, Utc::now());

        if let Err(e) = self.store.save(symbol, tier, &step.memory) {
            warn!(symbol, tier = %tier, error = %e, "regime memory save failed");
        }

        let confidence = if step.state == HysteresisState::Pending {
            score
                .effective_confidence
                .min(self.params.transition_confidence_cap)
        } else {
            score.effective_confidence
        };

        match step.state {
            HysteresisState::Switched | HysteresisState::Bootstrapped => info!(
                symbol,
                tier = %tier,
                label = %step.reported_label,
                state = %step.state,
                "regime confirmed"
            ),
            _ => debug!(
                symbol,
                tier = %tier,
                raw = %score.label,
                reported = %step.reported_label,
                state = %step.state,
                pending = step.memory.pending_count,
                "hysteresis step"
            ),
        }

        let pending = match step.state {
            HysteresisState::Pending => step
                .memory
                .pending_label
                .map(|l| (l, step.memory.pending_count)),
            _ => None,
        };

        RegimeDecision::from_score(
            symbol,
            tier,
            score,
            step.reported_label,
            confidence,
            step.state,
            pending,
        )
    }
}
