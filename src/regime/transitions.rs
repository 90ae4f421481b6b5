// =============================================================================
// Transition Tracker — stability of a regime-label history
// =============================================================================
//
// Consumes the ordered label stream of one (symbol, tier) and keeps a bounded
// window of labels plus the runs they form.  A snapshot projects the window
// into:
//
//   flip density   = #(label[i] != label[i-1]) / window length   (Wilson CI)
//   durations      = windowed run lengths incl. the open run      (bootstrap CI)
//   matrix         = row-normalised canonical transition counts
//   entropy        = mean row Shannon entropy, natural log, in [0, ln 3]
//   hazard         = P(run ends at age t | run reached age t)
//
// Any statistic whose sample requirement is unmet is `None`, never zero, so
// "stable" and "unknown" stay distinguishable.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::config::TransitionParams;
use crate::stats;
use crate::types::RegimeLabel;

pub const ALERT_FLIP_DENSITY_HIGH: &str = "flip_density_high";
pub const ALERT_DURATION_TOO_SHORT: &str = "duration_too_short";

// =============================================================================
// Types
// =============================================================================

/// A maximal stretch of identical consecutive labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegimeRun {
    pub label: RegimeLabel,
    pub start: usize,
    pub end: usize,
    pub length: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DurationStats {
    pub mean: f64,
    pub median: f64,
    pub p25: f64,
    pub p75: f64,
}

pub type TransitionMatrix = BTreeMap<RegimeLabel, BTreeMap<RegimeLabel, f64>>;

/// Read-only projection of a tracker's window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionStats {
    /// Labels currently in the window.
    pub window_bars: usize,
    pub closed_runs: usize,
    pub flip_density: Option<f64>,
    pub flip_density_ci: Option<(f64, f64)>,
    pub durations: Option<DurationStats>,
    pub median_duration_ci: Option<(f64, f64)>,
    pub matrix: TransitionMatrix,
    pub entropy: Option<f64>,
    pub entropy_ci: Option<(f64, f64)>,
    /// Run age in bars -> probability the run ends at that age.
    pub hazard: BTreeMap<usize, f64>,
    pub vol_around_flip_ratio: Option<f64>,
    pub alerts: Vec<String>,
}

// =============================================================================
// TransitionTracker
// =============================================================================

#[derive(Debug, Clone)]
pub struct TransitionTracker {
    params: TransitionParams,
    labels: VecDeque<RegimeLabel>,
    /// Per-label bar index and return, aligned with `labels`.
    indices: VecDeque<usize>,
    returns: VecDeque<Option<f64>>,
    closed: VecDeque<RegimeRun>,
    current: Option<RegimeRun>,
    next_idx: usize,
}

impl TransitionTracker {
    pub fn new(params: TransitionParams) -> Self {
        let cap = params.window_bars.max(2);
        Self {
            params,
            labels: VecDeque::with_capacity(cap),
            indices: VecDeque::with_capacity(cap),
            returns: VecDeque::with_capacity(cap),
            closed: VecDeque::new(),
            current: None,
            next_idx: 0,
        }
    }

    /// Index the next label would naturally take.
    pub fn next_index(&self) -> usize {
        self.next_idx
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Record `label` observed at bar `idx`.
    pub fn ingest(&mut self, label: RegimeLabel, idx: usize) {
        self.push(label, idx, None);
    }

    /// Record `label` together with the bar's return, enabling the
    /// volatility-around-flip ratio.
    pub fn ingest_with_return(&mut self, label: RegimeLabel, idx: usize, ret: f64) {
        let ret = ret.is_finite().then_some(ret);
        self.push(label, idx, ret);
    }

    /// Clear all state and replay `labels` at indices 0..n.
    pub fn ingest_sequence(&mut self, labels: &[RegimeLabel]) {
        self.labels.clear();
        self.indices.clear();
        self.returns.clear();
        self.closed.clear();
        self.current = None;
        self.next_idx = 0;
        for (i, &label) in labels.iter().enumerate() {
            self.ingest(label, i);
        }
    }

    fn push(&mut self, label: RegimeLabel, idx: usize, ret: Option<f64>) {
        let window = self.params.window_bars.max(2);

        match self.current.as_mut() {
            Some(run) if run.label == label => {
                run.end = idx;
                run.length += 1;
            }
            _ => {
                if let Some(done) = self.current.take() {
                    trace!(label = %done.label, length = done.length, "regime run closed");
                    self.closed.push_back(done);
                }
                self.current = Some(RegimeRun {
                    label,
                    start: idx,
                    end: idx,
                    length: 1,
                });
            }
        }

        self.labels.push_back(label);
        self.indices.push_back(idx);
        self.returns.push_back(ret);
        let mut evicted = false;
        while self.labels.len() > window {
            self.labels.pop_front();
            self.indices.pop_front();
            self.returns.pop_front();
            evicted = true;
        }
        if evicted {
            self.clip_runs_to_window();
        }
        self.next_idx = idx + 1;
    }

    /// Drop runs that ended before the oldest windowed label and trim the
    /// one straddling the window edge to its in-window part.
    fn clip_runs_to_window(&mut self) {
        let Some(&oldest) = self.indices.front() else {
            return;
        };
        while self.closed.front().is_some_and(|r| r.end < oldest) {
            self.closed.pop_front();
        }

        let indices = &self.indices;
        let clip = |run: &mut RegimeRun| {
            if run.start < oldest {
                run.start = oldest;
                run.length = indices.iter().take_while(|&&i| i <= run.end).count();
            }
        };
        match self.closed.front_mut() {
            Some(run) => clip(run),
            None => {
                if let Some(run) = self.current.as_mut() {
                    clip(run);
                }
            }
        }
    }

    /// Project the current window into [`TransitionStats`].
    ///
    /// Takes `&self`; bootstraps are seeded from the parameters, so two
    /// snapshots without an intervening ingest are identical.
    pub fn snapshot(&self) -> TransitionStats {
        let p = &self.params;
        let labels: Vec<RegimeLabel> = self.labels.iter().copied().collect();
        let n = labels.len();

        // --- Flip density ----------------------------------------------------
        let flips = count_flips(&labels);
        let (flip_density, flip_density_ci) = if n >= 2 {
            (
                Some(flips as f64 / n as f64),
                stats::wilson_interval(flips, n, stats::Z_95),
            )
        } else {
            (None, None)
        };

        // --- Durations -------------------------------------------------------
        let mut lengths: Vec<f64> = self.closed.iter().map(|r| r.length as f64).collect();
        if let Some(open) = self.current {
            lengths.push(open.length as f64);
        }
        let durations = duration_stats(&lengths);
        let median_duration_ci = if self.closed.len() >= p.min_runs_for_duration_ci {
            stats::bootstrap_ci(&lengths, p.bootstrap_samples, p.bootstrap_seed, stats::median)
        } else {
            None
        };

        // --- Matrix / entropy ------------------------------------------------
        let pairs = canonical_pairs(&labels);
        let matrix = transition_matrix(&pairs);
        let entropy = matrix_entropy(&matrix);
        let entropy_ci = if n >= p.min_labels_for_entropy_ci && !pairs.is_empty() {
            stats::bootstrap_ci(
                &pairs,
                p.bootstrap_samples,
                p.bootstrap_seed.wrapping_add(1),
                |sample| matrix_entropy(&transition_matrix(sample)),
            )
        } else {
            None
        };

        let hazard = hazard_profile(self.closed.iter().map(|r| r.length), p.max_hazard_age);

        let returns: Vec<Option<f64>> = self.returns.iter().copied().collect();
        let vol_around_flip_ratio = vol_around_flips(&labels, &returns, p.flip_vol_radius);

        // --- Alerts ----------------------------------------------------------
        let mut alerts = Vec::new();
        if flip_density.is_some_and(|fd| fd > p.flip_density_alert) {
            alerts.push(ALERT_FLIP_DENSITY_HIGH.to_string());
        }
        if durations.is_some_and(|d| d.median < p.min_median_duration) {
            alerts.push(ALERT_DURATION_TOO_SHORT.to_string());
        }

        debug!(
            labels = n,
            runs = self.closed.len(),
            flip_density = ?flip_density.map(|v| format!("{:.3}", v)),
            entropy = ?entropy.map(|v| format!("{:.3}", v)),
            alerts = ?alerts,
            "transition snapshot"
        );

        TransitionStats {
            window_bars: n,
            closed_runs: self.closed.len(),
            flip_density,
            flip_density_ci,
            durations,
            median_duration_ci,
            matrix,
            entropy,
            entropy_ci,
            hazard,
            vol_around_flip_ratio,
            alerts,
        }
    }
}

// =============================================================================
// Helpers
// =============================================================================

fn count_flips(labels: &[RegimeLabel]) -> usize {
    labels.windows(2).filter(|w| w[0] != w[1]).count()
}

fn duration_stats(lengths: &[f64]) -> Option<DurationStats> {
    if lengths.is_empty() {
        return None;
    }
    let mut sorted = lengths.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    Some(DurationStats {
        mean: stats::mean(&sorted),
        median: stats::quantile_sorted(&sorted, 0.5),
        p25: stats::quantile_sorted(&sorted, 0.25),
        p75: stats::quantile_sorted(&sorted, 0.75),
    })
}

/// Consecutive (from, to) pairs folded onto the canonical alphabet; pairs
/// touching `uncertain` are skipped.
fn canonical_pairs(labels: &[RegimeLabel]) -> Vec<(RegimeLabel, RegimeLabel)> {
    labels
        .windows(2)
        .filter_map(|w| Some((w[0].canonical()?, w[1].canonical()?)))
        .collect()
}

/// Row-normalised counts; only rows with at least one observation appear.
fn transition_matrix(pairs: &[(RegimeLabel, RegimeLabel)]) -> TransitionMatrix {
    let mut counts: BTreeMap<RegimeLabel, BTreeMap<RegimeLabel, usize>> = BTreeMap::new();
    for &(from, to) in pairs {
        *counts.entry(from).or_default().entry(to).or_default() += 1;
    }

    counts
        .into_iter()
        .map(|(from, row)| {
            let total: usize = row.values().sum();
            let probs = RegimeLabel::CANONICAL
                .iter()
                .map(|to| {
                    let c = row.get(to).copied().unwrap_or(0);
                    (*to, c as f64 / total as f64)
                })
                .collect();
            (from, probs)
        })
        .collect()
}

/// Mean Shannon entropy (natural log) over observed rows.
fn matrix_entropy(matrix: &TransitionMatrix) -> Option<f64> {
    if matrix.is_empty() {
        return None;
    }
    let total: f64 = matrix
        .values()
        .map(|row| {
            -row.values()
                .filter(|&&p| p > 0.0)
                .map(|&p| p * p.ln())
                .sum::<f64>()
        })
        .sum();
    Some((total / matrix.len() as f64).clamp(0.0, 3f64.ln()))
}

/// h(t) = #runs of length t / #runs of length >= t.
fn hazard_profile(lengths: impl Iterator<Item = usize>, max_age: usize) -> BTreeMap<usize, f64> {
    let lengths: Vec<usize> = lengths.collect();
    let mut out = BTreeMap::new();
    for age in 1..=max_age {
        let at_risk = lengths.iter().filter(|&&l| l >= age).count();
        if at_risk == 0 {
            break;
        }
        let ending = lengths.iter().filter(|&&l| l == age).count();
        out.insert(age, ending as f64 / at_risk as f64);
    }
    out
}

/// Mean |return| within `radius` bars of a flip over mean |return| elsewhere.
fn vol_around_flips(labels: &[RegimeLabel], returns: &[Option<f64>], radius: usize) -> Option<f64> {
    let flips: Vec<usize> = (1..labels.len())
        .filter(|&i| labels[i] != labels[i - 1])
        .collect();
    if flips.is_empty() {
        return None;
    }

    let mut near = BTreeSet::new();
    for &f in &flips {
        let lo = f.saturating_sub(radius);
        let hi = (f + radius).min(labels.len() - 1);
        near.extend(lo..=hi);
    }

    let (mut near_sum, mut near_n, mut far_sum, mut far_n) = (0.0, 0usize, 0.0, 0usize);
    for (i, r) in returns.iter().enumerate() {
        let Some(r) = r else { continue };
        if near.contains(&i) {
            near_sum += r.abs();
            near_n += 1;
        } else {
            far_sum += r.abs();
            far_n += 1;
        }
    }
    if near_n == 0 || far_n == 0 {
        return None;
    }
    let far_mean = far_sum / far_n as f64;
    if far_mean <= f64::EPSILON {
        return None;
    }
    Some((near_sum / near_n as f64) / far_mean)
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use RegimeLabel::{MeanReverting as M, Random as R, Trending as T, Uncertain as U};

    fn tracker() -> TransitionTracker {
        TransitionTracker::new(TransitionParams::default())
    }

    #[test]
    fn steady_trend_is_perfectly_stable() {
        let mut t = tracker();
        t.ingest_sequence(&[T; 10]);
        let s = t.snapshot();
        assert_eq!(s.flip_density, Some(0.0));
        assert_eq!(s.durations.unwrap().median, 10.0);
        assert_eq!(s.entropy, Some(0.0));
        assert!(s.alerts.is_empty());
        assert!(s.median_duration_ci.is_none());
        assert!(s.entropy_ci.is_none());
        assert_eq!(s.matrix[&T][&T], 1.0);
    }

    #[test]
    fn alternating_labels_raise_flip_alert() {
        let labels: Vec<RegimeLabel> = [T, R].iter().cycle().take(10).copied().collect();
        let mut t = tracker();
        t.ingest_sequence(&labels);
        let s = t.snapshot();
        assert!((s.flip_density.unwrap() - 0.9).abs() < 1e-12);
        assert!(s.alerts.contains(&ALERT_FLIP_DENSITY_HIGH.to_string()));
        assert!(s.alerts.contains(&ALERT_DURATION_TOO_SHORT.to_string()));
        let (lo, hi) = s.flip_density_ci.unwrap();
        assert!(lo > 0.5 && hi <= 1.0, "ci ({}, {})", lo, hi);
    }

    #[test]
    fn flip_density_matches_index_changes() {
        let labels = [T, T, M, M, M, R, T, T, R, R, R, M];
        let mut t = tracker();
        t.ingest_sequence(&labels);
        let expected = count_flips(&labels) as f64 / labels.len() as f64;
        assert_eq!(t.snapshot().flip_density, Some(expected));
    }

    #[test]
    fn snapshot_is_idempotent() {
        let labels: Vec<RegimeLabel> = (0..120)
            .map(|i| match (i / 3) % 4 {
                0 => T,
                1 => R,
                2 => M,
                _ => T,
            })
            .collect();
        let mut t = tracker();
        t.ingest_sequence(&labels);
        let a = t.snapshot();
        let b = t.snapshot();
        assert_eq!(a, b);
        assert!(a.entropy_ci.is_some());
        assert!(a.median_duration_ci.is_some());
    }

    #[test]
    fn entropy_stays_within_bounds() {
        let labels: Vec<RegimeLabel> = (0..90).map(|i| [T, M, R][(i * 7 + i / 5) % 3]).collect();
        let mut t = tracker();
        t.ingest_sequence(&labels);
        let s = t.snapshot();
        let e = s.entropy.unwrap();
        assert!((0.0..=3f64.ln() + 1e-12).contains(&e));
        let (lo, hi) = s.entropy_ci.unwrap();
        assert!(lo <= hi && hi <= 3f64.ln() + 1e-12);
        for row in s.matrix.values() {
            assert!((row.values().sum::<f64>() - 1.0).abs() < 1e-12);
        }
    }

    #[test]
    fn single_label_has_no_flip_density() {
        let mut t = tracker();
        t.ingest(T, 0);
        let s = t.snapshot();
        assert!(s.flip_density.is_none());
        assert!(s.entropy.is_none());
        assert_eq!(s.durations.unwrap().median, 1.0);
    }

    #[test]
    fn window_is_bounded() {
        let mut t = TransitionTracker::new(TransitionParams {
            window_bars: 5,
            ..TransitionParams::default()
        });
        for i in 0..12 {
            t.ingest(if i < 8 { T } else { M }, i);
        }
        assert_eq!(t.len(), 5);
        let s = t.snapshot();
        // Window holds [T, M, M, M, M].
        assert!((s.flip_density.unwrap() - 0.2).abs() < 1e-12);
        assert_eq!(t.next_index(), 12);
    }

    #[test]
    fn runs_never_outlive_the_window() {
        let mut t = TransitionTracker::new(TransitionParams {
            window_bars: 5,
            ..TransitionParams::default()
        });
        for i in 0..12 {
            t.ingest(if i < 8 { T } else { M }, i);
        }
        let s = t.snapshot();
        assert_eq!(s.window_bars, 5);
        // The trending run is cut to its single windowed bar; the open run has 4.
        assert_eq!(s.closed_runs, 1);
        let d = s.durations.unwrap();
        assert_eq!(d.median, 2.5);
        assert!(d.p75 <= 5.0);
        assert!(s.hazard.keys().all(|&age| age <= 5));
        assert_eq!(s.hazard.get(&1), Some(&1.0));

        // A run longer than the window is clipped while still open.
        let mut t = TransitionTracker::new(TransitionParams {
            window_bars: 5,
            ..TransitionParams::default()
        });
        for i in 0..9 {
            t.ingest(T, i);
        }
        assert_eq!(t.snapshot().durations.unwrap().median, 5.0);

        // Runs that ended before the window are gone entirely.
        t.ingest(M, 9);
        for i in 10..20 {
            t.ingest(R, i);
        }
        let s = t.snapshot();
        assert_eq!(s.closed_runs, 0);
        assert_eq!(s.durations.unwrap().median, 5.0);
    }

    #[test]
    fn ingest_sequence_resets_state() {
        let mut t = tracker();
        t.ingest_sequence(&[T, M, T, M]);
        t.ingest_sequence(&[R, R, R]);
        let s = t.snapshot();
        assert_eq!(s.window_bars, 3);
        assert_eq!(s.closed_runs, 0);
        assert_eq!(s.flip_density, Some(0.0));
    }

    #[test]
    fn volatile_trending_folds_and_uncertain_is_skipped() {
        let mut t = tracker();
        t.ingest_sequence(&[T, RegimeLabel::VolatileTrending, T, U, M]);
        let s = t.snapshot();
        // Pairs: (T,T) (T,T); pairs touching U are dropped.
        assert_eq!(s.matrix.len(), 1);
        assert_eq!(s.matrix[&T][&T], 1.0);
        assert!(!s.matrix.contains_key(&U));
    }

    #[test]
    fn hazard_profile_from_closed_runs() {
        let mut t = tracker();
        // Closed runs of length 1, 2, 2, 3; the trailing run stays open.
        t.ingest_sequence(&[T, M, M, T, T, R, R, R, M]);
        let h = t.snapshot().hazard;
        assert!((h[&1] - 0.25).abs() < 1e-12);
        assert!((h[&2] - 2.0 / 3.0).abs() < 1e-12);
        assert!((h[&3] - 1.0).abs() < 1e-12);
        assert!(!h.contains_key(&4));
    }

    #[test]
    fn flips_coincide_with_larger_moves() {
        let mut t = tracker();
        let labels = [T, T, T, T, T, T, M, M, M, M, M, M, M, T, T, T, T, T];
        for (i, &label) in labels.iter().enumerate() {
            let near_flip = matches!(i, 5..=7 | 12..=14);
            t.ingest_with_return(label, i, if near_flip { 0.03 } else { 0.01 });
        }
        let ratio = t.snapshot().vol_around_flip_ratio.unwrap();
        assert!(ratio > 2.0, "ratio {:.3}", ratio);
    }

    #[test]
    fn vol_ratio_needs_returns() {
        let mut t = tracker();
        t.ingest_sequence(&[T, T, M, M]);
        assert!(t.snapshot().vol_around_flip_ratio.is_none());
    }
}
