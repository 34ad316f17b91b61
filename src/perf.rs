//! Per-task stage timing and cross-task merging.
//!
//! Each pipeline run owns a [`PerfLedger`] that maps executed stages to their
//! wall-clock duration. Stages that did not run are simply absent from the
//! map, never recorded as zero. The orchestrator merges ledgers of
//! concurrently scheduled tasks by taking the per-stage maximum: overlapping
//! tasks contribute to elapsed time through the slowest task reaching a
//! stage, not through the sum.

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A named phase within one build task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Clean,
    CacheCheck,
    Build,
    Assets,
    Html,
    Css,
}

impl Stage {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Clean => "clean",
            Self::CacheCheck => "cache_check",
            Self::Build => "build",
            Self::Assets => "assets",
            Self::Html => "html",
            Self::Css => "css",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stage durations plus a total figure for one task, or merged across tasks.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PerfLedger {
    /// Executed stage -> duration in milliseconds. Skipped stages are absent.
    stages: FxHashMap<Stage, u64>,
    /// Total duration in milliseconds.
    total_ms: u64,
}

impl PerfLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the duration of an executed stage.
    pub fn record(&mut self, stage: Stage, ms: u64) {
        self.stages.insert(stage, ms);
    }

    /// Set the task's total duration.
    pub fn set_total(&mut self, ms: u64) {
        self.total_ms = ms;
    }

    /// Duration of a stage, if it ran.
    pub fn stage(&self, stage: Stage) -> Option<u64> {
        self.stages.get(&stage).copied()
    }

    /// Total duration in milliseconds.
    pub fn total_ms(&self) -> u64 {
        self.total_ms
    }

    /// Iterate over recorded stages.
    pub fn stages(&self) -> impl Iterator<Item = (Stage, u64)> + '_ {
        self.stages.iter().map(|(s, ms)| (*s, *ms))
    }

    /// The single stage that consumed more than half of the total, if any.
    /// Ties in merged ledgers resolve to the largest stage.
    pub fn dominant_stage(&self) -> Option<(Stage, u64)> {
        self.stages()
            .filter(|(_, ms)| self.total_ms > 0 && *ms * 2 > self.total_ms)
            .max_by_key(|(_, ms)| *ms)
    }

    /// Merge ledgers of concurrently scheduled tasks.
    ///
    /// Per stage name the maximum duration reported by any task wins; the
    /// merged total is the maximum of the tasks' own totals. This bounds the
    /// stage's contribution to wall-clock time by the slowest overlapping
    /// task, an approximation of true critical-path timing.
    pub fn merge_max<'a>(ledgers: impl IntoIterator<Item = &'a PerfLedger>) -> Self {
        let mut merged = Self::new();
        for ledger in ledgers {
            for (stage, ms) in ledger.stages() {
                let slot = merged.stages.entry(stage).or_insert(0);
                *slot = (*slot).max(ms);
            }
            merged.total_ms = merged.total_ms.max(ledger.total_ms);
        }
        merged
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ledger(pairs: &[(Stage, u64)], total: u64) -> PerfLedger {
        let mut l = PerfLedger::new();
        for (stage, ms) in pairs {
            l.record(*stage, *ms);
        }
        l.set_total(total);
        l
    }

    #[test]
    fn test_skipped_stages_absent() {
        let l = ledger(&[(Stage::Build, 120)], 120);
        assert_eq!(l.stage(Stage::Build), Some(120));
        assert_eq!(l.stage(Stage::Html), None);
    }

    #[test]
    fn test_merge_takes_per_stage_max() {
        // Server reports build=2000 total=2000, client build=3000 total=3000.
        // Merged ledger is build=3000 total=3000 (max-merge, not sum).
        let server = ledger(&[(Stage::Build, 2000)], 2000);
        let client = ledger(&[(Stage::Build, 3000)], 3000);

        let merged = PerfLedger::merge_max([&server, &client]);
        assert_eq!(merged.stage(Stage::Build), Some(3000));
        assert_eq!(merged.total_ms(), 3000);
    }

    #[test]
    fn test_merge_preserves_disjoint_stages() {
        let a = ledger(&[(Stage::Build, 100), (Stage::Html, 40)], 150);
        let b = ledger(&[(Stage::Build, 80), (Stage::Css, 60)], 140);

        let merged = PerfLedger::merge_max([&a, &b]);
        assert_eq!(merged.stage(Stage::Build), Some(100));
        assert_eq!(merged.stage(Stage::Html), Some(40));
        assert_eq!(merged.stage(Stage::Css), Some(60));
        assert_eq!(merged.total_ms(), 150);
    }

    #[test]
    fn test_dominant_stage() {
        let l = ledger(&[(Stage::Build, 3200), (Stage::Css, 400)], 4000);
        assert_eq!(l.dominant_stage(), Some((Stage::Build, 3200)));

        let balanced = ledger(&[(Stage::Build, 2000), (Stage::Css, 2000)], 4000);
        assert_eq!(balanced.dominant_stage(), None);
    }
}
