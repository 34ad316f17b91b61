//! Bounded error and warning bookkeeping.
//!
//! One [`ErrorLedger`] lives for the lifetime of a build-tool instance and is
//! shared by every pipeline run. It tracks total error/warning counts, a
//! per-kind frequency map and a capped history of the most recent error
//! records. The ledger is an owned value passed explicitly into the
//! components that can fail — there is no module-level state.
//!
//! Every mutation takes the lock exactly once, so concurrently scheduled
//! tasks never observe a half-applied update (counter bumped but record not
//! yet appended).

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt::Write as _;

/// Maximum number of retained error records.
pub const MAX_RECENT: usize = 50;

/// Broad classification for recorded errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorKind {
    Config,
    Compile,
    Validation,
    Cache,
    Watch,
    Other,
}

impl ErrorKind {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Config => "config",
            Self::Compile => "compile",
            Self::Validation => "validation",
            Self::Cache => "cache",
            Self::Watch => "watch",
            Self::Other => "other",
        }
    }
}

/// One recorded error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub kind: ErrorKind,
    pub message: String,
    /// Unix timestamp in seconds.
    pub timestamp: u64,
    pub trace: Option<String>,
}

/// Immutable snapshot of the ledger state.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ErrorStats {
    pub errors: u64,
    pub warnings: u64,
    pub by_kind: FxHashMap<ErrorKind, u64>,
    pub recent: Vec<ErrorRecord>,
}

#[derive(Default)]
struct LedgerInner {
    errors: u64,
    warnings: u64,
    by_kind: FxHashMap<ErrorKind, u64>,
    recent: VecDeque<ErrorRecord>,
}

/// Shared, capacity-bounded error ledger.
#[derive(Default)]
pub struct ErrorLedger {
    inner: Mutex<LedgerInner>,
}

impl ErrorLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an error: bumps the total, the per-kind frequency, and appends
    /// to the bounded history (FIFO eviction past [`MAX_RECENT`]).
    pub fn record(&self, kind: ErrorKind, message: impl Into<String>, trace: Option<String>) {
        let record = ErrorRecord {
            kind,
            message: message.into(),
            timestamp: now(),
            trace,
        };

        let mut inner = self.inner.lock();
        inner.errors += 1;
        *inner.by_kind.entry(kind).or_insert(0) += 1;
        inner.recent.push_back(record);
        while inner.recent.len() > MAX_RECENT {
            inner.recent.pop_front();
        }
    }

    /// Record a warning: bumps only the warning counter.
    pub fn record_warning(&self) {
        self.inner.lock().warnings += 1;
    }

    /// Immutable copy of the current state.
    pub fn snapshot(&self) -> ErrorStats {
        let inner = self.inner.lock();
        ErrorStats {
            errors: inner.errors,
            warnings: inner.warnings,
            by_kind: inner.by_kind.clone(),
            recent: inner.recent.iter().cloned().collect(),
        }
    }

    /// Zero all counters and clear history.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        *inner = LedgerInner::default();
    }

    /// Human-readable report over the current snapshot.
    pub fn report(&self) -> String {
        let stats = self.snapshot();
        let mut out = String::new();

        let _ = writeln!(
            out,
            "errors: {}  warnings: {}",
            stats.errors, stats.warnings
        );

        if !stats.by_kind.is_empty() {
            let mut kinds: Vec<_> = stats.by_kind.iter().collect();
            kinds.sort_by_key(|(kind, _)| kind.label());
            let _ = writeln!(out, "by kind:");
            for (kind, count) in kinds {
                let _ = writeln!(out, "  {}: {}", kind.label(), count);
            }
        }

        if !stats.recent.is_empty() {
            let _ = writeln!(out, "recent:");
            for record in stats.recent.iter().rev().take(10) {
                let _ = writeln!(out, "  [{}] {}", record.kind.label(), record.message);
            }
        }

        out
    }
}

fn now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
