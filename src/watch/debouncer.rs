use std::path::Path;
use std::time::Duration;

use rustc_hash::FxHashMap;

use super::ChangeKind;
use crate::utils::path::normalize_path;

pub(super) const REBUILD_COOLDOWN_MS: u64 = 800;

/// Pure debouncer: only handles timing and event deduplication.
/// No business logic, no global state access.
pub(super) struct Debouncer {
    /// Path → ChangeKind (dedup is free via HashMap key uniqueness)
    pub(super) changes: FxHashMap<std::path::PathBuf, ChangeKind>,
    pub(super) last_event: Option<std::time::Instant>,
    pub(super) last_rebuild: Option<std::time::Instant>,
    window: Duration,
}

impl Debouncer {
    pub(super) fn new(window: Duration) -> Self {
        Self {
            changes: FxHashMap::default(),
            last_event: None,
            last_rebuild: None,
            window,
        }
    }

    /// Record a surviving change, applying dedup rules:
    /// - Removed + Created/Modified → restored, use the new event
    /// - Modified + Removed → deleted, upgrade to Removed
    /// - Created + Removed → appeared then vanished, discard (no-op)
    /// - same kind: first event wins
    ///
    /// Every call restarts the debounce window, whether or not the
    /// recorded kind changed.
    pub(super) fn record(&mut self, path: &Path, kind: ChangeKind) {
        let path = normalize_path(path);

        if let Some(&existing) = self.changes.get(&path) {
            match (existing, kind) {
                (ChangeKind::Removed, ChangeKind::Created | ChangeKind::Modified) => {
                    crate::debug!("watch"; "restore {}->{}: {}", existing.label(), kind.label(), path.display());
                    self.changes.insert(path, kind);
                }
                (ChangeKind::Modified, ChangeKind::Removed) => {
                    crate::debug!("watch"; "upgrade modified->removed: {}", path.display());
                    self.changes.insert(path, ChangeKind::Removed);
                }
                (ChangeKind::Created, ChangeKind::Removed) => {
                    crate::debug!("watch"; "discard created+removed: {}", path.display());
                    self.changes.remove(&path);
                }
                _ => {}
            }
        } else {
            crate::debug!("watch"; "event {}: {}", kind.label(), path.display());
            self.changes.insert(path, kind);
        }

        self.last_event = Some(std::time::Instant::now());
    }

    /// Take the pending changes if debounce + cooldown elapsed.
    pub(super) fn take_if_ready(&mut self) -> Option<FxHashMap<std::path::PathBuf, ChangeKind>> {
        if !self.is_ready() {
            return None;
        }

        let changes = std::mem::take(&mut self.changes);
        self.last_event = None;

        if changes.is_empty() {
            return None;
        }

        self.last_rebuild = Some(std::time::Instant::now());
        Some(changes)
    }

    pub(super) fn is_ready(&self) -> bool {
        let Some(last_event) = self.last_event else {
            return false;
        };

        if last_event.elapsed() < self.window {
            return false;
        }

        if let Some(last_rebuild) = self.last_rebuild
            && last_rebuild.elapsed() < Duration::from_millis(REBUILD_COOLDOWN_MS)
        {
            return false;
        }

        !self.changes.is_empty()
    }

    /// Precise sleep duration until next possible ready time.
    pub(super) fn sleep_duration(&self) -> Duration {
        let Some(last_event) = self.last_event else {
            return Duration::from_secs(86400);
        };

        let debounce_remaining = self.window.saturating_sub(last_event.elapsed());

        let cooldown_remaining = self
            .last_rebuild
            .map(|t| Duration::from_millis(REBUILD_COOLDOWN_MS).saturating_sub(t.elapsed()))
            .unwrap_or(Duration::ZERO);

        debounce_remaining
            .max(cooldown_remaining)
            .max(Duration::from_millis(1))
    }
}

/// Check if path is a temp/backup file (editor artifacts).
pub(super) fn is_temp_file(path: &Path) -> bool {
    let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");

    matches!(ext, "bck" | "bak" | "backup" | "swp" | "swo" | "tmp")
        || name.ends_with('~')
        || name.starts_with('.')
}
