//! Watch-rebuild loop.
//!
//! ```text
//! notify watcher → filter (outputs/cache/ignore/temp) → on_change callback
//!                → Debouncer (pure timing) → rebuild
//! ```
//!
//! Events under any output directory or the cache storage root are discarded
//! before anything else sees them, so the loop cannot feed on its own build
//! products. Each surviving event invokes the optional `on_change` callback
//! exactly once and restarts the debounce window; when the window settles
//! one full rebuild runs. Rebuild failures are logged and the loop keeps
//! going.
//!
//! The session runs on a dedicated thread bridged to notify through a sync
//! channel with a capped receive timeout, so a stop request is observed
//! within a bounded interval even when no events arrive.

mod debouncer;

#[cfg(test)]
mod tests;

use anyhow::{Context, Result, bail};
use notify::{RecursiveMode, Watcher};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::RecvTimeoutError;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::diagnostics::ErrorKind;
use crate::log;
use crate::orchestrator::Orchestrator;
use crate::utils::path::{is_within, normalize_path};
use crate::utils::plural_count;

use debouncer::{Debouncer, is_temp_file};

/// Longest interval the loop goes without checking the stop flag.
const STOP_POLL_MS: u64 = 200;

/// What happened to a file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Created,
    Modified,
    Removed,
}

impl ChangeKind {
    pub fn label(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Modified => "modified",
            Self::Removed => "removed",
        }
    }
}

/// Per-event observer, called once for each surviving change.
///
/// A panicking callback is caught and recorded, which needs the unwinding
/// panic runtime; under `panic = "abort"` (the release profile) a panic in
/// the callback still takes the process down.
pub type ChangeCallback = Box<dyn Fn(&Path, ChangeKind) + Send>;

/// Everything a session needs, resolved up front by the orchestrator.
pub struct WatchOptions {
    pub paths: Vec<PathBuf>,
    pub ignore: Vec<PathBuf>,
    pub output_dirs: Vec<PathBuf>,
    pub cache_dir: PathBuf,
    pub debounce: Duration,
    pub on_change: Option<ChangeCallback>,
}

/// Keep only watch paths that exist on disk; error when none do.
pub fn resolve_watch_paths(paths: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let existing: Vec<PathBuf> = paths.iter().filter(|p| p.exists()).cloned().collect();
    if existing.is_empty() {
        bail!("no watch path exists on disk");
    }
    Ok(existing)
}

/// A running watch loop. Stopping is idempotent; after `stop` returns the
/// loop thread has exited and no further rebuild can fire.
pub struct WatchSession {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl WatchSession {
    pub(crate) fn start(orchestrator: Arc<Orchestrator>, options: WatchOptions) -> Result<Self> {
        // Sync channel bridge: notify has no native timeout-receive loop.
        let (tx, rx) = std::sync::mpsc::channel();
        let mut watcher = notify::recommended_watcher(move |res| {
            let _ = tx.send(res);
        })?;

        for path in &options.paths {
            watcher
                .watch(path, RecursiveMode::Recursive)
                .with_context(|| format!("watching {}", path.display()))?;
        }

        log!("watch"; "watching {}", plural_count(options.paths.len(), "path"));

        // Subscription is live: edits made during the initial build queue
        // on the channel and reach the debouncer once the loop starts.
        if let Err(e) = orchestrator.run_all(false) {
            log!("error"; "initial build failed: {:#}", e);
        }

        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&stop);
        let handle = std::thread::Builder::new()
            .name("kiln-watch".into())
            .spawn(move || run_loop(orchestrator, options, watcher, rx, stop_flag))
            .context("spawning watch thread")?;

        Ok(Self {
            stop,
            handle: Some(handle),
        })
    }

    /// Signal the loop and wait for it to exit. Safe to call repeatedly.
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for WatchSession {
    fn drop(&mut self) {
        self.stop();
    }
}

// ============================================================================
// loop
// ============================================================================

fn run_loop(
    orchestrator: Arc<Orchestrator>,
    options: WatchOptions,
    watcher: notify::RecommendedWatcher,
    rx: std::sync::mpsc::Receiver<notify::Result<notify::Event>>,
    stop: Arc<AtomicBool>,
) {
    // The subscription lives exactly as long as the loop.
    let _watcher = watcher;

    let filter = EventFilter::new(&options);
    let mut debouncer = Debouncer::new(options.debounce);
    let on_change = options.on_change;

    while !stop.load(Ordering::SeqCst) {
        let timeout = debouncer
            .sleep_duration()
            .min(Duration::from_millis(STOP_POLL_MS));

        match rx.recv_timeout(timeout) {
            Ok(Ok(event)) => {
                intake(&orchestrator, &event, &filter, &mut debouncer, &on_change);
            }
            Ok(Err(e)) => log!("watch"; "notify error: {}", e),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }

        if stop.load(Ordering::SeqCst) {
            break;
        }

        if let Some(changes) = debouncer.take_if_ready() {
            // Drop memoized hashes so the rebuild fingerprints fresh bytes.
            for path in changes.keys() {
                crate::fingerprint::invalidate_hash(path);
            }
            log!("watch"; "{} changed, rebuilding", plural_count(changes.len(), "file"));
            orchestrator.rebuild_for_watch();
        }
    }
}

/// Feed one raw notify event through filtering, the callback and the
/// debouncer. A panicking callback is caught and logged; it neither kills
/// the loop nor disturbs debouncing.
fn intake(
    orchestrator: &Orchestrator,
    event: &notify::Event,
    filter: &EventFilter,
    debouncer: &mut Debouncer,
    on_change: &Option<ChangeCallback>,
) {
    let Some(kind) = change_kind(event) else {
        return;
    };

    for path in &event.paths {
        if is_temp_file(path) || filter.is_filtered(path) {
            continue;
        }

        if let Some(callback) = on_change
            && catch_unwind(AssertUnwindSafe(|| callback(path, kind))).is_err()
        {
            let msg = format!("change callback panicked for {}", path.display());
            log!("error"; "{}", msg);
            orchestrator.errors().record(ErrorKind::Watch, msg, None);
        }

        debouncer.record(path, kind);
    }
}

/// Map a notify event to a change kind. Metadata-only modifications
/// (mtime/atime/chmod noise) and everything non-structural map to `None`.
fn change_kind(event: &notify::Event) -> Option<ChangeKind> {
    use notify::EventKind;

    match event.kind {
        EventKind::Create(_) => Some(ChangeKind::Created),
        EventKind::Remove(_) => Some(ChangeKind::Removed),
        EventKind::Modify(modify) => {
            if matches!(modify, notify::event::ModifyKind::Metadata(_)) {
                None
            } else {
                Some(ChangeKind::Modified)
            }
        }
        _ => None,
    }
}

/// Discards events under build products and ignored paths.
struct EventFilter {
    excluded: Vec<PathBuf>,
}

impl EventFilter {
    fn new(options: &WatchOptions) -> Self {
        let mut excluded: Vec<PathBuf> = options
            .output_dirs
            .iter()
            .chain(std::iter::once(&options.cache_dir))
            .chain(options.ignore.iter())
            .map(|p| normalize_path(p))
            .collect();
        excluded.sort();
        excluded.dedup();
        Self { excluded }
    }

    fn is_filtered(&self, path: &Path) -> bool {
        let path = normalize_path(path);
        self.excluded.iter().any(|dir| is_within(&path, dir))
    }
}
