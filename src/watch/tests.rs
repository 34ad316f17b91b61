use super::debouncer::{Debouncer, is_temp_file};
use super::*;
use crate::compiler::{BuildOptions, Compiler, CompileOutput};
use crate::config::{CacheConfig, Config, PipelineConfig, WatchConfig};
use anyhow::Result;
use parking_lot::Mutex;
use std::fs;
use std::sync::atomic::AtomicUsize;
use std::time::Instant;
use tempfile::TempDir;

// ============================================================================
// debouncer
// ============================================================================

fn win(ms: u64) -> Duration {
    Duration::from_millis(ms)
}

#[test]
fn test_debouncer_not_ready_inside_window() {
    let mut d = Debouncer::new(win(100));
    d.record(Path::new("/p/src/a.ts"), ChangeKind::Modified);
    assert!(!d.is_ready());
    assert!(d.take_if_ready().is_none());
}

#[test]
fn test_debouncer_ready_after_window() {
    let mut d = Debouncer::new(win(10));
    d.record(Path::new("/p/src/a.ts"), ChangeKind::Modified);
    std::thread::sleep(win(30));
    assert!(d.is_ready());

    let changes = d.take_if_ready().unwrap();
    assert_eq!(changes.len(), 1);
    // Window consumed; nothing pending.
    assert!(d.take_if_ready().is_none());
}

#[test]
fn test_debouncer_event_restarts_window() {
    let mut d = Debouncer::new(win(50));
    d.record(Path::new("/p/src/a.ts"), ChangeKind::Modified);
    std::thread::sleep(win(30));
    // Same path again: still one pending change, but the window restarts.
    d.record(Path::new("/p/src/a.ts"), ChangeKind::Modified);
    std::thread::sleep(win(30));
    assert!(!d.is_ready());
    std::thread::sleep(win(30));
    assert!(d.is_ready());
}

#[test]
fn test_debouncer_coalesces_burst_to_one_batch() {
    let mut d = Debouncer::new(win(10));
    for _ in 0..5 {
        d.record(Path::new("/p/src/a.ts"), ChangeKind::Modified);
    }
    d.record(Path::new("/p/src/b.ts"), ChangeKind::Modified);
    std::thread::sleep(win(30));

    let changes = d.take_if_ready().unwrap();
    assert_eq!(changes.len(), 2);
}

#[test]
fn test_debouncer_created_then_removed_discards() {
    let mut d = Debouncer::new(win(10));
    d.record(Path::new("/p/src/new.ts"), ChangeKind::Created);
    d.record(Path::new("/p/src/new.ts"), ChangeKind::Removed);
    std::thread::sleep(win(30));
    // Appeared and vanished within one window: nothing to rebuild for.
    assert!(d.take_if_ready().is_none());
}

#[test]
fn test_debouncer_modified_then_removed_upgrades() {
    let mut d = Debouncer::new(win(10));
    let path = Path::new("/p/src/a.ts");
    d.record(path, ChangeKind::Modified);
    d.record(path, ChangeKind::Removed);
    std::thread::sleep(win(30));

    let changes = d.take_if_ready().unwrap();
    assert_eq!(changes.values().next(), Some(&ChangeKind::Removed));
}

#[test]
fn test_debouncer_removed_then_created_restores() {
    let mut d = Debouncer::new(win(10));
    let path = Path::new("/p/src/a.ts");
    d.record(path, ChangeKind::Removed);
    d.record(path, ChangeKind::Created);
    std::thread::sleep(win(30));

    let changes = d.take_if_ready().unwrap();
    assert_eq!(changes.values().next(), Some(&ChangeKind::Created));
}

#[test]
fn test_is_temp_file() {
    assert!(is_temp_file(Path::new("/p/src/a.ts.swp")));
    assert!(is_temp_file(Path::new("/p/src/a.ts~")));
    assert!(is_temp_file(Path::new("/p/src/.hidden.ts")));
    assert!(is_temp_file(Path::new("/p/src/a.tmp")));
    assert!(!is_temp_file(Path::new("/p/src/a.ts")));
}

// ============================================================================
// event filter
// ============================================================================

fn filter_options(root: &Path) -> WatchOptions {
    WatchOptions {
        paths: vec![root.join("src")],
        ignore: vec![root.join("node_modules")],
        output_dirs: vec![root.join("dist")],
        cache_dir: root.join(".kiln-cache"),
        debounce: win(100),
        on_change: None,
    }
}

#[test]
fn test_filter_discards_build_products() {
    let dir = TempDir::new().unwrap();
    let root = dir.path();
    let filter = EventFilter::new(&filter_options(root));

    assert!(filter.is_filtered(&root.join("dist/app.js")));
    assert!(filter.is_filtered(&root.join("dist/nested/chunk.js")));
    assert!(filter.is_filtered(&root.join(".kiln-cache/index.json")));
    assert!(filter.is_filtered(&root.join("node_modules/pkg/index.js")));
    assert!(!filter.is_filtered(&root.join("src/app.ts")));
    assert!(!filter.is_filtered(&root.join("distant/file.ts")));
}

#[test]
fn test_change_kind_ignores_metadata_modify() {
    use notify::event::{EventKind, MetadataKind, ModifyKind};

    let meta = notify::Event::new(EventKind::Modify(ModifyKind::Metadata(MetadataKind::Any)));
    assert_eq!(change_kind(&meta), None);

    let access = notify::Event::new(EventKind::Access(notify::event::AccessKind::Any));
    assert_eq!(change_kind(&access), None);

    let create = notify::Event::new(EventKind::Create(notify::event::CreateKind::File));
    assert_eq!(change_kind(&create), Some(ChangeKind::Created));
}

// ============================================================================
// session integration
// ============================================================================

struct CountingCompiler {
    output: PathBuf,
    calls: AtomicUsize,
    /// Source file the first compile rewrites, standing in for an editor
    /// save that lands while the initial build is still running.
    touch_on_first: Option<PathBuf>,
}

impl Compiler for CountingCompiler {
    fn compile(
        &self,
        _task: &str,
        entries: &[PathBuf],
        _options: &BuildOptions,
    ) -> Result<CompileOutput> {
        let n = self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        if n == 0
            && let Some(path) = &self.touch_on_first
        {
            fs::write(path, "export const v = 7;")?;
        }
        fs::create_dir_all(self.output.parent().unwrap())?;
        let source = fs::read_to_string(&entries[0]).unwrap_or_default();
        fs::write(&self.output, format!("// build {n}: {source}"))?;
        Ok(CompileOutput {
            output_paths: vec![self.output.clone()],
            manifest: None,
            duration: Duration::from_millis(1),
        })
    }
}

fn setup(dir: &TempDir, debounce_ms: u64) -> (Arc<Orchestrator>, Arc<CountingCompiler>, PathBuf) {
    setup_with(dir, debounce_ms, None)
}

fn setup_with(
    dir: &TempDir,
    debounce_ms: u64,
    touch_on_first: Option<&str>,
) -> (Arc<Orchestrator>, Arc<CountingCompiler>, PathBuf) {
    let root = dir.path();
    let entry = root.join("src/app.ts");
    fs::create_dir_all(entry.parent().unwrap()).unwrap();
    fs::write(&entry, "export const v = 0;").unwrap();

    let config = Config {
        root: root.to_path_buf(),
        client: Some(PipelineConfig {
            entry: vec![entry.clone()],
            outdir: root.join("dist"),
            outputs: Vec::new(),
            command: vec!["bundler".into()],
            metafile: None,
            options: BuildOptions::default(),
            cache: true,
        }),
        cache: CacheConfig {
            dir: root.join(".kiln-cache"),
            ..Default::default()
        },
        // Watch the whole project root: build products land inside the
        // watched tree, so event filtering is what prevents feedback.
        watch: WatchConfig {
            paths: vec![root.to_path_buf()],
            ignore: Vec::new(),
            debounce_ms,
        },
        ..Default::default()
    };

    let compiler = Arc::new(CountingCompiler {
        output: root.join("dist/app.js"),
        calls: AtomicUsize::new(0),
        touch_on_first: touch_on_first.map(|rel| root.join(rel)),
    });
    let orchestrator = Arc::new(Orchestrator::new(config, compiler.clone()));
    (orchestrator, compiler, entry)
}

fn compile_count(compiler: &CountingCompiler) -> usize {
    compiler.calls.load(std::sync::atomic::Ordering::SeqCst)
}

/// Poll until the compile count reaches `expected` or the deadline passes.
fn wait_for_compiles(compiler: &CountingCompiler, expected: usize, deadline: Duration) -> bool {
    let start = Instant::now();
    while start.elapsed() < deadline {
        if compile_count(compiler) >= expected {
            return true;
        }
        std::thread::sleep(Duration::from_millis(25));
    }
    compile_count(compiler) >= expected
}

#[test]
fn test_watch_burst_rebuilds_once() {
    let dir = TempDir::new().unwrap();
    let (orchestrator, compiler, entry) = setup(&dir, 100);

    orchestrator.watch(None).unwrap();
    assert!(orchestrator.is_watching());
    // Initial synchronous build.
    assert_eq!(compile_count(&compiler), 1);

    for i in 1..=3 {
        fs::write(&entry, format!("export const v = {i};")).unwrap();
        std::thread::sleep(Duration::from_millis(20));
    }

    // The burst coalesces into exactly one rebuild.
    assert!(wait_for_compiles(&compiler, 2, Duration::from_secs(5)));
    std::thread::sleep(Duration::from_millis(300));
    assert_eq!(compile_count(&compiler), 2);

    orchestrator.stop_watch();
}

#[test]
fn test_edit_during_initial_build_triggers_rebuild() {
    let dir = TempDir::new().unwrap();
    // The first compile rewrites its own entry file. The subscription is
    // already open at that point, so the change must not be lost: one
    // rebuild follows once the loop drains the queued event.
    let (orchestrator, compiler, _entry) = setup_with(&dir, 50, Some("src/app.ts"));

    orchestrator.watch(None).unwrap();
    assert!(wait_for_compiles(&compiler, 2, Duration::from_secs(5)));

    // The second compile leaves the entry alone, so the count settles.
    std::thread::sleep(Duration::from_millis(300));
    assert_eq!(compile_count(&compiler), 2);

    orchestrator.stop_watch();
}

#[test]
fn test_watch_ignores_output_and_cache_events() {
    let dir = TempDir::new().unwrap();
    let (orchestrator, compiler, _entry) = setup(&dir, 50);

    orchestrator.watch(None).unwrap();
    assert_eq!(compile_count(&compiler), 1);

    // Touch build products directly: must not trigger a rebuild.
    fs::write(dir.path().join("dist/injected.js"), "x").unwrap();
    fs::write(dir.path().join(".kiln-cache/scratch"), "x").unwrap();

    std::thread::sleep(Duration::from_millis(800));
    assert_eq!(compile_count(&compiler), 1);

    orchestrator.stop_watch();
}

#[test]
fn test_watch_callback_sees_surviving_events() {
    let dir = TempDir::new().unwrap();
    let (orchestrator, _compiler, entry) = setup(&dir, 50);

    let seen: Arc<Mutex<Vec<(PathBuf, ChangeKind)>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let callback: ChangeCallback = Box::new(move |path, kind| {
        sink.lock().push((path.to_path_buf(), kind));
    });

    orchestrator.watch(Some(callback)).unwrap();
    fs::write(&entry, "export const v = 1;").unwrap();

    let start = Instant::now();
    while start.elapsed() < Duration::from_secs(5) && seen.lock().is_empty() {
        std::thread::sleep(Duration::from_millis(25));
    }

    let seen = seen.lock();
    assert!(!seen.is_empty());
    assert!(seen.iter().all(|(path, _)| path.ends_with("app.ts")));

    drop(seen);
    orchestrator.stop_watch();
}

#[test]
fn test_watch_panicking_callback_is_contained() {
    let dir = TempDir::new().unwrap();
    let (orchestrator, compiler, entry) = setup(&dir, 50);

    let callback: ChangeCallback = Box::new(|_, _| panic!("observer bug"));
    orchestrator.watch(Some(callback)).unwrap();

    fs::write(&entry, "export const v = 1;").unwrap();

    // The rebuild still happens and the panic lands in the ledger.
    assert!(wait_for_compiles(&compiler, 2, Duration::from_secs(5)));
    let stats = orchestrator.error_stats();
    assert!(stats.by_kind.contains_key(&crate::diagnostics::ErrorKind::Watch));

    orchestrator.stop_watch();
}

#[test]
fn test_watch_twice_fails() {
    let dir = TempDir::new().unwrap();
    let (orchestrator, _compiler, _entry) = setup(&dir, 50);

    orchestrator.watch(None).unwrap();
    assert!(orchestrator.watch(None).is_err());
    orchestrator.stop_watch();
}

#[test]
fn test_stop_is_idempotent_and_final() {
    let dir = TempDir::new().unwrap();
    let (orchestrator, compiler, entry) = setup(&dir, 50);

    orchestrator.watch(None).unwrap();
    orchestrator.stop_watch();
    assert!(!orchestrator.is_watching());
    orchestrator.stop_watch();

    // After stop returns no rebuild can fire.
    fs::write(&entry, "export const v = 9;").unwrap();
    std::thread::sleep(Duration::from_millis(600));
    assert_eq!(compile_count(&compiler), 1);

    // A fresh session can start again.
    orchestrator.watch(None).unwrap();
    orchestrator.stop_watch();
}

#[test]
fn test_resolve_watch_paths_requires_existing() {
    let dir = TempDir::new().unwrap();
    let missing = dir.path().join("nope");
    assert!(resolve_watch_paths(&[missing.clone()]).is_err());

    let src = dir.path().join("src");
    fs::create_dir_all(&src).unwrap();
    let resolved = resolve_watch_paths(&[src.clone(), missing]).unwrap();
    assert_eq!(resolved, vec![src]);
}
