//! Schedules pipelines and merges their results.
//!
//! The [`Orchestrator`] owns everything a build needs: the loaded config,
//! the build cache, the error ledger, the compile collaborator and any
//! post-processors. Configured pipelines run concurrently; their timing
//! ledgers merge by per-stage maximum, their output lists concatenate.
//! One failing task fails the whole call, there is no partial aggregation.
//!
//! A build-in-progress lock serializes overlapping build calls, so a watch
//! rebuild and a manual build can never interleave stages.

use anyhow::{Result, bail};
use parking_lot::Mutex;
use rayon::prelude::*;
use rustc_hash::FxHashMap;
use std::path::PathBuf;
use std::sync::Arc;

use crate::cache::BuildCache;
use crate::compiler::{Compiler, DependencyManifest, PostProcessor};
use crate::config::{Config, EntryGroup};
use crate::diagnostics::{ErrorLedger, ErrorStats};
use crate::log;
use crate::perf::PerfLedger;
use crate::pipeline::{BuildTask, PipelineRunner, TaskKind, TaskResult};
use crate::watch::{ChangeCallback, WatchOptions, WatchSession, resolve_watch_paths};

/// The dominant-stage hint is only added above this total.
const DOMINANT_HINT_MIN_TOTAL_MS: u64 = 3000;

/// Merged outcome of one build call.
#[derive(Debug)]
pub struct BuildSummary {
    pub results: Vec<TaskResult>,
    /// Concatenated output lists of all tasks, in task order.
    pub output_files: Vec<PathBuf>,
    /// First task's dependency manifest; later tasks' manifests remain
    /// available on their individual results.
    pub manifest: Option<DependencyManifest>,
    /// Per-stage max-merged ledger across tasks.
    pub perf: PerfLedger,
    pub cache_hits: usize,
}

pub struct Orchestrator {
    config: Config,
    cache: BuildCache,
    errors: ErrorLedger,
    compiler: Arc<dyn Compiler>,
    processors: Vec<Box<dyn PostProcessor>>,
    build_lock: Mutex<()>,
    watch_session: Mutex<Option<WatchSession>>,
}

impl Orchestrator {
    pub fn new(config: Config, compiler: Arc<dyn Compiler>) -> Self {
        let cache = BuildCache::open(config.cache_dir(), config.cache.enable);
        Self {
            config,
            cache,
            errors: ErrorLedger::new(),
            compiler,
            processors: Vec::new(),
            build_lock: Mutex::new(()),
            watch_session: Mutex::new(None),
        }
    }

    pub fn with_processors(mut self, processors: Vec<Box<dyn PostProcessor>>) -> Self {
        self.processors = processors;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn cache(&self) -> &BuildCache {
        &self.cache
    }

    pub fn errors(&self) -> &ErrorLedger {
        &self.errors
    }

    fn runner(&self) -> PipelineRunner<'_> {
        PipelineRunner {
            compiler: &*self.compiler,
            processors: &self.processors,
            cache: &self.cache,
            errors: &self.errors,
        }
    }

    fn task(&self, kind: TaskKind, clean: bool) -> Result<BuildTask> {
        let config = match kind {
            TaskKind::Server => &self.config.server,
            TaskKind::Client => &self.config.client,
        };
        match config {
            Some(c) => Ok(BuildTask::from_config(kind, c, clean)),
            None => bail!("no [{}] pipeline configured", kind),
        }
    }

    // ========================================================================
    // build operations
    // ========================================================================

    /// Build a single configured pipeline.
    pub fn run_one(&self, kind: TaskKind, clean: bool) -> Result<TaskResult> {
        let task = self.task(kind, clean)?;
        let _guard = self.build_lock.lock();
        let result = self.runner().run(&task)?;
        self.advise_slow(&result.perf);
        Ok(result)
    }

    /// Build every configured pipeline concurrently.
    pub fn run_all(&self, clean: bool) -> Result<BuildSummary> {
        let mut tasks: Vec<BuildTask> = Vec::new();
        if let Some(server) = &self.config.server {
            tasks.push(BuildTask::from_config(TaskKind::Server, server, clean));
        }
        if let Some(client) = &self.config.client {
            tasks.push(BuildTask::from_config(TaskKind::Client, client, clean));
        }
        if tasks.is_empty() {
            bail!("no pipeline configured");
        }

        let _guard = self.build_lock.lock();
        preclean_shared(&mut tasks)?;
        let runner = self.runner();

        let results = if tasks.len() == 2 {
            let (server_res, client_res) =
                rayon::join(|| runner.run(&tasks[0]), || runner.run(&tasks[1]));
            vec![server_res?, client_res?]
        } else {
            vec![runner.run(&tasks[0])?]
        };

        Ok(self.summarize(results))
    }

    /// Build one client pipeline per named entry group, concurrently.
    ///
    /// Each group clones the client pipeline settings with its own entries.
    pub fn run_multi_entry(&self, groups: &[EntryGroup], clean: bool) -> Result<BuildSummary> {
        let Some(client) = &self.config.client else {
            bail!("multi-entry builds require a [client] pipeline");
        };
        if groups.is_empty() {
            bail!("no entry groups given");
        }

        let mut tasks: Vec<BuildTask> = groups
            .iter()
            .map(|g| BuildTask::from_entry_group(client, g, clean))
            .collect();

        let _guard = self.build_lock.lock();
        preclean_shared(&mut tasks)?;
        let runner = self.runner();

        let results: Result<Vec<TaskResult>> =
            tasks.par_iter().map(|task| runner.run(task)).collect();

        Ok(self.summarize(results?))
    }

    fn summarize(&self, results: Vec<TaskResult>) -> BuildSummary {
        let perf = PerfLedger::merge_max(results.iter().map(|r| &r.perf));
        self.advise_slow(&perf);

        let output_files = results
            .iter()
            .flat_map(|r| r.output_files.iter().cloned())
            .collect();
        let manifest = results.first().and_then(|r| r.manifest.clone());
        let cache_hits = results.iter().filter(|r| r.cache_hit).count();

        BuildSummary {
            results,
            output_files,
            manifest,
            perf,
            cache_hits,
        }
    }

    /// Slow-build advisory against the merged ledger.
    fn advise_slow(&self, perf: &PerfLedger) {
        let total = perf.total_ms();
        if total <= self.config.slow_build_ms {
            return;
        }

        if total > DOMINANT_HINT_MIN_TOTAL_MS
            && let Some((stage, ms)) = perf.dominant_stage()
        {
            log!(
                "warning";
                "slow build: {}ms total, dominated by {} ({}ms)",
                total, stage, ms
            );
        } else {
            log!("warning"; "slow build: {}ms total", total);
        }
        self.errors.record_warning();
    }

    /// Remove and recreate every configured output directory.
    pub fn clean(&self) -> Result<()> {
        for dir in self.config.output_dirs() {
            crate::pipeline::clean_dir(&dir)?;
            log!("info"; "cleaned {}", dir.display());
        }
        Ok(())
    }

    // ========================================================================
    // watch
    // ========================================================================

    /// Start watch mode: subscribe, run one synchronous full build, then
    /// rebuild on change. The subscription opens before the initial build,
    /// so edits made while it runs are queued and picked up by the loop.
    ///
    /// Fails when a session is already running or no watch path exists on
    /// disk. The initial build's failure is logged, not fatal; the session
    /// still starts so the first fix triggers a rebuild.
    pub fn watch(self: &Arc<Self>, on_change: Option<ChangeCallback>) -> Result<()> {
        let mut session = self.watch_session.lock();
        if session.is_some() {
            bail!("watch already running");
        }

        let paths = resolve_watch_paths(&self.config.watch.paths)?;

        let options = WatchOptions {
            paths,
            ignore: self.config.watch.ignore.clone(),
            output_dirs: self.config.output_dirs(),
            cache_dir: self.cache.dir().to_path_buf(),
            debounce: std::time::Duration::from_millis(self.config.watch.debounce_ms),
            on_change,
        };

        *session = Some(WatchSession::start(Arc::clone(self), options)?);
        Ok(())
    }

    /// Stop watch mode. Idempotent; safe before `watch` ever ran. After this
    /// returns, no further rebuild can fire.
    pub fn stop_watch(&self) {
        let session = self.watch_session.lock().take();
        if let Some(mut session) = session {
            session.stop();
        }
    }

    pub fn is_watching(&self) -> bool {
        self.watch_session.lock().is_some()
    }

    /// Rebuild after a settled change window. Never propagates failure.
    pub(crate) fn rebuild_for_watch(&self) {
        match self.run_all(false) {
            Ok(summary) => {
                crate::logger::status_success(&format!(
                    "rebuilt {} in {}ms ({} cached)",
                    crate::utils::plural_count(summary.results.len(), "task"),
                    summary.perf.total_ms(),
                    summary.cache_hits,
                ));
            }
            Err(e) => {
                crate::logger::status_error("rebuild failed", &format!("{e:#}"));
            }
        }
    }

    // ========================================================================
    // diagnostics
    // ========================================================================

    pub fn error_stats(&self) -> ErrorStats {
        self.errors.snapshot()
    }

    pub fn error_report(&self) -> String {
        self.errors.report()
    }

    pub fn clear_error_stats(&self) {
        self.errors.reset();
    }
}

/// Clean shared output directories once before dispatch.
///
/// A per-task clean wipes the whole outdir at task start; when tasks share
/// a directory, a later task's wipe would delete siblings' finished
/// outputs. Sole owners of a directory keep their own clean stage; every
/// task stays forced either way.
fn preclean_shared(tasks: &mut [BuildTask]) -> Result<()> {
    let mut owners: FxHashMap<&PathBuf, usize> = FxHashMap::default();
    for task in tasks.iter() {
        *owners.entry(&task.outdir).or_insert(0) += 1;
    }
    let shared: Vec<PathBuf> = owners
        .into_iter()
        .filter(|(_, n)| *n > 1)
        .map(|(dir, _)| dir.clone())
        .collect();

    for task in tasks.iter_mut() {
        if task.clean && shared.contains(&task.outdir) {
            task.clean = false;
        }
    }
    for dir in &shared {
        // Only wipe when a clean was actually requested for this round.
        if tasks.iter().any(|t| t.force && t.outdir == *dir) {
            crate::pipeline::clean_dir(dir)?;
        }
    }
    Ok(())
}
