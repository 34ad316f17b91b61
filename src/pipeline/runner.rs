//! Drives one task through its stages.

use anyhow::{Context, Result, bail};
use std::fs;
use std::path::Path;
use std::time::Instant;

use crate::cache::{BuildCache, CachedBuild};
use crate::compiler::{Compiler, PostProcessor};
use crate::diagnostics::{ErrorKind, ErrorLedger};
use crate::fingerprint::Fingerprint;
use crate::log;
use crate::perf::{PerfLedger, Stage};
use crate::pipeline::validate::validate_outputs;
use crate::pipeline::{BuildTask, TaskKind, TaskResult};

/// Executes tasks against a compiler, a set of post-processors, the build
/// cache and the shared error ledger. Stateless across runs; safe to call
/// from multiple threads at once.
pub struct PipelineRunner<'a> {
    pub compiler: &'a dyn Compiler,
    pub processors: &'a [Box<dyn PostProcessor>],
    pub cache: &'a BuildCache,
    pub errors: &'a ErrorLedger,
}

impl PipelineRunner<'_> {
    /// Run one task to completion.
    ///
    /// Compile and fatal validation failures are recorded in the ledger and
    /// propagated; cache write failures are logged and absorbed, a build
    /// that produced good output never fails because the cache disk did.
    pub fn run(&self, task: &BuildTask) -> Result<TaskResult> {
        let started = Instant::now();
        let mut perf = PerfLedger::new();

        if task.clean {
            let t = Instant::now();
            clean_dir(&task.outdir)?;
            perf.record(Stage::Clean, elapsed_ms(t));
        }

        // ====================================================================
        // cache check
        // ====================================================================

        let use_cache = task.cache && self.cache.is_enabled();
        let mut fingerprint = None;

        if use_cache {
            let t = Instant::now();
            if task.force {
                // Rehash from disk so the stored key reflects current bytes.
                for entry in &task.entry {
                    crate::fingerprint::invalidate_hash(entry);
                }
            }
            let prior_manifest = self.cache.last_manifest(&task.name);
            let fp = Fingerprint::compute(&task.entry, &task.options, prior_manifest.as_ref());
            // Forced tasks never take the hit branch; the outputs a cached
            // result points at were wiped this round.
            let cached = if task.force { None } else { self.cache.lookup(&fp) };
            perf.record(Stage::CacheCheck, elapsed_ms(t));

            if let Some(cached) = cached {
                log!("cache"; "{}: hit ({})", task.name, fp.short());
                perf.set_total(elapsed_ms(started));
                return Ok(TaskResult {
                    task: task.name.clone(),
                    kind: task.kind,
                    output_files: cached.output_files,
                    manifest: cached.manifest,
                    perf,
                    cache_hit: true,
                });
            }

            crate::debug!("cache"; "{}: miss ({})", task.name, fp.short());
            fingerprint = Some(fp);
        }

        // ====================================================================
        // compile
        // ====================================================================

        let t = Instant::now();
        let compiled = match self.compiler.compile(&task.name, &task.entry, &task.options) {
            Ok(output) => output,
            Err(e) => {
                self.errors.record(ErrorKind::Compile, e.to_string(), None);
                return Err(e.context(format!("compiling task '{}'", task.name)));
            }
        };
        perf.record(Stage::Build, elapsed_ms(t));

        // ====================================================================
        // post-process (client bundles only)
        // ====================================================================

        if task.kind == TaskKind::Client {
            for processor in self.processors {
                let t = Instant::now();
                if let Err(e) = processor.run(&task.name, &compiled.output_paths) {
                    self.errors.record(ErrorKind::Other, e.to_string(), None);
                    return Err(e.context(format!(
                        "post-processing stage '{}' for task '{}'",
                        processor.stage(),
                        task.name
                    )));
                }
                perf.record(processor.stage(), elapsed_ms(t));
            }

            self.validate(task, &compiled.output_paths)?;
        }

        // ====================================================================
        // cache write
        // ====================================================================

        if let Some(fp) = fingerprint {
            let entry = CachedBuild {
                output_files: compiled.output_paths.clone(),
                manifest: compiled.manifest.clone(),
            };
            if let Err(e) = self.cache.store(&fp, &entry) {
                log!("warning"; "{}: cache write failed: {:#}", task.name, e);
                self.errors.record_warning();
            }
        }
        if use_cache
            && let Some(manifest) = &compiled.manifest
            && let Err(e) = self.cache.store_manifest(&task.name, manifest)
        {
            log!("warning"; "{}: manifest write failed: {:#}", task.name, e);
            self.errors.record_warning();
        }

        perf.set_total(elapsed_ms(started));
        Ok(TaskResult {
            task: task.name.clone(),
            kind: task.kind,
            output_files: compiled.output_paths,
            manifest: compiled.manifest,
            perf,
            cache_hit: false,
        })
    }

    /// Post-build validation for fresh client outputs. Warnings are logged
    /// and counted; fatal findings are aggregated and fail the task.
    fn validate(&self, task: &BuildTask, produced: &[std::path::PathBuf]) -> Result<()> {
        let declared = if task.outputs.is_empty() {
            produced
        } else {
            &task.outputs[..]
        };

        let findings = validate_outputs(declared);

        for warning in &findings.warnings {
            log!("warning"; "{}", warning);
            self.errors.record_warning();
        }

        if findings.is_fatal() {
            let joined = findings.fatal.join("\n");
            self.errors
                .record(ErrorKind::Validation, joined.clone(), None);
            bail!("output validation failed for '{}':\n{}", task.name, joined);
        }
        Ok(())
    }
}

/// Wipe and recreate an output directory. Missing directories are fine.
pub(crate) fn clean_dir(dir: &Path) -> Result<()> {
    match fs::remove_dir_all(dir) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => {
            return Err(e).with_context(|| format!("cleaning {}", dir.display()));
        }
    }
    fs::create_dir_all(dir).with_context(|| format!("recreating {}", dir.display()))
}

fn elapsed_ms(since: Instant) -> u64 {
    since.elapsed().as_millis() as u64
}
