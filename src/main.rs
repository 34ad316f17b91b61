//! kiln - incremental build orchestration for external bundlers.

use anyhow::{Context, Result};
use clap::{ColorChoice, Parser};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use kiln::cache::BuildCache;
use kiln::cli::{BuildArgs, CacheAction, Cli, Commands, PipelineArg};
use kiln::compiler::{BuildMode, ExecCompiler, ExecSpec};
use kiln::config::{Config, PipelineConfig};
use kiln::log;
use kiln::orchestrator::{BuildSummary, Orchestrator};
use kiln::pipeline::{TaskKind, TaskResult};
use kiln::utils::plural_count;

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set global color override based on CLI option
    match cli.color {
        ColorChoice::Always => owo_colors::set_override(true),
        ColorChoice::Never => owo_colors::set_override(false),
        ColorChoice::Auto => {} // owo-colors auto-detects TTY
    }

    kiln::logger::set_verbose(cli.verbose);

    let mut config = Config::load(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;

    match &cli.command {
        Commands::Build {
            build_args,
            only,
            entries,
        } => {
            apply_build_args(&mut config, build_args, None);
            let orchestrator = make_orchestrator(config);
            run_build(&orchestrator, *only, *entries, build_args.clean)
        }
        Commands::Watch {
            build_args,
            debounce,
        } => {
            apply_build_args(&mut config, build_args, *debounce);
            let orchestrator = make_orchestrator(config);
            run_watch(&orchestrator)
        }
        Commands::Clean => make_orchestrator(config).clean(),
        Commands::Cache { action } => run_cache(&config, action),
    }
}

/// Fold CLI flags into the loaded config.
fn apply_build_args(config: &mut Config, args: &BuildArgs, debounce: Option<u64>) {
    if args.no_cache {
        config.cache.enable = false;
    }
    if args.production {
        for pipeline in [config.server.as_mut(), config.client.as_mut()]
            .into_iter()
            .flatten()
        {
            pipeline.options.mode = BuildMode::Production;
        }
    }
    if let Some(ms) = debounce {
        config.watch.debounce_ms = ms;
    }
}

fn make_orchestrator(config: Config) -> Arc<Orchestrator> {
    let compiler = Arc::new(build_compiler(&config));
    Arc::new(Orchestrator::new(config, compiler))
}

/// Wire one exec spec per configured task name.
fn build_compiler(config: &Config) -> ExecCompiler {
    let mut compiler = ExecCompiler::new();
    let root = config.get_root();

    if let Some(server) = &config.server {
        compiler.register(TaskKind::Server.as_str(), spec(server, root));
    }
    if let Some(client) = &config.client {
        compiler.register(TaskKind::Client.as_str(), spec(client, root));

        // Entry groups share the client command but declare no outputs or
        // metafile of their own.
        for group in &config.entries {
            compiler.register(
                format!("client:{}", group.name),
                ExecSpec {
                    command: client.command.clone(),
                    outputs: Vec::new(),
                    metafile: None,
                    cwd: root.to_path_buf(),
                },
            );
        }
    }

    compiler
}

fn spec(pipeline: &PipelineConfig, root: &Path) -> ExecSpec {
    ExecSpec {
        command: pipeline.command.clone(),
        outputs: pipeline.outputs.clone(),
        metafile: pipeline.metafile.clone(),
        cwd: root.to_path_buf(),
    }
}

// =============================================================================
// Build Command
// =============================================================================

fn run_build(
    orchestrator: &Orchestrator,
    only: Option<PipelineArg>,
    entries: bool,
    clean: bool,
) -> Result<()> {
    if entries {
        let groups = orchestrator.config().entries.clone();
        let summary = orchestrator.run_multi_entry(&groups, clean)?;
        report_summary(&summary);
        return Ok(());
    }

    match only {
        Some(arg) => {
            let kind = match arg {
                PipelineArg::Server => TaskKind::Server,
                PipelineArg::Client => TaskKind::Client,
            };
            report_task(&orchestrator.run_one(kind, clean)?);
        }
        None => report_summary(&orchestrator.run_all(clean)?),
    }
    Ok(())
}

fn report_summary(summary: &BuildSummary) {
    log!(
        "build";
        "{} in {}ms ({} cached)",
        plural_count(summary.output_files.len(), "output"),
        summary.perf.total_ms(),
        summary.cache_hits
    );
}

fn report_task(result: &TaskResult) {
    log!(
        "build";
        "{}: {} in {}ms{}",
        result.task,
        plural_count(result.output_files.len(), "output"),
        result.perf.total_ms(),
        if result.cache_hit { " (cached)" } else { "" }
    );
}

// =============================================================================
// Watch Command
// =============================================================================

fn run_watch(orchestrator: &Arc<Orchestrator>) -> Result<()> {
    // Ctrl+C unblocks the main thread; the session itself runs on its own.
    let (tx, rx) = std::sync::mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })?;

    orchestrator.watch(None)?;
    log!("watch"; "press Ctrl+C to stop");

    let _ = rx.recv();
    orchestrator.stop_watch();
    log!("watch"; "stopped");
    Ok(())
}

// =============================================================================
// Cache Command
// =============================================================================

fn run_cache(config: &Config, action: &CacheAction) -> Result<()> {
    let cache = BuildCache::open(config.cache_dir(), true);

    match action {
        CacheAction::Stats => {
            let stats = cache.stats();
            log!(
                "cache";
                "{} entries, {:.1} KiB stored",
                stats.count,
                stats.total_bytes as f64 / 1024.0
            );
        }
        CacheAction::Clear => {
            cache.clear()?;
            log!("cache"; "cleared");
        }
        CacheAction::Sweep { ttl_secs } => {
            let ttl = ttl_secs
                .or(config.cache.ttl_secs)
                .context("no TTL given: pass --ttl-secs or set [cache].ttl_secs")?;
            let removed = cache.sweep_expired(Duration::from_secs(ttl))?;
            log!("cache"; "{} expired entries removed", removed);
        }
        CacheAction::Retain { n } => {
            let removed = cache.retain_most_recent(*n)?;
            log!("cache"; "{} entries removed, {} kept", removed, cache.stats().count);
        }
    }
    Ok(())
}
