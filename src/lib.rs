//! Incremental-build orchestration and caching core.
//!
//! The crate schedules external bundler invocations, skips them entirely
//! when a content fingerprint matches a cached result, and keeps a
//! watch-debounce-rebuild loop immune to its own build products. Source
//! transformation itself is delegated to a [`compiler::Compiler`]
//! implementation; the CLI ships [`compiler::ExecCompiler`], which shells
//! out to whatever command the project configures.
//!
//! Library entry point is [`orchestrator::Orchestrator`].

pub mod cache;
pub mod cli;
pub mod compiler;
pub mod config;
pub mod diagnostics;
pub mod fingerprint;
pub mod logger;
pub mod orchestrator;
pub mod perf;
pub mod pipeline;
pub mod utils;
pub mod watch;

pub use cache::{BuildCache, CacheStats, CachedBuild};
pub use compiler::{BuildMode, BuildOptions, CompileOutput, Compiler, PostProcessor};
pub use config::Config;
pub use diagnostics::{ErrorKind, ErrorLedger, ErrorStats};
pub use fingerprint::Fingerprint;
pub use orchestrator::{BuildSummary, Orchestrator};
pub use perf::{PerfLedger, Stage};
pub use pipeline::{BuildTask, TaskKind, TaskResult};
pub use watch::{ChangeCallback, ChangeKind};
