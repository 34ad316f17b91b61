//! Single-task build pipeline.
//!
//! One [`BuildTask`] describes one bundle (server, client, or a named client
//! entry group); [`runner::PipelineRunner`] drives it through its stages:
//!
//! ```text
//! Idle -> (Clean) -> (CacheCheck) -> hit  -> Done
//!                                 \-> miss -> Compile -> (PostProcess)
//!                                             -> (Validate) -> CacheWrite -> Done
//! ```
//!
//! Executed stages record their duration in the task's [`PerfLedger`];
//! skipped stages leave no trace. Clean rounds skip the hit branch: the
//! wipe deleted the output files a cached result would point at.

pub mod validate;

mod runner;

pub use runner::PipelineRunner;

pub(crate) use runner::clean_dir;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

use crate::compiler::{BuildOptions, DependencyManifest};
use crate::config::{EntryGroup, PipelineConfig};
use crate::perf::PerfLedger;

/// Which bundle a task produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskKind {
    Server,
    Client,
}

impl TaskKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Server => "server",
            Self::Client => "client",
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One concrete unit of build work.
#[derive(Debug, Clone)]
pub struct BuildTask {
    /// Unique task name; also the key for persisted dependency manifests.
    pub name: String,
    pub kind: TaskKind,
    pub entry: Vec<PathBuf>,
    pub outdir: PathBuf,
    /// Declared output files, validated after fresh client builds.
    pub outputs: Vec<PathBuf>,
    pub options: BuildOptions,
    /// Whether results for this task go through the cache.
    pub cache: bool,
    /// Whether this task wipes its output directory before building.
    /// The orchestrator clears this on tasks that share an outdir and
    /// wipes the directory once itself.
    pub clean: bool,
    /// Compile even when the fingerprint matches a cached entry. Set for
    /// clean rounds: the wipe deleted the files a hit would point at.
    pub force: bool,
}

impl BuildTask {
    /// Task for a configured pipeline section.
    pub fn from_config(kind: TaskKind, config: &PipelineConfig, clean: bool) -> Self {
        Self {
            name: kind.as_str().to_string(),
            kind,
            entry: config.entry.clone(),
            outdir: config.outdir.clone(),
            outputs: config.outputs.clone(),
            options: config.options.clone(),
            cache: config.cache,
            clean,
            force: clean,
        }
    }

    /// Client task for a named entry group, reusing the client pipeline
    /// settings with the group's own entries and output directory.
    pub fn from_entry_group(client: &PipelineConfig, group: &EntryGroup, clean: bool) -> Self {
        Self {
            name: format!("client:{}", group.name),
            kind: TaskKind::Client,
            entry: group.entry.clone(),
            outdir: group.outdir.clone().unwrap_or_else(|| client.outdir.clone()),
            outputs: Vec::new(),
            options: client.options.clone(),
            cache: client.cache,
            clean,
            force: clean,
        }
    }
}

/// The outcome of one completed task.
#[derive(Debug, Clone)]
pub struct TaskResult {
    pub task: String,
    pub kind: TaskKind,
    pub output_files: Vec<PathBuf>,
    /// Transitive input closure of the compile, when reported.
    pub manifest: Option<DependencyManifest>,
    pub perf: PerfLedger,
    /// True when the result came out of the cache without compiling.
    pub cache_hit: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client_config() -> PipelineConfig {
        PipelineConfig {
            entry: vec![PathBuf::from("/p/src/app.ts")],
            outdir: PathBuf::from("/p/dist"),
            outputs: vec![PathBuf::from("/p/dist/app.js")],
            command: vec!["bundler".into()],
            metafile: None,
            options: BuildOptions::default(),
            cache: true,
        }
    }

    #[test]
    fn test_task_from_config() {
        let task = BuildTask::from_config(TaskKind::Client, &client_config(), false);
        assert_eq!(task.name, "client");
        assert_eq!(task.kind, TaskKind::Client);
        assert!(task.cache);
        assert!(!task.clean);
        assert!(!task.force);
    }

    #[test]
    fn test_task_from_entry_group() {
        let group = EntryGroup {
            name: "admin".into(),
            entry: vec![PathBuf::from("/p/src/admin.ts")],
            outdir: None,
        };
        let task = BuildTask::from_entry_group(&client_config(), &group, false);
        assert_eq!(task.name, "client:admin");
        assert_eq!(task.entry, vec![PathBuf::from("/p/src/admin.ts")]);
        // No own outdir: inherits the client pipeline's.
        assert_eq!(task.outdir, PathBuf::from("/p/dist"));
        // Group outputs are not declared, so nothing to validate by path.
        assert!(task.outputs.is_empty());
    }
}
