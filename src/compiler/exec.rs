//! Compile collaborator backed by an external bundler command.
//!
//! The CLI drives real builds through this adapter: each pipeline configures
//! the command to run (esbuild, bun build, a shell script), the outputs it
//! declares, and optionally a metafile the command writes. The metafile is
//! parsed into a [`DependencyManifest`] so subsequent fingerprints become
//! dependency-aware.

use anyhow::{Context, Result, bail};
use rustc_hash::FxHashMap;
use serde::Deserialize;
use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};
use std::time::Instant;

use super::{BuildMode, BuildOptions, CompileOutput, Compiler, DependencyManifest};

/// How to run the external engine for one named task.
#[derive(Debug, Clone)]
pub struct ExecSpec {
    /// Command array, e.g. `["esbuild", "--bundle"]`. Entry files are appended.
    pub command: Vec<String>,
    /// Output files the command declares it will produce.
    pub outputs: Vec<PathBuf>,
    /// JSON metafile the command writes (esbuild `--metafile` layout).
    pub metafile: Option<PathBuf>,
    /// Working directory for the command.
    pub cwd: PathBuf,
}

/// [`Compiler`] implementation that shells out per task.
pub struct ExecCompiler {
    specs: FxHashMap<String, ExecSpec>,
}

impl ExecCompiler {
    pub fn new() -> Self {
        Self {
            specs: FxHashMap::default(),
        }
    }

    /// Register the exec spec for a task name.
    pub fn register(&mut self, task: impl Into<String>, spec: ExecSpec) {
        self.specs.insert(task.into(), spec);
    }
}

impl Default for ExecCompiler {
    fn default() -> Self {
        Self::new()
    }
}

impl Compiler for ExecCompiler {
    fn compile(
        &self,
        task: &str,
        entries: &[PathBuf],
        options: &BuildOptions,
    ) -> Result<CompileOutput> {
        let spec = self
            .specs
            .get(task)
            .with_context(|| format!("no compile command configured for task '{task}'"))?;

        let started = Instant::now();
        let output = Cmd::from_slice(&spec.command)
            .args(entries.iter().map(|p| p.as_os_str()))
            .cwd(&spec.cwd)
            .env("KILN_MODE", mode_label(options.mode))
            .env("KILN_MINIFY", if options.minify { "1" } else { "0" })
            .run()
            .with_context(|| format!("compile command failed to start for task '{task}'"))?;
        let duration = started.elapsed();

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!(
                "compile failed for task '{task}' ({}):\n{}",
                output.status,
                tail_lines(&stderr, 20)
            );
        }

        let manifest = match &spec.metafile {
            Some(path) => read_metafile(path)?,
            None => None,
        };

        Ok(CompileOutput {
            output_paths: spec.outputs.clone(),
            manifest,
            duration,
        })
    }
}

fn mode_label(mode: BuildMode) -> &'static str {
    match mode {
        BuildMode::Development => "development",
        BuildMode::Production => "production",
    }
}

/// Keep only the last `n` lines of diagnostic spew.
fn tail_lines(text: &str, n: usize) -> String {
    let lines: Vec<&str> = text.lines().collect();
    let start = lines.len().saturating_sub(n);
    lines[start..].join("\n")
}

// ============================================================================
// Metafile parsing (esbuild layout)
// ============================================================================

#[derive(Deserialize)]
struct Metafile {
    #[serde(default)]
    inputs: FxHashMap<String, MetafileInput>,
}

#[derive(Deserialize)]
struct MetafileInput {
    #[serde(default)]
    bytes: u64,
    #[serde(default)]
    imports: Vec<MetafileImport>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum MetafileImport {
    Path(String),
    Record { path: String },
}

impl MetafileImport {
    fn path(&self) -> &str {
        match self {
            Self::Path(p) => p,
            Self::Record { path } => path,
        }
    }
}

/// Read a metafile into a manifest. A missing metafile is not an error:
/// the build simply loses dependency-aware fingerprinting for this round.
fn read_metafile(path: &Path) -> Result<Option<DependencyManifest>> {
    let json = match std::fs::read_to_string(path) {
        Ok(j) => j,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            crate::debug!("compile"; "metafile missing: {}", path.display());
            return Ok(None);
        }
        Err(e) => return Err(e).with_context(|| format!("reading {}", path.display())),
    };

    let meta: Metafile = serde_json::from_str(&json)
        .with_context(|| format!("invalid metafile: {}", path.display()))?;

    let mut manifest = DependencyManifest::default();
    for (input, info) in meta.inputs {
        let path = PathBuf::from(&input);
        manifest
            .edges
            .insert(path.clone(), info.imports.iter().map(|i| PathBuf::from(i.path())).collect());
        manifest.inputs.insert(path, info.bytes);
    }

    Ok(Some(manifest))
}

// ============================================================================
// Minimal command builder
// ============================================================================

/// Command builder for external process execution.
struct Cmd {
    program: OsString,
    args: Vec<OsString>,
    cwd: Option<PathBuf>,
    envs: Vec<(String, String)>,
}

impl Cmd {
    /// Create from a command array (e.g. `["npx", "esbuild"]`).
    fn from_slice<S: AsRef<OsStr>>(cmd: &[S]) -> Self {
        let mut iter = cmd.iter();
        let program = iter
            .next()
            .map(|s| s.as_ref().to_owned())
            .unwrap_or_default();
        let args: Vec<_> = iter.map(|s| s.as_ref().to_owned()).collect();
        Self {
            program,
            args,
            cwd: None,
            envs: Vec::new(),
        }
    }

    fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.args.extend(args.into_iter().map(|s| s.as_ref().to_owned()));
        self
    }

    fn cwd(mut self, dir: &Path) -> Self {
        self.cwd = Some(dir.to_path_buf());
        self
    }

    fn env(mut self, key: &str, value: &str) -> Self {
        self.envs.push((key.to_string(), value.to_string()));
        self
    }

    fn run(self) -> Result<Output> {
        if self.program.is_empty() {
            bail!("empty compile command");
        }

        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(cwd) = &self.cwd {
            command.current_dir(cwd);
        }
        for (k, v) in &self.envs {
            command.env(k, v);
        }

        command
            .output()
            .with_context(|| format!("spawning {}", self.program.to_string_lossy()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_metafile_parsing() {
        let dir = TempDir::new().unwrap();
        let meta = dir.path().join("meta.json");
        std::fs::write(
            &meta,
            r#"{"inputs":{"src/app.ts":{"bytes":120,"imports":[{"path":"src/util.ts"}]},"src/util.ts":{"bytes":40,"imports":[]}}}"#,
        )
        .unwrap();

        let manifest = read_metafile(&meta).unwrap().unwrap();
        assert_eq!(manifest.inputs.len(), 2);
        assert_eq!(manifest.inputs[Path::new("src/app.ts")], 120);
        assert_eq!(
            manifest.edges[Path::new("src/app.ts")],
            vec![PathBuf::from("src/util.ts")]
        );
    }

    #[test]
    fn test_metafile_missing_is_none() {
        let manifest = read_metafile(Path::new("/nonexistent/meta.json")).unwrap();
        assert!(manifest.is_none());
    }

    #[test]
    fn test_tail_lines() {
        let text = "a\nb\nc\nd";
        assert_eq!(tail_lines(text, 2), "c\nd");
        assert_eq!(tail_lines(text, 10), text);
    }
}
