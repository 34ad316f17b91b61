//! External compile collaborator contract.
//!
//! The orchestration core never transforms sources itself. Everything that
//! turns entry files into output files lives behind [`Compiler`]; stylesheet,
//! HTML and asset post-processing live behind [`PostProcessor`]. The core
//! only relies on the input/output contract: identical inputs produce
//! identical outputs, and a successful compile may report the transitive
//! input closure it consumed as a [`DependencyManifest`].

pub mod exec;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::perf::Stage;

pub use exec::{ExecCompiler, ExecSpec};

/// Build mode, part of the output-affecting option set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildMode {
    #[default]
    Development,
    Production,
}

/// The subset of build options that affect output bytes.
///
/// This struct is the canonical serialization unit for fingerprinting:
/// field order is fixed by the struct definition and `define` is a
/// `BTreeMap`, so two option sets that are value-equal always serialize to
/// identical bytes regardless of how the caller assembled them. Purely
/// cosmetic options (verbosity, quiet mode) deliberately have no field here.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildOptions {
    pub mode: BuildMode,
    pub minify: bool,
    pub target: String,
    pub format: String,
    pub splitting: bool,
    pub define: BTreeMap<String, String>,
}

impl BuildOptions {
    /// Canonical byte representation used as fingerprint input.
    pub fn canonical_bytes(&self) -> Vec<u8> {
        // Struct field order is fixed and the map is sorted, so this is
        // deterministic for value-equal option sets.
        serde_json::to_vec(self).unwrap_or_default()
    }
}

/// Transitive input list produced by a successful compile.
///
/// Maps each input path to its byte size at compile time, plus import edges.
/// Consumed only for fingerprinting; the core never re-derives it and never
/// re-verifies it against the filesystem.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyManifest {
    /// Input path -> byte size at compile time.
    pub inputs: BTreeMap<PathBuf, u64>,
    /// Input path -> paths it imports.
    #[serde(default)]
    pub edges: BTreeMap<PathBuf, Vec<PathBuf>>,
}

impl DependencyManifest {
    /// Sorted `(path, size)` pairs, the fingerprint-relevant view.
    pub fn sorted_sizes(&self) -> impl Iterator<Item = (&Path, u64)> {
        // BTreeMap iteration is already path-sorted.
        self.inputs.iter().map(|(p, s)| (p.as_path(), *s))
    }

    pub fn is_empty(&self) -> bool {
        self.inputs.is_empty()
    }
}

/// Result of one compile invocation.
#[derive(Debug, Clone)]
pub struct CompileOutput {
    /// Every output file the compile produced (or declared it would produce).
    pub output_paths: Vec<PathBuf>,
    /// Transitive input closure, when the engine reports one.
    pub manifest: Option<DependencyManifest>,
    /// Time the engine spent compiling.
    pub duration: Duration,
}

/// The transformation/bundling engine.
///
/// Must be idempotent for identical inputs. A compile error is fatal to the
/// owning task; the pipeline runner surfaces it unchanged.
pub trait Compiler: Send + Sync {
    fn compile(
        &self,
        task: &str,
        entries: &[PathBuf],
        options: &BuildOptions,
    ) -> Result<CompileOutput>;
}

/// A post-compile processing step (asset copying, HTML injection,
/// stylesheet optimization) attributed to a fixed pipeline stage.
pub trait PostProcessor: Send + Sync {
    /// The stage this processor's duration is recorded under.
    fn stage(&self) -> Stage;

    /// Process the freshly compiled outputs in place.
    fn run(&self, task: &str, outputs: &[PathBuf]) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_options_canonical_bytes_deterministic() {
        let mut a = BuildOptions::default();
        a.define.insert("B".into(), "2".into());
        a.define.insert("A".into(), "1".into());

        let mut b = BuildOptions::default();
        b.define.insert("A".into(), "1".into());
        b.define.insert("B".into(), "2".into());

        assert_eq!(a.canonical_bytes(), b.canonical_bytes());
    }

    #[test]
    fn test_options_canonical_bytes_sensitive() {
        let dev = BuildOptions::default();
        let prod = BuildOptions {
            mode: BuildMode::Production,
            ..BuildOptions::default()
        };
        assert_ne!(dev.canonical_bytes(), prod.canonical_bytes());
    }

    #[test]
    fn test_manifest_sorted_sizes() {
        let mut manifest = DependencyManifest::default();
        manifest.inputs.insert(PathBuf::from("src/b.ts"), 20);
        manifest.inputs.insert(PathBuf::from("src/a.ts"), 10);

        let pairs: Vec<_> = manifest.sorted_sizes().collect();
        assert_eq!(pairs[0], (Path::new("src/a.ts"), 10));
        assert_eq!(pairs[1], (Path::new("src/b.ts"), 20));
    }
}
