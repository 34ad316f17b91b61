//! Deterministic build fingerprints.
//!
//! A [`Fingerprint`] is the cache key for one build task. It is derived from:
//!
//! 1. the sorted set of `(entry path, content hash)` pairs,
//! 2. the canonical serialization of the output-affecting build options,
//! 3. when a prior dependency manifest is supplied, its sorted
//!    `(transitive input path, byte size)` pairs.
//!
//! Identical inputs always yield the same fingerprint; a single changed byte
//! in any accounted file, or any accounted option, changes it. The manifest
//! is trusted as the authoritative transitive closure of the previous build
//! and is not re-verified against disk — re-scanning every transitive file
//! on lookup would cost what the cache is meant to save.

pub mod hash;

use std::fmt;
use std::path::PathBuf;

use crate::compiler::{BuildOptions, DependencyManifest};

pub use hash::{ContentHash, compute_file_hash, invalidate_hash};

/// Opaque deterministic cache key for one build task.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Compute the fingerprint for a task.
    ///
    /// Pure apart from reading the entry files to hash them. Entry order is
    /// irrelevant; a missing entry file contributes the empty hash and still
    /// produces a stable key.
    pub fn compute(
        files: &[PathBuf],
        options: &BuildOptions,
        manifest: Option<&DependencyManifest>,
    ) -> Self {
        let mut hasher = blake3::Hasher::new();

        // (a) sorted (entry path, content hash) pairs
        let mut entries: Vec<(String, ContentHash)> = files
            .iter()
            .map(|p| (p.to_string_lossy().into_owned(), compute_file_hash(p)))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));

        for (path, hash) in &entries {
            hasher.update(path.as_bytes());
            hasher.update(&[0]);
            hasher.update(hash.as_bytes());
        }

        // (b) canonical option bytes
        hasher.update(&[0xff]);
        hasher.update(&options.canonical_bytes());

        // (c) sorted (transitive input path, byte size) pairs
        if let Some(manifest) = manifest {
            hasher.update(&[0xfe]);
            for (path, size) in manifest.sorted_sizes() {
                hasher.update(path.to_string_lossy().as_bytes());
                hasher.update(&[0]);
                hasher.update(&size.to_le_bytes());
            }
        }

        Self(hex::encode(hasher.finalize().as_bytes()))
    }

    /// Rehydrate a fingerprint from its stored string form.
    pub fn from_hex(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short prefix used for payload filenames and log lines.
    pub fn short(&self) -> &str {
        &self.0[..self.0.len().min(16)]
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.short())
    }
}
