//! Content-addressed store for build results.
//!
//! Entries live under a storage root: one payload file per fingerprint plus
//! an `index.json` with metadata. All reads are fail-safe — corruption,
//! missing payloads and version skew degrade to cache misses, never errors.
//! Payloads above [`COMPRESS_THRESHOLD`] are stored deflate-compressed,
//! transparently to `lookup` callers.
//!
//! Alongside the entries, the store keeps the last dependency manifest per
//! task so the next invocation can compute a dependency-aware fingerprint
//! before its first compile.

mod index;

use anyhow::{Context, Result};
use flate2::Compression;
use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::compiler::DependencyManifest;
use crate::fingerprint::Fingerprint;

use index::{CacheIndex, EntryInfo, INDEX_FILE, current_timestamp};

/// Default storage directory name under the project root.
pub const CACHE_DIR: &str = ".kiln-cache";

/// Payloads at or above this size are stored compressed.
const COMPRESS_THRESHOLD: usize = 64 * 1024;

/// The build result payload stored per fingerprint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CachedBuild {
    /// Output files the build produced.
    pub output_files: Vec<PathBuf>,
    /// Dependency manifest reported by the compile, if any.
    pub manifest: Option<DependencyManifest>,
}

/// Aggregate over live entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub count: usize,
    /// Stored bytes, compressed size where applicable.
    pub total_bytes: u64,
}

/// Fingerprint-keyed store under one storage root.
pub struct BuildCache {
    dir: PathBuf,
    enabled: bool,
    index: Mutex<CacheIndex>,
}

impl BuildCache {
    /// Open the store, loading an existing index when present.
    ///
    /// Fail-safe: an unreadable or corrupt index starts fresh.
    pub fn open(dir: impl Into<PathBuf>, enabled: bool) -> Self {
        let dir = dir.into();
        let index = load_index(&dir).unwrap_or_else(CacheIndex::new);
        Self {
            dir,
            enabled,
            index: Mutex::new(index),
        }
    }

    /// Whether caching is enabled process-wide.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Look up a stored result. Returns `None` when caching is disabled,
    /// no entry exists, or the payload cannot be read back. Never errors
    /// on a miss.
    pub fn lookup(&self, fingerprint: &Fingerprint) -> Option<CachedBuild> {
        if !self.enabled {
            return None;
        }

        let info = {
            let index = self.index.lock();
            index.entries.get(fingerprint.as_str()).cloned()?
        };

        let path = self.dir.join(&info.filename);
        let bytes = match fs::read(&path) {
            Ok(b) => b,
            Err(e) => {
                crate::debug!("cache"; "failed to read {}: {}", path.display(), e);
                return None;
            }
        };

        let payload = if info.compressed {
            let mut decoder = DeflateDecoder::new(bytes.as_slice());
            let mut out = Vec::new();
            if let Err(e) = decoder.read_to_end(&mut out) {
                crate::debug!("cache"; "failed to decompress {}: {}", path.display(), e);
                return None;
            }
            out
        } else {
            bytes
        };

        match serde_json::from_slice(&payload) {
            Ok(result) => Some(result),
            Err(e) => {
                crate::debug!("cache"; "failed to deserialize {}: {}", path.display(), e);
                None
            }
        }
    }

    /// Store a result, overwriting any existing entry for the fingerprint.
    pub fn store(&self, fingerprint: &Fingerprint, result: &CachedBuild) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("creating cache dir {}", self.dir.display()))?;

        let payload = serde_json::to_vec(result)?;
        let compressed = payload.len() >= COMPRESS_THRESHOLD;
        let bytes = if compressed {
            let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(&payload)?;
            encoder.finish()?
        } else {
            payload
        };

        let filename = format!("{}.bin", fingerprint.short());
        let path = self.dir.join(&filename);
        fs::write(&path, &bytes)
            .with_context(|| format!("writing cache entry {}", path.display()))?;

        let mut index = self.index.lock();
        index.entries.insert(
            fingerprint.as_str().to_string(),
            EntryInfo {
                filename,
                created_at: current_timestamp(),
                size: bytes.len() as u64,
                compressed,
            },
        );
        self.persist_index(&index)
    }

    /// Remove an entry. Removing a non-existent fingerprint is a silent no-op.
    pub fn remove(&self, fingerprint: &Fingerprint) -> Result<()> {
        let mut index = self.index.lock();
        let Some(info) = index.entries.remove(fingerprint.as_str()) else {
            return Ok(());
        };
        remove_payload(&self.dir, &info);
        self.persist_index(&index)
    }

    /// Remove every entry and all on-disk state under the storage root.
    pub fn clear(&self) -> Result<()> {
        let mut index = self.index.lock();
        index.entries.clear();
        if self.dir.exists() {
            fs::remove_dir_all(&self.dir)
                .with_context(|| format!("clearing cache dir {}", self.dir.display()))?;
        }
        Ok(())
    }

    /// Remove entries older than `ttl`. Returns the count removed.
    pub fn sweep_expired(&self, ttl: Duration) -> Result<usize> {
        let now = current_timestamp();
        let cutoff = now.saturating_sub(ttl.as_secs());

        let mut index = self.index.lock();
        let expired: Vec<String> = index
            .entries
            .iter()
            .filter(|(_, info)| info.created_at < cutoff)
            .map(|(fp, _)| fp.clone())
            .collect();

        for fp in &expired {
            if let Some(info) = index.entries.remove(fp) {
                remove_payload(&self.dir, &info);
            }
        }

        if !expired.is_empty() {
            self.persist_index(&index)?;
        }
        Ok(expired.len())
    }

    /// Keep only the `n` most recently created entries; remove the rest.
    /// `n = 0` removes everything. Returns the count removed.
    pub fn retain_most_recent(&self, n: usize) -> Result<usize> {
        let mut index = self.index.lock();
        if index.entries.len() <= n {
            return Ok(0);
        }

        let mut by_age: Vec<(String, u64)> = index
            .entries
            .iter()
            .map(|(fp, info)| (fp.clone(), info.created_at))
            .collect();
        // Newest first; fingerprint as tiebreaker for a stable order.
        by_age.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

        let evicted: Vec<String> = by_age.into_iter().skip(n).map(|(fp, _)| fp).collect();
        for fp in &evicted {
            if let Some(info) = index.entries.remove(fp) {
                remove_payload(&self.dir, &info);
            }
        }

        self.persist_index(&index)?;
        Ok(evicted.len())
    }

    /// Aggregate over live entries.
    pub fn stats(&self) -> CacheStats {
        let index = self.index.lock();
        CacheStats {
            count: index.entries.len(),
            total_bytes: index.entries.values().map(|i| i.size).sum(),
        }
    }

    // ========================================================================
    // Per-task dependency manifests
    // ========================================================================

    /// Load the last persisted dependency manifest for a task, if any.
    /// Fail-safe: a corrupt manifest reads as absent.
    pub fn last_manifest(&self, task: &str) -> Option<DependencyManifest> {
        let path = self.manifest_path(task);
        let json = fs::read_to_string(&path).ok()?;
        match serde_json::from_str(&json) {
            Ok(m) => Some(m),
            Err(e) => {
                crate::debug!("cache"; "invalid manifest {}: {}", path.display(), e);
                None
            }
        }
    }

    /// Persist the dependency manifest reported by a task's fresh compile.
    pub fn store_manifest(&self, task: &str, manifest: &DependencyManifest) -> Result<()> {
        fs::create_dir_all(&self.dir)?;
        let path = self.manifest_path(task);
        let json = serde_json::to_string(manifest)?;
        fs::write(&path, json).with_context(|| format!("writing {}", path.display()))
    }

    fn manifest_path(&self, task: &str) -> PathBuf {
        self.dir.join(format!("manifest-{task}.json"))
    }

    fn persist_index(&self, index: &CacheIndex) -> Result<()> {
        fs::create_dir_all(&self.dir)?;
        let path = self.dir.join(INDEX_FILE);
        let json = serde_json::to_string_pretty(index)?;
        fs::write(&path, json).with_context(|| format!("writing {}", path.display()))
    }
}

fn load_index(dir: &Path) -> Option<CacheIndex> {
    let path = dir.join(INDEX_FILE);
    let json = fs::read_to_string(&path).ok()?;
    match serde_json::from_str(&json) {
        Ok(index) => Some(index),
        Err(e) => {
            crate::debug!("cache"; "corrupt index {}: {}", path.display(), e);
            None
        }
    }
}

fn remove_payload(dir: &Path, info: &EntryInfo) {
    let path = dir.join(&info.filename);
    if let Err(e) = fs::remove_file(&path)
        && e.kind() != std::io::ErrorKind::NotFound
    {
        crate::debug!("cache"; "failed to remove {}: {}", path.display(), e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn fp(label: &str) -> Fingerprint {
        // Fixed-width keys, label first so `short()` stays unique per label.
        Fingerprint::from_hex(format!("{label:0<32}"))
    }

    fn build(outputs: &[&str]) -> CachedBuild {
        CachedBuild {
            output_files: outputs.iter().map(PathBuf::from).collect(),
            manifest: None,
        }
    }

    fn open_cache() -> (TempDir, BuildCache) {
        let dir = TempDir::new().unwrap();
        let cache = BuildCache::open(dir.path().join("cache"), true);
        (dir, cache)
    }

    #[test]
    fn test_store_lookup_roundtrip() {
        let (_dir, cache) = open_cache();
        let key = fp("a1");
        let result = build(&["dist/app.js", "dist/app.css"]);

        cache.store(&key, &result).unwrap();
        assert_eq!(cache.lookup(&key), Some(result));
    }

    #[test]
    fn test_lookup_miss_is_none() {
        let (_dir, cache) = open_cache();
        assert_eq!(cache.lookup(&fp("missing")), None);
    }

    #[test]
    fn test_lookup_disabled_is_none() {
        let dir = TempDir::new().unwrap();
        let cache = BuildCache::open(dir.path().join("cache"), true);
        let key = fp("a1");
        cache.store(&key, &build(&["dist/app.js"])).unwrap();

        let disabled = BuildCache::open(dir.path().join("cache"), false);
        assert_eq!(disabled.lookup(&key), None);
    }

    #[test]
    fn test_store_overwrites() {
        let (_dir, cache) = open_cache();
        let key = fp("a1");
        cache.store(&key, &build(&["dist/v1.js"])).unwrap();
        cache.store(&key, &build(&["dist/v2.js"])).unwrap();

        let got = cache.lookup(&key).unwrap();
        assert_eq!(got.output_files, vec![PathBuf::from("dist/v2.js")]);
        assert_eq!(cache.stats().count, 1);
    }

    #[test]
    fn test_remove_idempotent() {
        let (_dir, cache) = open_cache();
        let key = fp("a1");
        cache.store(&key, &build(&["dist/app.js"])).unwrap();

        cache.remove(&key).unwrap();
        assert_eq!(cache.lookup(&key), None);
        // Removing again is a silent no-op.
        cache.remove(&key).unwrap();
        cache.remove(&fp("never-stored")).unwrap();
    }

    #[test]
    fn test_clear_removes_everything() {
        let (_dir, cache) = open_cache();
        cache.store(&fp("a1"), &build(&["a"])).unwrap();
        cache.store(&fp("b2"), &build(&["b"])).unwrap();

        cache.clear().unwrap();
        assert_eq!(cache.stats().count, 0);
        assert_eq!(cache.lookup(&fp("a1")), None);
    }

    #[test]
    fn test_retain_most_recent_keeps_newest() {
        let (_dir, cache) = open_cache();
        for i in 0..5 {
            cache.store(&fp(&format!("k{i}")), &build(&["x"])).unwrap();
        }

        // Age the first three entries so recency is unambiguous even though
        // all stores happen within one second.
        {
            let mut index = cache.index.lock();
            for (fp, info) in index.entries.iter_mut() {
                if fp.starts_with("k0") || fp.starts_with("k1") || fp.starts_with("k2") {
                    info.created_at -= 100;
                }
            }
        }

        let removed = cache.retain_most_recent(2).unwrap();
        assert_eq!(removed, 3);

        let stats = cache.stats();
        assert_eq!(stats.count, 2);
        assert!(cache.lookup(&fp("k3")).is_some());
        assert!(cache.lookup(&fp("k4")).is_some());
        assert!(cache.lookup(&fp("k0")).is_none());
    }

    #[test]
    fn test_retain_zero_removes_all() {
        let (_dir, cache) = open_cache();
        cache.store(&fp("a1"), &build(&["a"])).unwrap();
        cache.store(&fp("b2"), &build(&["b"])).unwrap();

        let removed = cache.retain_most_recent(0).unwrap();
        assert_eq!(removed, 2);
        assert_eq!(cache.stats().count, 0);
    }

    #[test]
    fn test_sweep_expired() {
        let (_dir, cache) = open_cache();
        cache.store(&fp("old"), &build(&["a"])).unwrap();
        cache.store(&fp("new"), &build(&["b"])).unwrap();

        {
            let mut index = cache.index.lock();
            let info = index.entries.get_mut(fp("old").as_str()).unwrap();
            info.created_at -= 3600;
        }

        let removed = cache.sweep_expired(Duration::from_secs(600)).unwrap();
        assert_eq!(removed, 1);
        assert!(cache.lookup(&fp("old")).is_none());
        assert!(cache.lookup(&fp("new")).is_some());
    }

    #[test]
    fn test_large_payload_compressed_transparently() {
        let (_dir, cache) = open_cache();
        let key = fp("big");

        // Many repetitive paths push the payload over the threshold.
        let outputs: Vec<String> = (0..4000)
            .map(|i| format!("dist/chunks/chunk-{i}-0000000000000000.js"))
            .collect();
        let result = CachedBuild {
            output_files: outputs.iter().map(PathBuf::from).collect(),
            manifest: None,
        };

        cache.store(&key, &result).unwrap();

        let info = cache.index.lock().entries[key.as_str()].clone();
        assert!(info.compressed);
        // Compressed size should be well under the raw payload size.
        assert!((info.size as usize) < COMPRESS_THRESHOLD);

        assert_eq!(cache.lookup(&key), Some(result));
    }

    #[test]
    fn test_index_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let cache_dir = dir.path().join("cache");
        let key = fp("a1");

        {
            let cache = BuildCache::open(&cache_dir, true);
            cache.store(&key, &build(&["dist/app.js"])).unwrap();
        }

        let cache = BuildCache::open(&cache_dir, true);
        assert!(cache.lookup(&key).is_some());
    }

    #[test]
    fn test_manifest_roundtrip() {
        let (_dir, cache) = open_cache();
        assert!(cache.last_manifest("client").is_none());

        let mut manifest = DependencyManifest::default();
        manifest.inputs.insert(PathBuf::from("src/app.ts"), 120);
        cache.store_manifest("client", &manifest).unwrap();

        assert_eq!(cache.last_manifest("client"), Some(manifest));
        assert!(cache.last_manifest("server").is_none());
    }
}
