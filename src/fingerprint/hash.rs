//! Content hashing using blake3.
//!
//! Provides the core logic for computing file hashes, with a process-wide
//! memo cache so repeated fingerprint computations do not re-read unchanged
//! files within one invocation.

use dashmap::DashMap;
use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

/// A 256-bit content hash (blake3 output).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContentHash([u8; 32]);

impl ContentHash {
    /// Create a new ContentHash from raw bytes.
    #[inline]
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Get the raw bytes.
    #[inline]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Create a hash representing "no content" (all zeros).
    #[inline]
    pub const fn empty() -> Self {
        Self([0; 32])
    }

    /// Check if this is the empty/zero hash.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0 == [0; 32]
    }

    /// Convert to hex string (for debugging/display).
    pub fn to_hex(self) -> String {
        hex::encode(self.0)
    }
}

impl std::fmt::Display for ContentHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Display first 16 chars of hex for brevity
        write!(f, "{}", &self.to_hex()[..16])
    }
}

/// Process-wide memo cache for file content hashes (thread-safe).
static HASH_CACHE: LazyLock<DashMap<PathBuf, ContentHash>> = LazyLock::new(DashMap::new);

/// Compute blake3 hash of file contents (memoized).
///
/// A missing or unreadable file hashes to [`ContentHash::empty`], keeping
/// fingerprint computation deterministic without side channels.
pub fn compute_file_hash(path: &Path) -> ContentHash {
    let canonical = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());

    if let Some(cached) = HASH_CACHE.get(&canonical) {
        return *cached;
    }

    let hash = compute_file_hash_uncached(&canonical);

    // Cache result (only for existing files)
    if !hash.is_empty() {
        HASH_CACHE.insert(canonical, hash);
    }

    hash
}

/// Compute hash without cache lookup (internal use).
fn compute_file_hash_uncached(path: &Path) -> ContentHash {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(_) => return ContentHash::empty(),
    };

    let mut reader = BufReader::with_capacity(64 * 1024, file);
    let mut hasher = blake3::Hasher::new();
    let mut buffer = [0u8; 64 * 1024];

    loop {
        match reader.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => {
                hasher.update(&buffer[..n]);
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(_) => return ContentHash::empty(),
        }
    }

    ContentHash::new(*hasher.finalize().as_bytes())
}

/// Drop a single memoized hash (after observing a change to the file).
pub fn invalidate_hash(path: &Path) {
    let canonical = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
    HASH_CACHE.remove(&canonical);
}
