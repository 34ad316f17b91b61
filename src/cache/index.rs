//! Cache index data structures.

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

/// Index file name
pub const INDEX_FILE: &str = "index.json";

/// Metadata for one stored cache entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntryInfo {
    /// Payload filename (without directory).
    pub filename: String,
    /// Entry creation time (Unix timestamp in seconds).
    pub created_at: u64,
    /// Stored size in bytes (compressed size where applicable).
    pub size: u64,
    /// Whether the payload is deflate-compressed on disk.
    #[serde(default)]
    pub compressed: bool,
}

/// Index mapping fingerprints to entry metadata.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct CacheIndex {
    /// Fingerprint hex -> entry info
    pub entries: FxHashMap<String, EntryInfo>,
    /// Index creation time (Unix timestamp in seconds)
    #[serde(default)]
    pub created_at: u64,
}

impl CacheIndex {
    /// Create a new index with current timestamp.
    pub fn new() -> Self {
        Self {
            entries: FxHashMap::default(),
            created_at: current_timestamp(),
        }
    }
}

/// Get current Unix timestamp in seconds
pub fn current_timestamp() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
