//! Project configuration management for `kiln.toml`.
//!
//! # Sections
//!
//! | Section      | Purpose                                          |
//! |--------------|--------------------------------------------------|
//! | `[server]`   | Server bundle pipeline (entries, outputs, command)|
//! | `[client]`   | Client bundle pipeline + post-build validation   |
//! | `[[entries]]`| Named entry groups for multi-entry client builds |
//! | `[cache]`    | Build cache storage root, TTL, retention         |
//! | `[watch]`    | Watch paths, ignore list, debounce window        |

mod error;

pub use error::ConfigError;

use crate::compiler::BuildOptions;
use crate::log;
use crate::utils::path::normalize_path;
use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Default debounce window in milliseconds.
pub const DEFAULT_DEBOUNCE_MS: u64 = 300;

/// Default slow-build advisory threshold in milliseconds.
pub const DEFAULT_SLOW_BUILD_MS: u64 = 5000;

// ============================================================================
// root configuration
// ============================================================================

/// Root configuration structure representing kiln.toml
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Absolute path to the config file (internal use only)
    #[serde(skip)]
    pub config_path: PathBuf,

    /// Project root directory - parent of config file (internal use only)
    #[serde(skip)]
    pub root: PathBuf,

    /// Server bundle pipeline
    pub server: Option<PipelineConfig>,

    /// Client bundle pipeline
    pub client: Option<PipelineConfig>,

    /// Named entry groups for multi-entry client builds
    #[serde(default)]
    pub entries: Vec<EntryGroup>,

    /// Cache settings
    #[serde(default)]
    pub cache: CacheConfig,

    /// Watch settings
    #[serde(default)]
    pub watch: WatchConfig,

    /// Total build time above this triggers a slow-build warning (ms)
    #[serde(default = "default_slow_build_ms")]
    pub slow_build_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            config_path: PathBuf::new(),
            root: PathBuf::new(),
            server: None,
            client: None,
            entries: Vec::new(),
            cache: CacheConfig::default(),
            watch: WatchConfig::default(),
            slow_build_ms: DEFAULT_SLOW_BUILD_MS,
        }
    }
}

fn default_slow_build_ms() -> u64 {
    DEFAULT_SLOW_BUILD_MS
}

/// One bundle pipeline: what to compile, where it lands, how to invoke
/// the external bundler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Entry point files
    pub entry: Vec<PathBuf>,

    /// Output directory (cleaned by `clean`, excluded from watch)
    pub outdir: PathBuf,

    /// Declared output files (validated after fresh client builds)
    #[serde(default)]
    pub outputs: Vec<PathBuf>,

    /// External bundler command, argv-style
    pub command: Vec<String>,

    /// JSON metafile the command writes (dependency manifest source)
    pub metafile: Option<PathBuf>,

    /// Output-affecting build options (part of the cache key)
    #[serde(default)]
    pub options: BuildOptions,

    /// Whether results for this pipeline are cached
    #[serde(default = "default_true")]
    pub cache: bool,
}

fn default_true() -> bool {
    true
}

/// A named entry group for multi-entry client builds.
///
/// Each group reuses the `[client]` pipeline settings with its own entry
/// list and output directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntryGroup {
    pub name: String,
    pub entry: Vec<PathBuf>,
    pub outdir: Option<PathBuf>,
}

/// Cache storage settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Master switch; disabled caches answer every lookup with a miss
    #[serde(default = "default_true")]
    pub enable: bool,

    /// Storage root, relative to the project root
    #[serde(default = "default_cache_dir")]
    pub dir: PathBuf,

    /// Entries older than this are swept on demand (seconds)
    pub ttl_secs: Option<u64>,

    /// Keep at most this many entries (newest first) on demand
    pub max_entries: Option<usize>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enable: true,
            dir: default_cache_dir(),
            ttl_secs: None,
            max_entries: None,
        }
    }
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from(crate::cache::CACHE_DIR)
}

/// Watch mode settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchConfig {
    /// Directories to watch, relative to the project root
    #[serde(default = "default_watch_paths")]
    pub paths: Vec<PathBuf>,

    /// Paths whose events are discarded
    #[serde(default)]
    pub ignore: Vec<PathBuf>,

    /// Quiet window before a rebuild fires (ms)
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            paths: default_watch_paths(),
            ignore: Vec::new(),
            debounce_ms: DEFAULT_DEBOUNCE_MS,
        }
    }
}

fn default_watch_paths() -> Vec<PathBuf> {
    vec![PathBuf::from("src")]
}

fn default_debounce_ms() -> u64 {
    DEFAULT_DEBOUNCE_MS
}

impl Config {
    /// Load configuration from a file path with unknown field detection.
    ///
    /// The project root is the config file's parent directory; all relative
    /// paths in the file are normalized against it.
    pub fn load(path: &Path) -> Result<Self> {
        let content =
            fs::read_to_string(path).map_err(|err| ConfigError::Io(path.to_path_buf(), err))?;

        let (mut config, ignored) = Self::parse_with_ignored(&content)?;

        if !ignored.is_empty() {
            Self::print_unknown_fields_warning(&ignored, path);
        }

        config.config_path = normalize_path(path);
        let root = config
            .config_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        config.normalize_paths(&root);
        config.validate()?;

        Ok(config)
    }

    /// Parse configuration from TOML string
    pub fn from_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        Ok(config)
    }

    /// Parse TOML content, collecting any unknown fields.
    pub fn parse_with_ignored(content: &str) -> Result<(Self, Vec<String>)> {
        let mut ignored = Vec::new();
        let deserializer = toml::Deserializer::new(content);
        let config = serde_ignored::deserialize(deserializer, |path: serde_ignored::Path| {
            ignored.push(path.to_string());
        })
        .map_err(ConfigError::Toml)?;
        Ok((config, ignored))
    }

    /// Print warning about unknown fields.
    fn print_unknown_fields_warning(fields: &[String], path: &Path) {
        let display_path = path
            .file_name()
            .map(|n| n.to_string_lossy())
            .unwrap_or_else(|| path.to_string_lossy());
        log!("warning"; "unknown fields in {}, ignoring:", display_path);
        for field in fields {
            eprintln!("- {field}");
        }
    }

    /// Get the root directory path
    pub fn get_root(&self) -> &Path {
        &self.root
    }

    /// Join a path with the root directory.
    pub fn root_join(&self, path: impl AsRef<Path>) -> PathBuf {
        self.root.join(path)
    }

    /// The cache storage root as an absolute path.
    pub fn cache_dir(&self) -> PathBuf {
        if self.cache.dir.is_absolute() {
            self.cache.dir.clone()
        } else {
            self.root_join(&self.cache.dir)
        }
    }

    /// Output directories of all configured pipelines (for cleaning and
    /// watch-event filtering).
    pub fn output_dirs(&self) -> Vec<PathBuf> {
        let mut dirs: Vec<PathBuf> = self
            .server
            .iter()
            .chain(self.client.iter())
            .map(|p| p.outdir.clone())
            .collect();
        for group in &self.entries {
            if let Some(outdir) = &group.outdir {
                dirs.push(outdir.clone());
            }
        }
        dirs.sort();
        dirs.dedup();
        dirs
    }

    // ========================================================================
    // path normalization
    // ========================================================================

    /// Normalize all paths relative to root directory.
    pub fn normalize_paths(&mut self, root: &Path) {
        let root = normalize_path(root);

        if let Some(server) = &mut self.server {
            server.normalize(&root);
        }
        if let Some(client) = &mut self.client {
            client.normalize(&root);
        }
        for group in &mut self.entries {
            group.entry = group.entry.iter().map(|p| normalize_path(&root.join(p))).collect();
            if let Some(outdir) = group.outdir.take() {
                group.outdir = Some(normalize_path(&root.join(outdir)));
            }
        }

        self.watch.paths = self
            .watch
            .paths
            .iter()
            .map(|p| normalize_path(&root.join(p)))
            .collect();
        self.watch.ignore = self
            .watch
            .ignore
            .iter()
            .map(|p| normalize_path(&root.join(p)))
            .collect();

        if !self.cache.dir.is_absolute() {
            self.cache.dir = normalize_path(&root.join(&self.cache.dir));
        }

        self.root = root;
    }

    // ========================================================================
    // validation
    // ========================================================================

    /// Validate configuration. Collects nothing lazily: a bad config file is
    /// rejected before any pipeline work starts.
    pub fn validate(&self) -> Result<()> {
        if self.server.is_none() && self.client.is_none() {
            bail!(ConfigError::Validation(
                "no pipeline configured: add a [server] or [client] section".into()
            ));
        }

        for (name, pipeline) in [("server", &self.server), ("client", &self.client)] {
            if let Some(p) = pipeline {
                if p.entry.is_empty() {
                    bail!(ConfigError::Validation(format!(
                        "[{name}] has no entry points"
                    )));
                }
                if p.command.is_empty() {
                    bail!(ConfigError::Validation(format!(
                        "[{name}] has no command"
                    )));
                }
            }
        }

        if !self.entries.is_empty() {
            if self.client.is_none() {
                bail!(ConfigError::Validation(
                    "[[entries]] groups require a [client] section".into()
                ));
            }
            for group in &self.entries {
                if group.name.is_empty() {
                    bail!(ConfigError::Validation("entry group without a name".into()));
                }
                if group.entry.is_empty() {
                    bail!(ConfigError::Validation(format!(
                        "entry group '{}' has no entry points",
                        group.name
                    )));
                }
            }
        }

        Ok(())
    }
}

impl PipelineConfig {
    fn normalize(&mut self, root: &Path) {
        self.entry = self.entry.iter().map(|p| normalize_path(&root.join(p))).collect();
        self.outdir = normalize_path(&root.join(&self.outdir));
        self.outputs = self
            .outputs
            .iter()
            .map(|p| normalize_path(&root.join(p)))
            .collect();
        if let Some(metafile) = self.metafile.take() {
            self.metafile = Some(normalize_path(&root.join(metafile)));
        }
    }
}

// ============================================================================
// tests
// ============================================================================
