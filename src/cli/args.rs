use clap::{ColorChoice, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Incremental build orchestrator CLI
#[derive(Parser, Debug, Clone)]
#[command(version, about, long_about = None, arg_required_else_help = true)]
pub struct Cli {
    /// Control colored output (auto, always, never)
    #[arg(long, global = true, default_value = "auto")]
    pub color: ColorChoice,

    /// Config file path (default: kiln.toml)
    #[arg(short = 'C', long, default_value = "kiln.toml", value_hint = clap::ValueHint::FilePath)]
    pub config: PathBuf,

    /// Verbose diagnostic output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// subcommands
    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Build the configured pipelines
    #[command(visible_alias = "b")]
    Build {
        #[command(flatten)]
        build_args: BuildArgs,

        /// Build only this pipeline
        #[arg(long, value_enum)]
        only: Option<PipelineArg>,

        /// Build the configured [[entries]] groups instead of [client]
        #[arg(long)]
        entries: bool,
    },

    /// Watch sources and rebuild on change
    #[command(visible_alias = "w")]
    Watch {
        #[command(flatten)]
        build_args: BuildArgs,

        /// Debounce window in milliseconds (overrides config)
        #[arg(short, long)]
        debounce: Option<u64>,
    },

    /// Remove and recreate output directories
    Clean,

    /// Build cache maintenance
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

/// Which pipeline to build with `--only`.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineArg {
    Server,
    Client,
}

/// Shared build arguments for Build and Watch commands
#[derive(clap::Args, Debug, Clone)]
pub struct BuildArgs {
    /// Clean output directories completely before building
    #[arg(short, long)]
    pub clean: bool,

    /// Bypass the build cache for this invocation
    #[arg(long)]
    pub no_cache: bool,

    /// Build in production mode
    #[arg(short, long)]
    pub production: bool,
}

/// Cache maintenance subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum CacheAction {
    /// Show entry count and stored size
    Stats,

    /// Remove every cache entry
    Clear,

    /// Remove entries older than the TTL
    Sweep {
        /// TTL in seconds (overrides [cache].ttl_secs)
        #[arg(long)]
        ttl_secs: Option<u64>,
    },

    /// Keep only the newest N entries
    Retain {
        /// Number of entries to keep (0 removes everything)
        n: usize,
    },
}
