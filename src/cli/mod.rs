//! Command-line interface definitions.

mod args;

pub use args::{BuildArgs, CacheAction, Cli, Commands, PipelineArg};
