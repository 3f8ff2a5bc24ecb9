use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "keel",
    about = "Keel: inspect, traverse and export a content-addressed store",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// TOML configuration file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// Show the metadata of a store path
    Info(InfoArgs),
    /// List the closure of one or more store paths
    Closure(ClosureArgs),
    /// Write the archive of a store path
    Dump(DumpArgs),
    /// Check store paths against their recorded hashes
    Verify(VerifyArgs),
    /// Find the store path with a given hash part
    Locate(LocateArgs),
}

#[derive(Args)]
pub struct InfoArgs {
    pub path: String,
}

#[derive(Args)]
pub struct ClosureArgs {
    #[arg(required = true)]
    pub paths: Vec<String>,
    /// Follow dependents instead of dependencies
    #[arg(long)]
    pub reverse: bool,
    #[arg(long)]
    pub include_outputs: bool,
    #[arg(long)]
    pub include_derivers: bool,
    /// Print dependencies before the paths that use them
    #[arg(long)]
    pub topo: bool,
}

#[derive(Args)]
pub struct DumpArgs {
    pub path: String,
    /// Output file (default: stdout)
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

#[derive(Args)]
pub struct VerifyArgs {
    #[arg(required = true)]
    pub paths: Vec<String>,
}

#[derive(Args)]
pub struct LocateArgs {
    pub hash: String,
}
