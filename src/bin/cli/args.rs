//! CLI argument definitions.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// ODAVL: delta-first static analysis and autonomous code repair.
#[derive(Debug, Parser)]
#[command(name = "odavl", version, about)]
pub struct Cli {
    /// Enable debug logging
    #[arg(long, global = true)]
    pub verbose: bool,

    /// Emit machine-readable JSON instead of human output
    #[arg(long, global = true)]
    pub json: bool,

    /// Configuration file (YAML); defaults apply when absent
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run detectors and compare against the stored baseline
    Analyze(AnalyzeArgs),

    /// Autonomous self-healing
    #[command(subcommand)]
    Autopilot(AutopilotCommands),

    /// CI configuration checks
    #[command(subcommand)]
    Ci(CiCommands),
}

/// Arguments for `odavl analyze`.
#[derive(Debug, Args)]
pub struct AnalyzeArgs {
    /// Workspace path to analyze
    #[arg(default_value = ".")]
    pub path: PathBuf,

    /// Analyze only files changed in the working tree
    #[arg(long)]
    pub changed_only: bool,

    /// Force CI determinism (sequential detectors)
    #[arg(long)]
    pub ci: bool,

    /// Comma-separated detector ids to run
    #[arg(long, value_delimiter = ',')]
    pub detectors: Option<Vec<String>>,

    /// Baseline name to compare against
    #[arg(long)]
    pub baseline: Option<String>,
}

/// Autopilot subcommands.
#[derive(Debug, Subcommand)]
pub enum AutopilotCommands {
    /// Run one self-heal session
    Run(AutopilotRunArgs),
}

/// Arguments for `odavl autopilot run`.
#[derive(Debug, Args)]
pub struct AutopilotRunArgs {
    /// Workspace path to heal
    #[arg(default_value = ".")]
    pub path: PathBuf,

    /// Maximum files a single recipe may touch
    #[arg(long)]
    pub max_files: Option<usize>,

    /// Maximum estimated lines a single recipe may change
    #[arg(long)]
    pub max_loc: Option<u32>,

    /// Plan and report without mutating anything
    #[arg(long)]
    pub dry_run: bool,

    /// Never prompt; suitable for CI
    #[arg(long)]
    pub non_interactive: bool,
}

/// CI subcommands.
#[derive(Debug, Subcommand)]
pub enum CiCommands {
    /// Validate the CI configuration
    Verify(CiArgs),

    /// Diagnose the environment against the configuration
    Doctor(CiArgs),
}

/// Shared arguments for CI checks.
#[derive(Debug, Args)]
pub struct CiArgs {
    /// Workspace path to check
    #[arg(default_value = ".")]
    pub path: PathBuf,
}
