//! Clap derive structures for the `onboard` CLI.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

// ── Top-Level CLI ────────────────────────────────────────────────────

/// onboard -- declarative BIG-IP onboarding
#[derive(Debug, Parser)]
#[command(
    name = "onboard",
    version,
    about = "Apply declarative onboarding to BIG-IP devices",
    long_about = "Reconciles a device's system settings and clustering against a JSON\n\
        declaration, then prints the resulting status as JSON.",
    propagate_version = true,
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Command,
}

// ── Global Options ───────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Device profile to use
    #[arg(long, short = 'p', env = "ONBOARD_PROFILE", global = true)]
    pub profile: Option<String>,

    /// Config file (defaults to the platform config directory)
    #[arg(long, env = "ONBOARD_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,
}

// ── Commands ─────────────────────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Reconcile a device against a declaration
    Apply(ApplyArgs),

    /// Inspect configuration
    Config(ConfigArgs),
}

#[derive(Debug, Args)]
pub struct ApplyArgs {
    /// Declaration JSON file
    pub declaration: PathBuf,

    /// Device state recorded by the previous run, in declaration shape
    #[arg(long)]
    pub current: Option<PathBuf>,

    /// Rollback ledger; read before the run and rewritten after it
    #[arg(long)]
    pub rollback: Option<PathBuf>,

    /// Only run the system settings phase
    #[arg(long, conflicts_with = "cluster_only")]
    pub settings_only: bool,

    /// Only run the clustering phase
    #[arg(long)]
    pub cluster_only: bool,
}

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Print the config file path
    Path,

    /// Display the effective configuration (passwords masked)
    Show,

    /// List configured profiles
    Profiles,
}
