//! CLI argument definitions using clap derive

use crate::context::Profile;
use crate::package::PackageManagerKind;
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// buildwright - build orchestration for C++ engine projects
///
/// Detects compilers, generators and package managers, picks one of each,
/// resolves dependencies through a verified cache and drives CMake.
#[derive(Parser, Debug)]
#[command(name = "buildwright")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity (-v info, -vv debug)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// Configuration file path
    #[arg(short, long, global = true, env = "BUILDWRIGHT_CONFIG")]
    pub config: Option<PathBuf>,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Configure the build directory
    Configure(BuildArgs),

    /// Configure and build a target
    Build(BuildArgs),

    /// Remove build outputs of a target
    Clean(BuildArgs),

    /// Build and run the test suite
    Test(BuildArgs),

    /// Build and package a target
    Package(BuildArgs),

    /// Re-probe the host and show what would be selected
    Validate(ValidateArgs),

    /// Manage the dependency cache
    Cache(CacheArgs),
}

/// Arguments shared by configure, build, clean, test and package
#[derive(Parser, Debug, Clone)]
pub struct BuildArgs {
    /// CMake target
    #[arg(short, long, default_value = "all")]
    pub target: String,

    /// Build profile (debug, release, relwithdebinfo, minsizerel)
    #[arg(short, long, default_value = "debug")]
    pub profile: Profile,

    /// Compiler family, executable name or path (e.g. clang, g++-13)
    #[arg(long)]
    pub compiler: Option<String>,

    /// Package manager to try first (nix, vcpkg, conan, cpm)
    #[arg(long)]
    pub package_manager: Option<PackageManagerKind>,

    /// Show the plan without fetching or building
    #[arg(long)]
    pub dry_run: bool,

    /// Print the outcome report as JSON
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the validate command
#[derive(Parser, Debug)]
pub struct ValidateArgs {
    /// Compiler to select, as for build
    #[arg(long)]
    pub compiler: Option<String>,

    /// Print the probe results as JSON
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the cache command
#[derive(Parser, Debug)]
pub struct CacheArgs {
    /// Subcommand for cache
    #[command(subcommand)]
    pub action: CacheAction,
}

/// Cache subcommands
#[derive(Subcommand, Debug)]
pub enum CacheAction {
    /// List cache entries
    List {
        /// Output format
        #[arg(short, long, default_value = "table")]
        format: OutputFormat,
    },

    /// Remove every cache entry
    Clear {
        /// Skip confirmation
        #[arg(short, long)]
        yes: bool,
    },

    /// Remove one cache entry
    Invalidate {
        /// Fingerprint of the entry (64 hex characters)
        fingerprint: String,
    },
}

/// Output format for listings
#[derive(ValueEnum, Clone, Copy, Debug, Default)]
pub enum OutputFormat {
    #[default]
    Table,
    Json,
    Plain,
}
