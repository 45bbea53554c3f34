//! Configuration schema for buildwright
//!
//! Configuration is stored at `~/.config/buildwright/config.toml`. Every
//! section is optional; missing fields take the defaults below.

use crate::error::{BuildError, BuildResult};
use crate::toolchain::{CompilerFamily, GeneratorFamily};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General settings
    pub general: GeneralConfig,

    /// Compiler and generator preferences
    pub toolchain: ToolchainConfig,

    /// Package manager fallback chain
    pub package_managers: PackageManagerConfig,

    /// Dependency cache settings
    pub cache: CacheConfig,

    /// Timeouts, retries and parallelism
    pub execution: ExecutionConfig,

    /// Project layout
    pub layout: LayoutConfig,

    /// Extra compiler flags
    pub flags: FlagsConfig,

    /// Extra environment variables passed to build tools
    pub env: BTreeMap<String, String>,
}

/// General application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log format: "text" or "json"
    pub log_format: String,

    /// Append build events to the JSON-lines event journal
    pub event_log: bool,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_format: "text".to_string(),
            event_log: true,
        }
    }
}

/// Toolchain preferences
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolchainConfig {
    /// Compiler families in preference order (empty = platform default)
    pub compilers: Vec<String>,

    /// Generator families in preference order (empty = platform default)
    pub generators: Vec<String>,

    /// C++ language standard passed to the compiler
    pub cxx_standard: String,

    /// Run a trivial compile to record language-standard support
    pub probe_capabilities: bool,

    /// Directories searched in addition to PATH
    pub extra_search_paths: Vec<PathBuf>,
}

impl Default for ToolchainConfig {
    fn default() -> Self {
        Self {
            compilers: vec![],
            generators: vec![],
            cxx_standard: "c++20".to_string(),
            probe_capabilities: true,
            extra_search_paths: vec![],
        }
    }
}

impl ToolchainConfig {
    /// Configured compiler order, parsed
    pub fn compiler_priority(&self) -> BuildResult<Vec<CompilerFamily>> {
        parse_families("toolchain.compilers", &self.compilers)
    }

    /// Configured generator order, parsed
    pub fn generator_priority(&self) -> BuildResult<Vec<GeneratorFamily>> {
        parse_families("toolchain.generators", &self.generators)
    }
}

fn parse_families<T: FromStr<Err = String>>(field: &str, names: &[String]) -> BuildResult<Vec<T>> {
    names
        .iter()
        .map(|name| name.parse())
        .collect::<Result<Vec<T>, String>>()
        .map_err(|reason| BuildError::ConfigValue {
            field: field.to_string(),
            reason,
        })
}

/// Package manager settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PackageManagerConfig {
    /// Fallback chain, most preferred first
    pub chain: Vec<String>,
}

impl Default for PackageManagerConfig {
    fn default() -> Self {
        Self {
            chain: vec![
                "nix".to_string(),
                "vcpkg".to_string(),
                "conan".to_string(),
                "cpm".to_string(),
            ],
        }
    }
}

/// Cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Enable dependency caching (default: true)
    pub enabled: bool,

    /// Entries verified longer ago than this are stale
    pub ttl_hours: u32,

    /// Cache root (defaults to the user cache directory)
    pub dir: Option<PathBuf>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_hours: 24 * 7,
            dir: None,
        }
    }
}

impl CacheConfig {
    /// TTL as a chrono duration
    pub fn ttl(&self) -> chrono::Duration {
        chrono::Duration::hours(i64::from(self.ttl_hours))
    }
}

/// Execution limits
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Concurrent dependency resolutions (0 = host core count)
    pub parallelism: usize,

    /// Timeout for `--version` and capability probes
    pub probe_timeout_secs: u64,

    /// Timeout for each dependency fetch step
    pub fetch_timeout_secs: u64,

    /// Timeout for configure and build invocations
    pub build_timeout_secs: u64,

    /// Wall-clock ceiling for a whole run (0 = none)
    pub run_timeout_secs: u64,

    /// Retries for timed-out dependency fetches
    pub fetch_retries: u32,

    /// Base backoff between fetch retries, doubled per attempt
    pub retry_backoff_ms: u64,

    /// Grace period between SIGTERM and SIGKILL
    pub kill_grace_ms: u64,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            parallelism: 0,
            probe_timeout_secs: 10,
            fetch_timeout_secs: 600,
            build_timeout_secs: 3600,
            run_timeout_secs: 0,
            fetch_retries: 2,
            retry_backoff_ms: 500,
            kill_grace_ms: 2000,
        }
    }
}

impl ExecutionConfig {
    /// Effective parallelism limit
    pub fn parallelism(&self) -> usize {
        if self.parallelism > 0 {
            return self.parallelism;
        }
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn build_timeout(&self) -> Duration {
        Duration::from_secs(self.build_timeout_secs)
    }

    pub fn kill_grace(&self) -> Duration {
        Duration::from_millis(self.kill_grace_ms)
    }

    pub fn run_timeout(&self) -> Option<Duration> {
        (self.run_timeout_secs > 0).then(|| Duration::from_secs(self.run_timeout_secs))
    }
}

/// Project layout
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LayoutConfig {
    /// CMake source directory
    pub source_dir: PathBuf,

    /// Root under which per-target build directories are created
    pub build_root: PathBuf,

    /// Dependency manifest, relative to the source directory
    pub manifest: PathBuf,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            source_dir: PathBuf::from("."),
            build_root: PathBuf::from("build"),
            manifest: PathBuf::from("dependencies.toml"),
        }
    }
}

/// Extra flags appended after the profile, platform and toolchain layers
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FlagsConfig {
    /// Flags applied on top of the generated layers; keyed flags replace in place
    pub overrides: Vec<String>,
}

impl Config {
    /// Reject values the core cannot work with
    pub fn validate(&self) -> BuildResult<()> {
        if !matches!(self.general.log_format.as_str(), "text" | "json") {
            return Err(BuildError::ConfigValue {
                field: "general.log_format".to_string(),
                reason: format!("expected \"text\" or \"json\", got \"{}\"", self.general.log_format),
            });
        }

        for name in &self.package_managers.chain {
            if name.parse::<crate::package::PackageManagerKind>().is_err() {
                return Err(BuildError::ConfigValue {
                    field: "package_managers.chain".to_string(),
                    reason: format!("unknown package manager \"{}\"", name),
                });
            }
        }

        self.toolchain.compiler_priority()?;
        self.toolchain.generator_priority()?;

        if self.execution.probe_timeout_secs == 0
            || self.execution.fetch_timeout_secs == 0
            || self.execution.build_timeout_secs == 0
        {
            return Err(BuildError::ConfigValue {
                field: "execution".to_string(),
                reason: "timeouts must be greater than zero".to_string(),
            });
        }

        crate::invoke::validate_env(&self.env)?;

        Ok(())
    }
}
