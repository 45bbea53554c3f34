//! Host platform detection
//!
//! [`PlatformProbe::detect`] computes a [`Platform`] once and returns the
//! cached value afterwards. Missing or malformed distribution metadata never
//! fails detection; it degrades to an unknown distro in the `other` family.

mod distro;
mod shell;

pub use distro::{classify, DistroMatch, OsRelease};
pub use shell::{detected_marker, in_reproducible_shell};

use crate::error::BuildError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::{debug, warn};

/// Operating system family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OsFamily {
    Windows,
    Linux,
    Macos,
    Wasm,
}

impl OsFamily {
    /// Map the compile-time target onto a family
    pub fn current() -> Option<Self> {
        if cfg!(target_family = "wasm") {
            return Some(Self::Wasm);
        }
        match std::env::consts::OS {
            "linux" => Some(Self::Linux),
            "macos" => Some(Self::Macos),
            "windows" => Some(Self::Windows),
            "emscripten" => Some(Self::Wasm),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Windows => "windows",
            Self::Linux => "linux",
            Self::Macos => "macos",
            Self::Wasm => "wasm",
        }
    }
}

impl fmt::Display for OsFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// CPU architecture
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Arch {
    X86_64,
    Arm64,
    Unknown,
}

impl Arch {
    pub fn current() -> Self {
        match std::env::consts::ARCH {
            "x86_64" => Self::X86_64,
            "aarch64" => Self::Arm64,
            _ => Self::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::X86_64 => "x86_64",
            Self::Arm64 => "arm64",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for Arch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Linux distribution family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DistroFamily {
    Arch,
    Debian,
    Fedora,
    Suse,
    Other,
}

impl fmt::Display for DistroFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Arch => "arch",
            Self::Debian => "debian",
            Self::Fedora => "fedora",
            Self::Suse => "suse",
            Self::Other => "other",
        };
        write!(f, "{}", name)
    }
}

/// Detected host platform
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Platform {
    pub os_family: OsFamily,
    pub arch: Arch,
    pub distro: Option<String>,
    pub distro_family: Option<DistroFamily>,
    pub in_reproducible_shell: bool,
}

impl Platform {
    /// Short human-readable description, e.g. `linux/x86_64 (cachyos, arch)`
    pub fn describe(&self) -> String {
        let mut out = format!("{}/{}", self.os_family, self.arch);
        if let Some(family) = self.distro_family {
            let distro = self.distro.as_deref().unwrap_or("unknown");
            out.push_str(&format!(" ({}, {})", distro, family));
        }
        if self.in_reproducible_shell {
            out.push_str(" [reproducible shell]");
        }
        out
    }
}

/// Snapshot of process environment variables
///
/// Captured once and passed to probes so tests can supply their own.
#[derive(Debug, Clone, Default)]
pub struct HostEnv {
    vars: HashMap<String, String>,
}

impl HostEnv {
    /// Capture the current process environment
    pub fn capture() -> Self {
        Self {
            vars: std::env::vars().collect(),
        }
    }

    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            vars: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    /// The `PATH` value, or an empty search path
    pub fn search_path(&self) -> OsString {
        self.vars
            .get("PATH")
            .map(OsString::from)
            .unwrap_or_default()
    }
}

/// Well-known os-release locations, relative to the probe root
const OS_RELEASE_PATHS: &[&str] = &["etc/os-release", "usr/lib/os-release"];

/// Platform detector with compute-once caching
pub struct PlatformProbe {
    root: PathBuf,
    env: HostEnv,
    os_family: Option<OsFamily>,
    arch: Arch,
    cached: OnceLock<Platform>,
}

impl PlatformProbe {
    /// Probe the running host
    pub fn new(env: HostEnv) -> Self {
        Self {
            root: PathBuf::from("/"),
            env,
            os_family: OsFamily::current(),
            arch: Arch::current(),
            cached: OnceLock::new(),
        }
    }

    /// Read distribution metadata below `root` instead of `/`
    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = root.into();
        self
    }

    /// Override the detected OS family and architecture
    pub fn with_host(mut self, os_family: OsFamily, arch: Arch) -> Self {
        self.os_family = Some(os_family);
        self.arch = arch;
        self
    }

    /// Detect the platform; the first call computes, later calls return the cache
    pub fn detect(&self) -> &Platform {
        self.cached.get_or_init(|| self.compute())
    }

    fn compute(&self) -> Platform {
        let os_family = self.os_family.unwrap_or_else(|| {
            degraded(format!(
                "unsupported operating system '{}', treating as linux",
                std::env::consts::OS
            ));
            OsFamily::Linux
        });

        if self.arch == Arch::Unknown {
            degraded(format!(
                "unrecognised architecture '{}'",
                std::env::consts::ARCH
            ));
        }

        let (distro, distro_family) = if os_family == OsFamily::Linux {
            let matched = self.detect_distro();
            (matched.distro, Some(matched.family))
        } else {
            (None, None)
        };

        let in_shell = in_reproducible_shell(&self.env);
        if let Some(marker) = detected_marker(&self.env) {
            debug!("Reproducible shell detected via {}", marker);
        }

        let platform = Platform {
            os_family,
            arch: self.arch,
            distro,
            distro_family,
            in_reproducible_shell: in_shell,
        };
        debug!(platform = %platform.describe(), "Platform detected");
        platform
    }

    fn detect_distro(&self) -> DistroMatch {
        let unknown = DistroMatch {
            distro: None,
            family: DistroFamily::Other,
        };

        let Some((path, content)) = self.read_os_release() else {
            degraded("no os-release file found".to_string());
            return unknown;
        };

        match OsRelease::parse(&content) {
            Some(release) => classify(&release),
            None => {
                degraded(format!("malformed os-release at {}", path.display()));
                unknown
            }
        }
    }

    fn read_os_release(&self) -> Option<(PathBuf, String)> {
        OS_RELEASE_PATHS.iter().find_map(|rel| {
            let path = self.root.join(rel);
            read_metadata(&path).map(|content| (path, content))
        })
    }
}

fn read_metadata(path: &Path) -> Option<String> {
    match std::fs::read(path) {
        Ok(bytes) => Some(String::from_utf8_lossy(&bytes).into_owned()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
        Err(e) => {
            degraded(format!("reading {}: {}", path.display(), e));
            None
        }
    }
}

fn degraded(reason: String) {
    warn!("{}", BuildError::ProbeDegraded { reason });
}
