//! Project dependency manifest (`dependencies.toml`)
//!
//! ```toml
//! [[dependency]]
//! name = "fmt"
//! version = "10.2.1"
//! integrity = "sha256-..."
//! source = "https://github.com/fmtlib/fmt/archive/10.2.1.tar.gz"
//! ```

use crate::context::Fingerprint;
use crate::error::{BuildError, BuildResult};
use crate::package::{Integrity, PackageManagerKind};
use crate::platform::Platform;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tracing::debug;

/// One declared dependency
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DependencySpec {
    pub name: String,
    pub version: String,
    /// Required before any artifact is accepted
    #[serde(default)]
    pub integrity: Option<Integrity>,
    /// Archive URL, needed by the CPM backend
    #[serde(default)]
    pub source: Option<String>,
}

#[derive(Serialize)]
struct DependencyIdentity<'a> {
    name: &'a str,
    version: &'a str,
    integrity: Option<String>,
    source: Option<&'a str>,
    package_manager: PackageManagerKind,
    os_family: &'a str,
    arch: &'a str,
}

impl DependencySpec {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            integrity: None,
            source: None,
        }
    }

    pub fn with_integrity(mut self, integrity: Integrity) -> Self {
        self.integrity = Some(integrity);
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// `name@version`
    pub fn id(&self) -> String {
        format!("{}@{}", self.name, self.version)
    }

    /// Base file name of fetched artifacts
    pub fn artifact_stem(&self) -> String {
        format!("{}-{}", self.name, self.version)
    }

    /// Cache key of this dependency as resolved by `manager` on `platform`
    pub fn fingerprint(
        &self,
        manager: PackageManagerKind,
        platform: &Platform,
    ) -> BuildResult<Fingerprint> {
        Fingerprint::of(&DependencyIdentity {
            name: &self.name,
            version: &self.version,
            integrity: self.integrity.as_ref().map(ToString::to_string),
            source: self.source.as_deref(),
            package_manager: manager,
            os_family: platform.os_family.as_str(),
            arch: platform.arch.as_str(),
        })
    }

    fn validate(&self) -> Result<(), String> {
        let safe = |s: &str| {
            !s.is_empty()
                && !s.starts_with(['.', '-'])
                && s
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '+' | '-'))
        };
        if !safe(&self.name) {
            return Err(format!("invalid dependency name '{}'", self.name));
        }
        if !safe(&self.version) {
            return Err(format!(
                "invalid version '{}' for {}",
                self.version, self.name
            ));
        }
        if let Some(ref source) = self.source {
            if !(source.starts_with("https://")
                || source.starts_with("http://")
                || source.starts_with("file://"))
            {
                return Err(format!(
                    "source for {} must be an http(s) or file URL",
                    self.name
                ));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Default, Deserialize)]
struct ManifestFile {
    #[serde(default)]
    dependency: Vec<DependencySpec>,
}

/// Parsed manifest plus the digest of its bytes
#[derive(Debug, Clone, Default)]
pub struct DependencyManifest {
    pub path: PathBuf,
    pub dependencies: Vec<DependencySpec>,
    /// Hex SHA-256 of the manifest file; cache entries recorded under a
    /// different digest are stale
    pub digest: String,
}

impl DependencyManifest {
    /// Load `path`; a missing file is an empty manifest
    pub async fn load(path: &Path) -> BuildResult<Self> {
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No dependency manifest at {}", path.display());
                Vec::new()
            }
            Err(e) => {
                return Err(BuildError::io(
                    format!("reading manifest {}", path.display()),
                    e,
                ))
            }
        };
        Self::parse(path, &bytes)
    }

    pub fn parse(path: &Path, bytes: &[u8]) -> BuildResult<Self> {
        let invalid = |reason: String| BuildError::ManifestInvalid {
            path: path.to_path_buf(),
            reason,
        };

        let text = std::str::from_utf8(bytes).map_err(|e| invalid(e.to_string()))?;
        let file: ManifestFile = toml::from_str(text).map_err(|e| invalid(e.to_string()))?;

        let mut seen = BTreeSet::new();
        for dep in &file.dependency {
            dep.validate().map_err(invalid)?;
            if !seen.insert(dep.name.as_str()) {
                return Err(invalid(format!("duplicate dependency '{}'", dep.name)));
            }
        }

        Ok(Self {
            path: path.to_path_buf(),
            dependencies: file.dependency,
            digest: hex::encode(Sha256::digest(bytes)),
        })
    }

    pub fn is_empty(&self) -> bool {
        self.dependencies.is_empty()
    }
}
