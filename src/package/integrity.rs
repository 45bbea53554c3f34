//! Artifact integrity declarations and verification

use crate::error::{BuildError, BuildResult};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256, Sha512};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// Digest algorithm of an integrity declaration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Algorithm {
    Sha256,
    Sha512,
}

impl Algorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sha256 => "sha256",
            Self::Sha512 => "sha512",
        }
    }

    fn hex_len(&self) -> usize {
        match self {
            Self::Sha256 => 64,
            Self::Sha512 => 128,
        }
    }
}

/// Expected digest, written `sha256-<hex>` or `sha512-<hex>`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Integrity {
    pub algorithm: Algorithm,
    /// Lowercase hex
    pub digest: String,
}

impl Integrity {
    /// Digest a file with `algorithm`, off the async runtime
    pub async fn compute(path: &Path, algorithm: Algorithm) -> BuildResult<Self> {
        let target = path.to_path_buf();
        let digest = tokio::task::spawn_blocking(move || match algorithm {
            Algorithm::Sha256 => digest_file::<Sha256>(&target),
            Algorithm::Sha512 => digest_file::<Sha512>(&target),
        })
        .await
        .map_err(|e| BuildError::Internal(format!("hash task failed: {}", e)))?
        .map_err(|e| BuildError::io(format!("reading {}", path.display()), e))?;

        Ok(Self { algorithm, digest })
    }

    /// Check `path` against this declaration.
    ///
    /// Unreadable artifacts and mismatches both fail closed.
    pub async fn verify(&self, path: &Path) -> BuildResult<()> {
        let actual = Self::compute(path, self.algorithm)
            .await
            .map_err(|e| BuildError::integrity(path, format!("artifact unreadable: {}", e)))?;

        if actual.digest != self.digest {
            return Err(BuildError::integrity(
                path,
                format!("expected {}, got {}", self, actual),
            ));
        }
        Ok(())
    }
}

fn digest_file<D: Digest + std::io::Write>(path: &Path) -> std::io::Result<String> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = D::new();
    std::io::copy(&mut file, &mut hasher)?;
    Ok(hex::encode(hasher.finalize()))
}

impl fmt::Display for Integrity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.algorithm.as_str(), self.digest)
    }
}

impl FromStr for Integrity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (algo, digest) = s
            .split_once('-')
            .ok_or_else(|| format!("integrity '{}' must look like sha256-<hex>", s))?;

        let algorithm = match algo {
            "sha256" => Algorithm::Sha256,
            "sha512" => Algorithm::Sha512,
            other => return Err(format!("unsupported integrity algorithm '{}'", other)),
        };

        let digest = digest.to_ascii_lowercase();
        if digest.len() != algorithm.hex_len() || !digest.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(format!(
                "{} digest must be {} hex characters",
                algorithm.as_str(),
                algorithm.hex_len()
            ));
        }

        Ok(Self { algorithm, digest })
    }
}

impl TryFrom<String> for Integrity {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Integrity> for String {
    fn from(value: Integrity) -> Self {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use tempfile::TempDir;

    // sha256("hello")
    const HELLO_SHA256: &str = "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824";

    #[test]
    fn parse_and_display() {
        let i: Integrity = format!("sha256-{}", HELLO_SHA256.to_uppercase()).parse().unwrap();
        assert_eq!(i.algorithm, Algorithm::Sha256);
        assert_eq!(i.to_string(), format!("sha256-{}", HELLO_SHA256));
    }

    #[test]
    fn parse_rejects_bad_input() {
        assert!("md5-abc".parse::<Integrity>().is_err());
        assert!("sha256-xyz".parse::<Integrity>().is_err());
        assert!("sha256".parse::<Integrity>().is_err());
        assert!(format!("sha512-{}", HELLO_SHA256).parse::<Integrity>().is_err());
    }

    #[tokio::test]
    async fn verify_matching_artifact() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("pkg.tgz");
        std::fs::write(&path, "hello").unwrap();

        let i: Integrity = format!("sha256-{}", HELLO_SHA256).parse().unwrap();
        assert!(i.verify(&path).await.is_ok());

        let sha512 = Integrity::compute(&path, Algorithm::Sha512).await.unwrap();
        assert_eq!(sha512.digest.len(), 128);
        assert!(sha512.verify(&path).await.is_ok());
    }

    #[tokio::test]
    async fn corrupted_artifact_fails_closed() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("pkg.tgz");
        std::fs::write(&path, "hellO").unwrap();

        let i: Integrity = format!("sha256-{}", HELLO_SHA256).parse().unwrap();
        let err = i.verify(&path).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::IntegrityVerification);

        let missing = i.verify(&dir.path().join("absent")).await.unwrap_err();
        assert_eq!(missing.kind(), ErrorKind::IntegrityVerification);
    }
}
