//! Cache entry metadata (`entry.json`)

use crate::context::Fingerprint;
use crate::package::PackageManagerKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;

/// State of a cache entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheStatus {
    /// Artifacts fetched and verified
    Valid,
    /// Kept for inspection but never served
    Stale,
    /// Last resolution failed
    Failed,
}

impl fmt::Display for CacheStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Valid => "valid",
            Self::Stale => "stale",
            Self::Failed => "failed",
        };
        write!(f, "{}", name)
    }
}

/// Metadata of one cached resolution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub fingerprint: Fingerprint,
    pub verified_at: DateTime<Utc>,
    /// File names inside the entry's `artifacts/` directory
    pub artifact_refs: BTreeSet<PathBuf>,
    pub status: CacheStatus,
    /// Digest of the dependency manifest the entry was resolved from
    pub manifest_digest: String,
    pub package_manager: PackageManagerKind,
    /// Human-readable label, e.g. `fmt@10.2.1`
    #[serde(default)]
    pub label: String,
}

impl CacheEntry {
    pub fn valid(
        fingerprint: Fingerprint,
        package_manager: PackageManagerKind,
        manifest_digest: impl Into<String>,
        artifact_refs: BTreeSet<PathBuf>,
    ) -> Self {
        Self {
            fingerprint,
            verified_at: Utc::now(),
            artifact_refs,
            status: CacheStatus::Valid,
            manifest_digest: manifest_digest.into(),
            package_manager,
            label: String::new(),
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// Why this entry may not be served, or `None` if it may
    pub fn miss_reason(&self, ttl: chrono::Duration, manifest_digest: &str) -> Option<String> {
        if self.status != CacheStatus::Valid {
            return Some(format!("status is {}", self.status));
        }
        if Utc::now() - self.verified_at > ttl {
            return Some(format!(
                "verified {} ago, older than the {}h TTL",
                humanize(Utc::now() - self.verified_at),
                ttl.num_hours()
            ));
        }
        if self.manifest_digest != manifest_digest {
            return Some("dependency manifest changed".to_string());
        }
        None
    }
}

fn humanize(age: chrono::Duration) -> String {
    if age.num_days() > 0 {
        format!("{}d", age.num_days())
    } else if age.num_hours() > 0 {
        format!("{}h", age.num_hours())
    } else {
        format!("{}m", age.num_minutes())
    }
}
