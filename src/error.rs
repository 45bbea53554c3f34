//! Error types for buildwright
//!
//! All modules use `BuildResult<T>` as their return type. Every variant maps
//! onto one [`ErrorKind`], which is what reports and exit codes are keyed on.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for buildwright operations
pub type BuildResult<T> = Result<T, BuildError>;

/// Coarse error taxonomy surfaced in outcome reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    ProbeDegraded,
    NoCompilerAvailable,
    NoGeneratorAvailable,
    NoPackageManagerAvailable,
    InvalidInvocation,
    IntegrityVerification,
    InvocationTimeout,
    CacheCorruption,
    BuildFailed,
    Cancelled,
    Config,
    Io,
    Internal,
}

impl ErrorKind {
    /// Stable identifier used in reports and the event journal
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ProbeDegraded => "probe_degraded",
            Self::NoCompilerAvailable => "no_compiler_available",
            Self::NoGeneratorAvailable => "no_generator_available",
            Self::NoPackageManagerAvailable => "no_package_manager_available",
            Self::InvalidInvocation => "invalid_invocation",
            Self::IntegrityVerification => "integrity_verification",
            Self::InvocationTimeout => "invocation_timeout",
            Self::CacheCorruption => "cache_corruption",
            Self::BuildFailed => "build_failed",
            Self::Cancelled => "cancelled",
            Self::Config => "config",
            Self::Io => "io",
            Self::Internal => "internal",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// All errors that can occur in buildwright
#[derive(Error, Debug)]
pub enum BuildError {
    // Probe errors (never fatal, logged and defaulted)
    #[error("Platform probe degraded: {reason}")]
    ProbeDegraded { reason: String },

    // Selection errors
    #[error("No compiler available{}: examined [{}]", requested_suffix(.requested), .attempted.join(", "))]
    NoCompilerAvailable {
        requested: Option<String>,
        attempted: Vec<String>,
    },

    #[error("No build generator available{}: examined [{}]", requested_suffix(.requested), .attempted.join(", "))]
    NoGeneratorAvailable {
        requested: Option<String>,
        attempted: Vec<String>,
    },

    #[error("No package manager available: tried [{}]", .attempted.join(", "))]
    NoPackageManagerAvailable { attempted: Vec<String> },

    // Invocation errors
    #[error("Invalid invocation: {reason}")]
    InvalidInvocation { reason: String },

    #[error("Command timed out after {}ms: {command}", .timeout.as_millis())]
    InvocationTimeout { command: String, timeout: Duration },

    #[error("Run exceeded its wall-clock limit of {}s", .limit.as_secs())]
    RunDeadlineExceeded { limit: Duration },

    #[error("Command failed: {command}")]
    CommandFailed {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Build step failed: {command}, exit code: {code}")]
    BuildFailed {
        command: String,
        code: i32,
        stderr_tail: String,
    },

    #[error("Operation cancelled")]
    Cancelled,

    // Verification errors
    #[error("Integrity verification failed for {artifact}: {reason}")]
    IntegrityVerification { artifact: PathBuf, reason: String },

    // Cache errors
    #[error("Cache entry {fingerprint} is corrupt: {reason}")]
    CacheCorruption { fingerprint: String, reason: String },

    #[error("Failed to lock cache entry {path}: {source}")]
    CacheLock {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // Configuration errors
    #[error("Invalid configuration at {path}: {reason}")]
    ConfigInvalid { path: PathBuf, reason: String },

    #[error("Invalid configuration value {field}: {reason}")]
    ConfigValue { field: String, reason: String },

    #[error("Invalid dependency manifest {path}: {reason}")]
    ManifestInvalid { path: PathBuf, reason: String },

    // IO errors
    #[error("IO error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    // General errors
    #[error("Internal error: {0}")]
    Internal(String),

    /// Outcome of a resolution another caller was waiting on
    #[error(transparent)]
    Shared(Arc<BuildError>),
}

fn requested_suffix(requested: &Option<String>) -> String {
    match requested {
        Some(name) => format!(" matching '{}'", name),
        None => String::new(),
    }
}

impl BuildError {
    /// Create an IO error with context
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Create a command failed error
    pub fn command_failed(command: impl Into<String>, source: std::io::Error) -> Self {
        Self::CommandFailed {
            command: command.into(),
            source,
        }
    }

    /// Create an invalid invocation error
    pub fn invalid_invocation(reason: impl Into<String>) -> Self {
        Self::InvalidInvocation {
            reason: reason.into(),
        }
    }

    /// Create an integrity verification error
    pub fn integrity(artifact: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::IntegrityVerification {
            artifact: artifact.into(),
            reason: reason.into(),
        }
    }

    /// Map this error onto the reporting taxonomy
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ProbeDegraded { .. } => ErrorKind::ProbeDegraded,
            Self::NoCompilerAvailable { .. } => ErrorKind::NoCompilerAvailable,
            Self::NoGeneratorAvailable { .. } => ErrorKind::NoGeneratorAvailable,
            Self::NoPackageManagerAvailable { .. } => ErrorKind::NoPackageManagerAvailable,
            Self::InvalidInvocation { .. } => ErrorKind::InvalidInvocation,
            Self::InvocationTimeout { .. } | Self::RunDeadlineExceeded { .. } => {
                ErrorKind::InvocationTimeout
            }
            Self::BuildFailed { .. } => ErrorKind::BuildFailed,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::IntegrityVerification { .. } => ErrorKind::IntegrityVerification,
            Self::CacheCorruption { .. } => ErrorKind::CacheCorruption,
            Self::ConfigInvalid { .. } | Self::ConfigValue { .. } | Self::ManifestInvalid { .. } => {
                ErrorKind::Config
            }
            Self::CommandFailed { .. } | Self::CacheLock { .. } | Self::Io { .. } => ErrorKind::Io,
            Self::Json(_) | Self::TomlParse(_) | Self::Internal(_) => ErrorKind::Internal,
            Self::Shared(inner) => inner.kind(),
        }
    }

    /// Check if error is retryable
    ///
    /// Only per-invocation timeouts qualify; the run-level deadline does not.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Shared(inner) => inner.is_retryable(),
            other => matches!(other, Self::InvocationTimeout { .. }),
        }
    }

    /// Alternatives that were examined before this error was raised
    pub fn attempted(&self) -> &[String] {
        match self {
            Self::NoCompilerAvailable { attempted, .. }
            | Self::NoGeneratorAvailable { attempted, .. }
            | Self::NoPackageManagerAvailable { attempted } => attempted,
            Self::Shared(inner) => inner.attempted(),
            _ => &[],
        }
    }

    /// Captured stderr of the failing invocation, if any
    pub fn stderr(&self) -> Option<&str> {
        match self {
            Self::BuildFailed { stderr_tail, .. } => Some(stderr_tail),
            Self::Shared(inner) => inner.stderr(),
            _ => None,
        }
    }

    /// Get actionable hint for the error
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Self::NoCompilerAvailable { requested: Some(_), .. } => {
                Some("Run: buildwright validate to list detected compilers")
            }
            Self::NoCompilerAvailable { requested: None, .. } => {
                Some("Install gcc or clang, or add its directory to toolchain.extra_search_paths")
            }
            Self::NoGeneratorAvailable { .. } => Some("Install cmake and ninja (or make)"),
            Self::NoPackageManagerAvailable { .. } => {
                Some("Install vcpkg or conan, or declare a source URL so CPM can fetch it")
            }
            Self::IntegrityVerification { .. } => {
                Some("Check the integrity field in dependencies.toml against the upstream release")
            }
            Self::CacheLock { .. } => Some("Another build may be resolving the same dependency"),
            Self::Shared(inner) => inner.hint(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = BuildError::NoCompilerAvailable {
            requested: Some("nonexistent-cc".to_string()),
            attempted: vec![],
        };
        let msg = err.to_string();
        assert!(msg.contains("No compiler available"));
        assert!(msg.contains("nonexistent-cc"));
    }

    #[test]
    fn error_kind_mapping() {
        let err = BuildError::integrity("/tmp/a.tgz", "digest mismatch");
        assert_eq!(err.kind(), ErrorKind::IntegrityVerification);

        let err = BuildError::RunDeadlineExceeded {
            limit: Duration::from_secs(10),
        };
        assert_eq!(err.kind(), ErrorKind::InvocationTimeout);
    }

    #[test]
    fn error_retryable() {
        let timeout = BuildError::InvocationTimeout {
            command: "conan install".to_string(),
            timeout: Duration::from_secs(1),
        };
        assert!(timeout.is_retryable());
        assert!(!BuildError::integrity("/tmp/a", "x").is_retryable());
        assert!(!BuildError::RunDeadlineExceeded {
            limit: Duration::from_secs(1)
        }
        .is_retryable());
    }

    #[test]
    fn error_hint() {
        let err = BuildError::NoGeneratorAvailable {
            requested: None,
            attempted: vec!["ninja".to_string()],
        };
        assert_eq!(err.hint(), Some("Install cmake and ninja (or make)"));
        assert_eq!(err.attempted(), ["ninja".to_string()]);
    }

    #[test]
    fn shared_error_keeps_kind_and_hint() {
        let inner = Arc::new(BuildError::NoPackageManagerAvailable {
            attempted: vec!["conan".to_string()],
        });
        let err = BuildError::Shared(inner.clone());
        assert_eq!(err.kind(), ErrorKind::NoPackageManagerAvailable);
        assert_eq!(err.attempted(), ["conan".to_string()]);
        assert_eq!(err.hint(), inner.hint());
        assert_eq!(err.to_string(), inner.to_string());
    }
}
