//! Outcome of a run

use crate::context::{Action, Fingerprint, Profile};
use crate::error::{BuildError, ErrorKind};
use crate::orchestration::Phase;
use crate::package::ResolvedDependency;
use crate::toolchain::DecisionStep;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

/// Why a run failed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureReport {
    /// Phase that was active when the error surfaced
    pub phase: Phase,
    pub kind: ErrorKind,
    pub message: String,
    /// Alternatives examined before giving up
    pub attempted: Vec<String>,
    /// Last lines of the failing tool's stderr
    pub stderr_tail: Option<String>,
    pub hint: Option<String>,
}

impl FailureReport {
    pub fn new(phase: Phase, error: &BuildError) -> Self {
        Self {
            phase,
            kind: error.kind(),
            message: error.to_string(),
            attempted: error.attempted().to_vec(),
            stderr_tail: error.stderr().map(str::to_string),
            hint: error.hint().map(str::to_string),
        }
    }
}

/// Everything a caller needs to know about one run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutcomeReport {
    pub run_id: Uuid,
    pub action: Action,
    pub target: String,
    pub profile: Profile,
    /// `succeeded` or `failed`
    pub state: Phase,
    pub platform: Option<String>,
    pub fingerprint: Option<Fingerprint>,
    pub reasoning: Vec<DecisionStep>,
    pub dependencies: Vec<ResolvedDependency>,
    pub cache_hits: usize,
    pub cache_misses: usize,
    pub dry_run: bool,
    /// Commands run, or that would run under `--dry-run`
    pub commands: Vec<Vec<String>>,
    pub failure: Option<FailureReport>,
    #[serde(with = "duration_ms")]
    pub duration: Duration,
}

impl OutcomeReport {
    pub fn new(run_id: Uuid, action: Action, target: &str, profile: Profile, dry_run: bool) -> Self {
        Self {
            run_id,
            action,
            target: target.to_string(),
            profile,
            state: Phase::Start,
            platform: None,
            fingerprint: None,
            reasoning: vec![],
            dependencies: vec![],
            cache_hits: 0,
            cache_misses: 0,
            dry_run,
            commands: vec![],
            failure: None,
            duration: Duration::ZERO,
        }
    }

    pub fn succeeded(&self) -> bool {
        self.state == Phase::Succeeded
    }

    /// Error kind of a failed run
    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.failure.as_ref().map(|f| f.kind)
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}
