//! Run state machine

use crate::error::{BuildError, BuildResult, ErrorKind};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Phase of a run. Phases only move forward; `Succeeded` and `Failed` are
/// terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Start,
    Probing,
    Selecting,
    ContextBuilt,
    ResolvingDependencies,
    Building,
    Succeeded,
    Failed,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Probing => "probing",
            Self::Selecting => "selecting",
            Self::ContextBuilt => "context_built",
            Self::ResolvingDependencies => "resolving_dependencies",
            Self::Building => "building",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Current phase plus, once failed, where and why
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunState {
    phase: Phase,
    failure: Option<(Phase, ErrorKind)>,
}

impl Default for RunState {
    fn default() -> Self {
        Self::new()
    }
}

impl RunState {
    pub fn new() -> Self {
        Self {
            phase: Phase::Start,
            failure: None,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Phase the run failed in and the error kind
    pub fn failure(&self) -> Option<(Phase, ErrorKind)> {
        self.failure
    }

    /// Move forward to `next`. Phases may be skipped, never revisited.
    pub fn advance(&mut self, next: Phase) -> BuildResult<()> {
        if next == Phase::Failed {
            return Err(BuildError::Internal(
                "use fail() to enter the failed phase".to_string(),
            ));
        }
        if self.phase.is_terminal() || next <= self.phase {
            return Err(BuildError::Internal(format!(
                "illegal transition {} -> {}",
                self.phase, next
            )));
        }
        self.phase = next;
        Ok(())
    }

    /// Enter `Failed`, remembering the phase that failed. A terminal state
    /// is left untouched.
    pub fn fail(&mut self, kind: ErrorKind) -> Phase {
        if !self.phase.is_terminal() {
            self.failure = Some((self.phase, kind));
            self.phase = Phase::Failed;
        }
        self.failure.map(|(phase, _)| phase).unwrap_or(self.phase)
    }
}
