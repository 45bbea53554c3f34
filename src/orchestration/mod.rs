//! Build orchestration
//!
//! [`Orchestrator::run`] walks one run through its phases:
//! - probe the platform and installed tools
//! - select compiler, generator and package manager
//! - build the context and resolve dependencies through the cache
//! - run the configure and action commands

mod orchestrator;
mod report;
mod state;

pub use orchestrator::{Orchestrator, Overrides};
pub use report::{FailureReport, OutcomeReport};
pub use state::{Phase, RunState};
