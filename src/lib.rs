//! buildwright - build orchestration core
//!
//! Detects the host platform, compilers, generators and package managers,
//! selects among them with explicit fallback rules, resolves dependencies
//! through a verified on-disk cache and drives CMake through a sandboxed
//! process invoker.

pub mod cache;
pub mod cli;
pub mod config;
pub mod context;
pub mod error;
pub mod events;
pub mod invoke;
pub mod orchestration;
pub mod package;
pub mod platform;
pub mod toolchain;

#[cfg(test)]
mod testutil;

pub use error::{BuildError, BuildResult, ErrorKind};
pub use orchestration::{Orchestrator, OutcomeReport, Overrides};
