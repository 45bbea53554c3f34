//! Compiler, generator and build driver detection and selection
//!
//! [`ProbeContext`] owns the platform probe and the tool probe for one
//! process. It is built once and shared by `Arc`; nothing here is global.

mod candidate;
mod probe;
mod selector;

pub use candidate::{
    CompilerFamily, Confidence, FlagSyntax, GeneratorFamily, ToolFamily, ToolKind, ToolVersion,
    ToolchainCandidate, BUILD_DRIVER,
};
pub use probe::{ToolInventory, ToolProbe};
pub use selector::{
    default_compiler_priority, default_generator_priority, DecisionStep, Role, Selection,
    StepOutcome, ToolchainSelector,
};

use crate::config::Config;
use crate::invoke::Invoker;
use crate::platform::{HostEnv, Platform, PlatformProbe};
use std::sync::Arc;

/// Probe state shared by every run of a process
pub struct ProbeContext {
    platform: PlatformProbe,
    tools: ToolProbe,
}

impl ProbeContext {
    pub fn new(platform: PlatformProbe, tools: ToolProbe) -> Self {
        Self { platform, tools }
    }

    /// Probes for the current host using the configured search paths
    pub fn from_config(config: &Config, env: HostEnv, invoker: Arc<dyn Invoker>) -> Self {
        let tools = ToolProbe::new(&env.search_path(), invoker)
            .with_extra_dirs(&config.toolchain.extra_search_paths)
            .with_timeout(config.execution.probe_timeout())
            .with_capability_probe(config.toolchain.probe_capabilities);
        Self::new(PlatformProbe::new(env), tools)
    }

    pub fn platform(&self) -> &Platform {
        self.platform.detect()
    }

    pub fn tools(&self) -> &ToolProbe {
        &self.tools
    }
}
