//! Dependency resolution across the package manager chain

use crate::context::Fingerprint;
use crate::error::{BuildError, BuildResult};
use crate::invoke::{CancelToken, Deadline, Invocation, Invoker};
use crate::package::{
    DependencySpec, FallbackChain, FetchPlan, Integrity, PackageManagerDescriptor,
    PackageManagerKind,
};
use crate::platform::Platform;
use crate::toolchain::{DecisionStep, ToolInventory};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs;
use tracing::{debug, info, warn};

/// A dependency whose artifact has been fetched and verified
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedDependency {
    pub spec: DependencySpec,
    pub package_manager: PackageManagerKind,
    pub artifact: PathBuf,
    pub fingerprint: Fingerprint,
    pub from_cache: bool,
}

/// Resolves dependencies through whichever backends are installed
pub struct PackageManagerRegistry {
    chain: FallbackChain,
    available: BTreeSet<PackageManagerDescriptor>,
    executables: BTreeMap<PackageManagerKind, PathBuf>,
    platform: Platform,
    invoker: Arc<dyn Invoker>,
    fetch_timeout: Duration,
    deadline: Deadline,
    env: BTreeMap<String, String>,
    cancel: Option<CancelToken>,
}

impl PackageManagerRegistry {
    pub fn new(
        chain: FallbackChain,
        inventory: &ToolInventory,
        platform: &Platform,
        invoker: Arc<dyn Invoker>,
    ) -> Self {
        let available = inventory.available_package_managers(&chain, platform);
        let executables = inventory
            .package_managers
            .iter()
            .filter_map(|c| match c.family {
                crate::toolchain::ToolFamily::PackageManager(kind) => {
                    Some((kind, c.executable_path.clone()))
                }
                _ => None,
            })
            .collect();

        Self {
            chain,
            available,
            executables,
            platform: platform.clone(),
            invoker,
            fetch_timeout: Duration::from_secs(600),
            deadline: Deadline::none(),
            env: BTreeMap::new(),
            cancel: None,
        }
    }

    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    pub fn with_deadline(mut self, deadline: Deadline) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn with_env(mut self, env: BTreeMap<String, String>) -> Self {
        self.env = env;
        self
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Manager a run starts with, plus the reasoning for it
    pub fn select_manager(
        &self,
        preferred: Option<PackageManagerKind>,
    ) -> BuildResult<(PackageManagerDescriptor, Vec<DecisionStep>)> {
        self.chain.select(preferred, &self.available)
    }

    /// Cache key of `spec`, bound to the manager a run starts with
    pub fn fingerprint(
        &self,
        spec: &DependencySpec,
        preferred: Option<PackageManagerKind>,
    ) -> BuildResult<Fingerprint> {
        let (descriptor, _) = self.select_manager(preferred)?;
        spec.fingerprint(descriptor.kind, &self.platform)
    }

    /// Check `artifact` against `expected`
    pub async fn verify(&self, artifact: &Path, expected: &Integrity) -> bool {
        match expected.verify(artifact).await {
            Ok(()) => true,
            Err(e) => {
                warn!("{}", e);
                false
            }
        }
    }

    /// Fetch `spec` into `staging` and verify it.
    ///
    /// Managers are tried in chain order; a failed fetch falls through to the
    /// next one. Integrity failures, timeouts and cancellation do not.
    pub async fn resolve(
        &self,
        spec: &DependencySpec,
        preferred: Option<PackageManagerKind>,
        staging: &Path,
    ) -> BuildResult<ResolvedDependency> {
        let fingerprint = self.fingerprint(spec, preferred)?;
        let Some(integrity) = spec.integrity.as_ref() else {
            return Err(BuildError::integrity(
                staging.join(spec.artifact_stem()),
                format!("{} declares no integrity digest", spec.id()),
            ));
        };

        fs::create_dir_all(staging)
            .await
            .map_err(|e| BuildError::io(format!("creating {}", staging.display()), e))?;

        let (order, steps) = self.chain.plan(preferred, &self.available);
        for step in &steps {
            debug!("{}: {}", spec.id(), step);
        }

        let mut attempted = Vec::new();
        for descriptor in order {
            let kind = descriptor.kind;
            attempted.push(kind.to_string());

            let program = self
                .executables
                .get(&kind)
                .cloned()
                .unwrap_or_else(|| PathBuf::from(kind.binary()));

            let plan = match kind.fetch_plan(spec, staging, &program) {
                Ok(plan) => plan,
                Err(reason) => {
                    info!("Skipping {} for {}: {}", kind, spec.id(), reason);
                    continue;
                }
            };

            if !self.run_plan(kind, &plan, staging).await? {
                info!("{} could not fetch {}, falling back", kind, spec.id());
                continue;
            }

            if fs::metadata(&plan.artifact).await.is_err() {
                warn!(
                    "{} reported success but produced no {}",
                    kind,
                    plan.artifact.display()
                );
                continue;
            }

            integrity.verify(&plan.artifact).await?;
            info!("Resolved {} via {}", spec.id(), kind);

            return Ok(ResolvedDependency {
                spec: spec.clone(),
                package_manager: kind,
                artifact: plan.artifact,
                fingerprint,
                from_cache: false,
            });
        }

        Err(BuildError::NoPackageManagerAvailable { attempted })
    }

    /// Run every step of `plan`. `Ok(false)` means the backend failed and the
    /// next one may be tried.
    async fn run_plan(
        &self,
        kind: PackageManagerKind,
        plan: &FetchPlan,
        staging: &Path,
    ) -> BuildResult<bool> {
        if let Some((ref path, content)) = plan.script {
            fs::write(path, content)
                .await
                .map_err(|e| BuildError::io(format!("writing {}", path.display()), e))?;
        }

        for step in &plan.steps {
            let timeout = self.deadline.clamp(self.fetch_timeout)?;
            let mut invocation = Invocation::new(step.argv.iter().cloned())
                .cwd(staging)
                .envs(&self.env)
                .timeout(timeout);
            if let Some(ref cancel) = self.cancel {
                invocation = invocation.cancel(cancel.clone());
            }

            let result = match self.invoker.invoke(&invocation).await {
                Ok(result) => result,
                Err(BuildError::CommandFailed { command, source }) => {
                    warn!("{}: could not start {}: {}", kind, command, source);
                    return Ok(false);
                }
                Err(e) => return Err(e),
            };

            if result.timed_out {
                return Err(BuildError::InvocationTimeout {
                    command: invocation.command_line(),
                    timeout,
                });
            }
            if !result.success() {
                warn!(
                    exit_code = result.exit_code,
                    "{} failed: {}\n{}",
                    kind,
                    invocation.command_line(),
                    result.stderr_tail()
                );
                return Ok(false);
            }

            if let Some(ref out) = step.stdout_to {
                fs::write(out, &result.stdout)
                    .await
                    .map_err(|e| BuildError::io(format!("writing {}", out.display()), e))?;
            }
        }

        Ok(true)
    }
}
