//! Drives one run from probing to the final build command

use crate::cache::{DependencyCache, Resolution};
use crate::config::{Config, ConfigManager};
use crate::context::{Action, BuildContext, BuildContextBuilder, Profile};
use crate::error::{BuildError, BuildResult};
use crate::events::EventLog;
use crate::invoke::{CancelToken, Deadline, Invocation, Invoker};
use crate::orchestration::{FailureReport, OutcomeReport, Phase, RunState};
use crate::package::{
    DependencyManifest, DependencySpec, FallbackChain, PackageManagerKind, PackageManagerRegistry,
    ResolvedDependency,
};
use crate::toolchain::{DecisionStep, ProbeContext, Selection, ToolInventory, ToolchainSelector};
use futures_util::stream::{self, StreamExt};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::fs;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Per-run choices layered over the configuration
#[derive(Debug, Clone)]
pub struct Overrides {
    pub action: Action,
    /// Plan commands and report cache state without fetching or building
    pub dry_run: bool,
    /// Compiler family, executable name or path
    pub compiler: Option<String>,
    pub package_manager: Option<PackageManagerKind>,
}

impl Default for Overrides {
    fn default() -> Self {
        Self {
            action: Action::Build,
            dry_run: false,
            compiler: None,
            package_manager: None,
        }
    }
}

/// Runs builds against one probe context
pub struct Orchestrator {
    config: Config,
    probe: Arc<ProbeContext>,
    invoker: Arc<dyn Invoker>,
    cache_root: PathBuf,
    events: EventLog,
    cancel: CancelToken,
}

impl Orchestrator {
    pub fn new(config: Config, probe: Arc<ProbeContext>, invoker: Arc<dyn Invoker>) -> Self {
        let cache_root = config
            .cache
            .dir
            .clone()
            .unwrap_or_else(ConfigManager::cache_dir);
        let events = EventLog::new(&config);
        Self {
            config,
            probe,
            invoker,
            cache_root,
            events,
            cancel: CancelToken::new(),
        }
    }

    pub fn with_events(mut self, events: EventLog) -> Self {
        self.events = events;
        self
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Token that cancels in-flight runs
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn cache_root(&self) -> &std::path::Path {
        &self.cache_root
    }

    /// Run `overrides.action` for `target`.
    ///
    /// Never returns an error: failures end up in the report's `failure`.
    pub async fn run(&self, target: &str, profile: Profile, overrides: Overrides) -> OutcomeReport {
        let started = Instant::now();
        let run_id = Uuid::new_v4();
        let mut report = OutcomeReport::new(run_id, overrides.action, target, profile, overrides.dry_run);
        let mut state = RunState::new();

        info!(%run_id, "Starting {} of {} ({})", overrides.action, target, profile);
        self.events
            .record(
                run_id,
                "run.started",
                json!({
                    "action": overrides.action,
                    "target": target,
                    "profile": profile,
                    "dry_run": overrides.dry_run,
                }),
            )
            .await;

        let mut result = self
            .drive(&mut state, &mut report, target, profile, &overrides)
            .await;
        if result.is_ok() {
            result = state.advance(Phase::Succeeded);
        }

        if let Err(e) = result {
            let phase = state.fail(e.kind());
            error!(kind = %e.kind(), "Run failed during {}: {}", phase, e);
            report.failure = Some(FailureReport::new(phase, &e));
        }

        report.state = state.phase();
        report.duration = started.elapsed();

        self.events
            .record(
                run_id,
                "run.finished",
                json!({
                    "state": report.state,
                    "fingerprint": report.fingerprint,
                    "cache_hits": report.cache_hits,
                    "cache_misses": report.cache_misses,
                    "failure": report.failure,
                    "duration_ms": report.duration.as_millis() as u64,
                }),
            )
            .await;

        report
    }

    async fn drive(
        &self,
        state: &mut RunState,
        report: &mut OutcomeReport,
        target: &str,
        profile: Profile,
        overrides: &Overrides,
    ) -> BuildResult<()> {
        let deadline = Deadline::after(self.config.execution.run_timeout());

        self.checkpoint(&deadline)?;
        state.advance(Phase::Probing)?;
        let platform = self.probe.platform().clone();
        report.platform = Some(platform.describe());
        let inventory = self.probe.tools().inventory().await;
        self.record_probe(report.run_id, &platform.describe(), &inventory).await;

        self.checkpoint(&deadline)?;
        state.advance(Phase::Selecting)?;
        let chain = FallbackChain::from_names(&self.config.package_managers.chain)?;
        let selection = self.select(&inventory, &chain, &platform, overrides, &mut report.reasoning)?;
        self.events
            .record(
                report.run_id,
                "selection.completed",
                json!({
                    "compiler": selection.compiler.label(),
                    "generator": selection.generator.label(),
                    "build_driver": selection.build_driver.label(),
                    "package_manager": selection.package_manager.name(),
                    "reasoning": selection.reasoning,
                }),
            )
            .await;

        let context = BuildContextBuilder::new(&platform, &self.config).build(target, profile, selection)?;
        state.advance(Phase::ContextBuilt)?;
        report.fingerprint = Some(context.fingerprint.clone());
        debug!("Context fingerprint {}", context.fingerprint.short());

        if overrides.action.needs_dependencies() {
            self.checkpoint(&deadline)?;
            state.advance(Phase::ResolvingDependencies)?;
            let registry = PackageManagerRegistry::new(chain, &inventory, &platform, self.invoker.clone())
                .with_fetch_timeout(self.config.execution.fetch_timeout())
                .with_deadline(deadline)
                .with_env(self.config.env.clone())
                .with_cancel(self.cancel.clone());
            self.resolve_dependencies(report, &context, &registry, overrides)
                .await?;
        }

        self.checkpoint(&deadline)?;
        state.advance(Phase::Building)?;
        self.build(report, &context, overrides, &deadline).await
    }

    fn select(
        &self,
        inventory: &ToolInventory,
        chain: &FallbackChain,
        platform: &crate::platform::Platform,
        overrides: &Overrides,
        reasoning: &mut Vec<DecisionStep>,
    ) -> BuildResult<Selection> {
        let compilers = self.config.toolchain.compiler_priority()?;
        let generators = self.config.toolchain.generator_priority()?;

        ToolchainSelector::new(inventory, chain, platform)
            .with_compiler_priority(compilers)
            .with_generator_priority(generators)
            .select_traced(
                overrides.compiler.as_deref(),
                overrides.package_manager,
                platform,
                reasoning,
            )
    }

    async fn resolve_dependencies(
        &self,
        report: &mut OutcomeReport,
        context: &BuildContext,
        registry: &PackageManagerRegistry,
        overrides: &Overrides,
    ) -> BuildResult<()> {
        let manifest_path = context.source_dir.join(&self.config.layout.manifest);
        let manifest = DependencyManifest::load(&manifest_path).await?;
        if manifest.is_empty() {
            debug!("No dependencies declared");
            return Ok(());
        }
        info!(
            "Resolving {} dependencies from {}",
            manifest.dependencies.len(),
            manifest_path.display()
        );

        let cache = if self.config.cache.enabled {
            Some(
                DependencyCache::open(&self.cache_root, self.config.cache.ttl())
                    .await?
                    .with_manifest_digest(manifest.digest.clone()),
            )
        } else {
            None
        };

        if overrides.dry_run {
            return self
                .plan_dependencies(report, &manifest, cache.as_ref(), registry, overrides)
                .await;
        }

        let run_id = report.run_id;
        let staging_root = context.build_dir.join("_deps");
        let results: Vec<BuildResult<ResolvedDependency>> = stream::iter(&manifest.dependencies)
            .map(|spec| {
                self.resolve_with_retry(
                    run_id,
                    registry,
                    cache.as_ref(),
                    spec,
                    overrides.package_manager,
                    staging_root.join(&spec.name),
                )
            })
            .buffer_unordered(self.config.execution.parallelism())
            .collect()
            .await;

        let mut resolved = Vec::with_capacity(results.len());
        let mut first_error = None;
        for result in results {
            match result {
                Ok(dep) => resolved.push(dep),
                Err(e) => {
                    error!("{}", e);
                    first_error.get_or_insert(e);
                }
            }
        }

        resolved.sort_by(|a, b| a.spec.name.cmp(&b.spec.name));
        report.cache_hits = resolved.iter().filter(|d| d.from_cache).count();
        report.cache_misses = resolved.len() - report.cache_hits;
        report.dependencies = resolved;

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Dry run: report what is cached without fetching anything
    async fn plan_dependencies(
        &self,
        report: &mut OutcomeReport,
        manifest: &DependencyManifest,
        cache: Option<&DependencyCache>,
        registry: &PackageManagerRegistry,
        overrides: &Overrides,
    ) -> BuildResult<()> {
        for spec in &manifest.dependencies {
            let fingerprint = registry.fingerprint(spec, overrides.package_manager)?;
            let cached = match cache {
                Some(cache) => cache.lookup(&fingerprint).await?,
                None => None,
            };
            match cached {
                Some(_) => {
                    info!("{} is cached ({})", spec.id(), fingerprint.short());
                    report.cache_hits += 1;
                }
                None => {
                    info!("Would fetch {}", spec.id());
                    report.cache_misses += 1;
                }
            }
        }
        Ok(())
    }

    /// Resolve one dependency, retrying timed-out fetches with exponential
    /// backoff
    async fn resolve_with_retry(
        &self,
        run_id: Uuid,
        registry: &PackageManagerRegistry,
        cache: Option<&DependencyCache>,
        spec: &DependencySpec,
        preferred: Option<PackageManagerKind>,
        staging: PathBuf,
    ) -> BuildResult<ResolvedDependency> {
        let retries = self.config.execution.fetch_retries;
        let mut attempt = 0;

        loop {
            if self.cancel.is_cancelled() {
                return Err(BuildError::Cancelled);
            }

            let result = match cache {
                Some(cache) => self.resolve_cached(run_id, registry, cache, spec, preferred).await,
                None => registry.resolve(spec, preferred, &staging).await,
            };

            match result {
                Err(e) if e.is_retryable() && attempt < retries => {
                    let backoff = Duration::from_millis(self.config.execution.retry_backoff_ms)
                        .saturating_mul(2u32.saturating_pow(attempt));
                    attempt += 1;
                    warn!(
                        "{} (attempt {}/{}), retrying in {}ms",
                        e,
                        attempt,
                        retries + 1,
                        backoff.as_millis()
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(backoff) => {}
                        _ = self.cancel.cancelled() => return Err(BuildError::Cancelled),
                    }
                }
                other => return other,
            }
        }
    }

    async fn resolve_cached(
        &self,
        run_id: Uuid,
        registry: &PackageManagerRegistry,
        cache: &DependencyCache,
        spec: &DependencySpec,
        preferred: Option<PackageManagerKind>,
    ) -> BuildResult<ResolvedDependency> {
        let fingerprint = registry.fingerprint(spec, preferred)?;

        let cached = cache
            .get_or_resolve(&fingerprint, |dir| async move {
                let resolved = registry.resolve(spec, preferred, &dir).await?;
                Ok::<_, BuildError>(Resolution {
                    package_manager: resolved.package_manager,
                    artifacts: vec![resolved.artifact],
                    label: spec.id(),
                })
            })
            .await?;

        let artifact = cached
            .entry
            .artifact_refs
            .iter()
            .next()
            .map(|name| cache.artifact_dir(&fingerprint).join(name))
            .ok_or_else(|| BuildError::CacheCorruption {
                fingerprint: fingerprint.to_string(),
                reason: "entry lists no artifacts".to_string(),
            })?;

        let event = if cached.hit { "cache.hit" } else { "cache.miss" };
        if cached.hit {
            info!("{} served from cache ({})", spec.id(), fingerprint.short());
        }
        self.events
            .record(
                run_id,
                event,
                json!({
                    "dependency": spec.id(),
                    "fingerprint": fingerprint,
                    "package_manager": cached.entry.package_manager,
                }),
            )
            .await;

        Ok(ResolvedDependency {
            spec: spec.clone(),
            package_manager: cached.entry.package_manager,
            artifact,
            fingerprint,
            from_cache: cached.hit,
        })
    }

    /// Configure and run the action. Build failures are never retried.
    async fn build(
        &self,
        report: &mut OutcomeReport,
        context: &BuildContext,
        overrides: &Overrides,
        deadline: &Deadline,
    ) -> BuildResult<()> {
        let commands = context.commands(overrides.action);
        report.commands = commands.clone();

        if overrides.dry_run {
            for argv in &commands {
                info!("Would run: {}", argv.join(" "));
            }
            return Ok(());
        }

        fs::create_dir_all(&context.build_dir)
            .await
            .map_err(|e| BuildError::io(format!("creating {}", context.build_dir.display()), e))?;

        for argv in commands {
            self.checkpoint(deadline)?;
            let timeout = deadline.clamp(self.config.execution.build_timeout())?;
            let invocation = Invocation::new(argv)
                .cwd(&context.source_dir)
                .envs(&context.environment)
                .timeout(timeout)
                .cancel(self.cancel.clone());

            info!("Running {}", invocation.command_line());
            let result = self.invoker.invoke(&invocation).await?;

            self.events
                .record(
                    report.run_id,
                    "invocation.finished",
                    json!({
                        "command": invocation.argv,
                        "exit_code": result.exit_code,
                        "timed_out": result.timed_out,
                        "duration_ms": result.duration.as_millis() as u64,
                    }),
                )
                .await;

            if result.timed_out {
                return Err(BuildError::InvocationTimeout {
                    command: invocation.command_line(),
                    timeout,
                });
            }
            if !result.success() {
                return Err(BuildError::BuildFailed {
                    command: invocation.command_line(),
                    code: result.exit_code,
                    stderr_tail: result.stderr_tail(),
                });
            }
        }

        info!("{} of {} finished", overrides.action, context.target);
        Ok(())
    }

    async fn record_probe(&self, run_id: Uuid, platform: &str, inventory: &ToolInventory) {
        let labels = |candidates: &[crate::toolchain::ToolchainCandidate]| {
            candidates.iter().map(|c| c.label()).collect::<Vec<_>>()
        };
        info!(
            "Probed {}: {} compilers, {} generators, {} package managers",
            platform,
            inventory.compilers.len(),
            inventory.generators.len(),
            inventory.package_managers.len()
        );
        self.events
            .record(
                run_id,
                "probe.completed",
                json!({
                    "platform": platform,
                    "compilers": labels(&inventory.compilers),
                    "generators": labels(&inventory.generators),
                    "package_managers": labels(&inventory.package_managers),
                    "build_driver": inventory.build_driver.as_ref().map(|c| c.label()),
                }),
            )
            .await;
    }

    /// Stop between phases once cancelled or out of time
    fn checkpoint(&self, deadline: &Deadline) -> BuildResult<()> {
        if self.cancel.is_cancelled() {
            return Err(BuildError::Cancelled);
        }
        deadline.check()
    }
}
