//! Build commands - configure, build, clean, test and package

use crate::cli::args::BuildArgs;
use crate::cli::exit_code;
use crate::config::Config;
use crate::context::Action;
use crate::error::BuildResult;
use crate::invoke::{Invoker, SecureInvoker};
use crate::orchestration::{Orchestrator, OutcomeReport, Overrides};
use crate::platform::HostEnv;
use crate::toolchain::{ProbeContext, StepOutcome};
use console::style;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::warn;

/// Execute a build-like command
pub async fn execute(action: Action, args: BuildArgs, config: &Config) -> BuildResult<ExitCode> {
    let invoker: Arc<dyn Invoker> = Arc::new(SecureInvoker::new(config.execution.kill_grace()));
    let probe = Arc::new(ProbeContext::from_config(config, HostEnv::capture(), invoker.clone()));
    let orchestrator = Orchestrator::new(config.clone(), probe, invoker);

    // Ctrl-C cancels the run; in-flight tools get SIGTERM, then SIGKILL
    let cancel = orchestrator.cancel_token();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling build");
            cancel.cancel();
        }
    });

    let overrides = Overrides {
        action,
        dry_run: args.dry_run,
        compiler: args.compiler.clone(),
        package_manager: args.package_manager,
    };
    let report = orchestrator.run(&args.target, args.profile, overrides).await;
    interrupt.abort();

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }

    Ok(match report.error_kind() {
        None => ExitCode::SUCCESS,
        Some(kind) => ExitCode::from(exit_code(kind)),
    })
}

fn print_report(report: &OutcomeReport) {
    if let Some(ref platform) = report.platform {
        println!("{} {}", style("Platform:").bold(), platform);
    }
    for step in &report.reasoning {
        let marker = match step.outcome {
            StepOutcome::Chosen => style("✓").green(),
            StepOutcome::Skipped => style("○").dim(),
            StepOutcome::Warning => style("⚠").yellow(),
        };
        println!("  {} {}", marker, step);
    }

    if !report.dependencies.is_empty() || report.cache_hits + report.cache_misses > 0 {
        println!(
            "{} {} cached, {} fetched",
            style("Dependencies:").bold(),
            report.cache_hits,
            report.cache_misses
        );
        for dep in &report.dependencies {
            let source = if dep.from_cache { "cache" } else { dep.package_manager.as_str() };
            println!("  {} {} [{}]", style("•").cyan(), dep.spec.id(), source);
        }
    }

    if report.dry_run {
        println!("{}", style("Would run:").bold());
        for argv in &report.commands {
            println!("  {}", argv.join(" "));
        }
    }

    match report.failure {
        None => println!(
            "{} {} of {} ({}) finished in {:.1}s",
            style("✓").green().bold(),
            report.action,
            report.target,
            report.profile,
            report.duration.as_secs_f64()
        ),
        Some(ref failure) => {
            eprintln!(
                "{} {} (during {})",
                style("Error:").red().bold(),
                failure.message,
                failure.phase
            );
            if !failure.attempted.is_empty() {
                eprintln!("  examined: {}", failure.attempted.join(", "));
            }
            if let Some(ref tail) = failure.stderr_tail {
                eprintln!("{}", style("--- last output ---").dim());
                eprintln!("{}", tail);
            }
            if let Some(ref hint) = failure.hint {
                eprintln!("{} {}", style("Hint:").yellow(), hint);
            }
        }
    }
}
