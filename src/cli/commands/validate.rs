//! Validate command - re-probe the host and show the selection

use crate::cli::args::ValidateArgs;
use crate::cli::exit_code;
use crate::config::Config;
use crate::error::BuildResult;
use crate::invoke::{Invoker, SecureInvoker};
use crate::package::FallbackChain;
use crate::platform::{HostEnv, Platform};
use crate::toolchain::{
    DecisionStep, ProbeContext, Selection, ToolInventory, ToolchainCandidate, ToolchainSelector,
};
use console::{style, Emoji};
use std::process::ExitCode;
use std::sync::Arc;

static CHECK: Emoji<'_, '_> = Emoji("✓ ", "[OK] ");
static CROSS: Emoji<'_, '_> = Emoji("✗ ", "[FAIL] ");
static DOT: Emoji<'_, '_> = Emoji("• ", "- ");

/// Execute the validate command
pub async fn execute(args: ValidateArgs, config: &Config) -> BuildResult<ExitCode> {
    let invoker: Arc<dyn Invoker> = Arc::new(SecureInvoker::new(config.execution.kill_grace()));
    let probe = ProbeContext::from_config(config, HostEnv::capture(), invoker);

    let platform = probe.platform().clone();
    let inventory = probe.tools().refresh().await;
    let chain = FallbackChain::from_names(&config.package_managers.chain)?;
    let mut reasoning = Vec::new();
    let selection = select(
        config,
        &inventory,
        &chain,
        &platform,
        args.compiler.as_deref(),
        &mut reasoning,
    );

    if args.json {
        let available: Vec<_> = inventory
            .available_package_managers(&chain, &platform)
            .into_iter()
            .collect();
        let doc = serde_json::json!({
            "platform": platform,
            "compilers": inventory.compilers,
            "generators": inventory.generators,
            "build_driver": inventory.build_driver,
            "package_managers": available,
            "selection": selection.as_ref().ok(),
            "reasoning": reasoning,
            "error": selection.as_ref().err().map(|e| e.to_string()),
        });
        println!("{}", serde_json::to_string_pretty(&doc)?);
    } else {
        print_inventory(&platform, &inventory, &chain);
        print_selection(&selection, &reasoning);
    }

    Ok(match selection {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => ExitCode::from(exit_code(e.kind())),
    })
}

fn select(
    config: &Config,
    inventory: &ToolInventory,
    chain: &FallbackChain,
    platform: &Platform,
    compiler: Option<&str>,
    reasoning: &mut Vec<DecisionStep>,
) -> BuildResult<Selection> {
    let compilers = config.toolchain.compiler_priority()?;
    let generators = config.toolchain.generator_priority()?;

    ToolchainSelector::new(inventory, chain, platform)
        .with_compiler_priority(compilers)
        .with_generator_priority(generators)
        .select_traced(compiler, None, platform, reasoning)
}

fn print_inventory(platform: &Platform, inventory: &ToolInventory, chain: &FallbackChain) {
    println!("{}", style("buildwright environment").bold().cyan());
    println!();
    println!("{}", style("Platform:").bold());
    println!("  {}{}", CHECK, platform.describe());

    print_candidates("Compilers:", &inventory.compilers, "install gcc or clang");
    print_candidates("Generators:", &inventory.generators, "install ninja or make");

    println!();
    println!("{}", style("Build driver:").bold());
    match inventory.build_driver {
        Some(ref cmake) => println!("  {}{}", CHECK, cmake.label()),
        None => println!("  {}{}", CROSS, style("cmake not found").red()),
    }

    println!();
    println!("{}", style("Package managers:").bold());
    let available = inventory.available_package_managers(chain, platform);
    for descriptor in chain.descriptors() {
        if available.contains(descriptor) {
            println!("  {}{} (priority {})", CHECK, descriptor.name(), descriptor.priority);
        } else {
            let reason = if descriptor.kind.requires_reproducible_shell() && !platform.in_reproducible_shell {
                "needs a nix shell"
            } else {
                "not installed"
            };
            println!("  {}{} {}", CROSS, descriptor.name(), style(reason).dim());
        }
    }
}

fn print_candidates(title: &str, candidates: &[ToolchainCandidate], hint: &str) {
    println!();
    println!("{}", style(title).bold());
    if candidates.is_empty() {
        println!("  {}{}", CROSS, style(format!("none found - {}", hint)).red());
        return;
    }
    for candidate in candidates {
        let caps = if candidate.capability_flags.is_empty() {
            String::new()
        } else {
            let flags: Vec<&str> = candidate.capability_flags.iter().map(String::as_str).collect();
            format!(" [{}]", flags.join(", "))
        };
        println!("  {}{}{}", DOT, candidate.label(), style(caps).dim());
    }
}

fn print_selection(selection: &BuildResult<Selection>, reasoning: &[DecisionStep]) {
    println!();
    println!("{}", style("Selection:").bold());
    for step in reasoning {
        println!("  {}{}", DOT, step);
    }
    match selection {
        Ok(_) => {
            println!();
            println!("{}", style("All required tools found").green().bold());
        }
        Err(e) => {
            println!("  {}{}", CROSS, style(e).red());
            if let Some(hint) = e.hint() {
                println!("  {} {}", style("Hint:").yellow(), hint);
            }
        }
    }
}
