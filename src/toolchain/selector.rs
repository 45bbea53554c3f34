//! Toolchain selection with explicit reasoning

use crate::error::{BuildError, BuildResult};
use crate::package::{FallbackChain, PackageManagerDescriptor, PackageManagerKind};
use crate::platform::{OsFamily, Platform};
use crate::toolchain::candidate::{
    CompilerFamily, Confidence, GeneratorFamily, ToolchainCandidate,
};
use crate::toolchain::probe::ToolInventory;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, warn};

/// What a decision step was about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Compiler,
    Generator,
    BuildDriver,
    PackageManager,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Compiler => "compiler",
            Self::Generator => "generator",
            Self::BuildDriver => "build driver",
            Self::PackageManager => "package manager",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepOutcome {
    Chosen,
    Skipped,
    Warning,
}

/// One entry of the selection reasoning trail
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionStep {
    pub role: Role,
    pub outcome: StepOutcome,
    pub detail: String,
}

impl DecisionStep {
    pub fn chosen(role: Role, detail: impl Into<String>) -> Self {
        Self {
            role,
            outcome: StepOutcome::Chosen,
            detail: detail.into(),
        }
    }

    pub fn skipped(role: Role, detail: impl Into<String>) -> Self {
        Self {
            role,
            outcome: StepOutcome::Skipped,
            detail: detail.into(),
        }
    }

    pub fn warning(role: Role, detail: impl Into<String>) -> Self {
        Self {
            role,
            outcome: StepOutcome::Warning,
            detail: detail.into(),
        }
    }
}

impl fmt::Display for DecisionStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let outcome = match self.outcome {
            StepOutcome::Chosen => "chose",
            StepOutcome::Skipped => "skipped",
            StepOutcome::Warning => "warning",
        };
        write!(f, "{} {}: {}", self.role, outcome, self.detail)
    }
}

/// Tools picked for one run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Selection {
    pub compiler: ToolchainCandidate,
    pub generator: ToolchainCandidate,
    pub build_driver: ToolchainCandidate,
    pub package_manager: PackageManagerDescriptor,
    pub reasoning: Vec<DecisionStep>,
}

impl Selection {
    pub fn compiler_family(&self) -> CompilerFamily {
        self.compiler
            .compiler_family()
            .unwrap_or(CompilerFamily::Gcc)
    }

    pub fn generator_family(&self) -> GeneratorFamily {
        self.generator
            .generator_family()
            .unwrap_or(GeneratorFamily::Make)
    }
}

/// Compiler families tried in order when the user names none
pub fn default_compiler_priority(os: OsFamily) -> Vec<CompilerFamily> {
    use CompilerFamily::*;
    match os {
        OsFamily::Linux => vec![Gcc, Clang],
        OsFamily::Macos => vec![Clang, Gcc],
        OsFamily::Windows => vec![Msvc, Clang, Gcc],
        OsFamily::Wasm => vec![Emscripten],
    }
}

/// Generator families tried in order when the user names none
pub fn default_generator_priority(os: OsFamily) -> Vec<GeneratorFamily> {
    use GeneratorFamily::*;
    match os {
        OsFamily::Linux | OsFamily::Wasm => vec![Ninja, Make],
        OsFamily::Macos => vec![Ninja, Make, Xcode],
        OsFamily::Windows => vec![Ninja, Msbuild],
    }
}

/// Picks compiler, generator, build driver and package manager
pub struct ToolchainSelector<'a> {
    inventory: &'a ToolInventory,
    chain: &'a FallbackChain,
    available_managers: std::collections::BTreeSet<PackageManagerDescriptor>,
    compiler_priority: Option<Vec<CompilerFamily>>,
    generator_priority: Option<Vec<GeneratorFamily>>,
}

impl<'a> ToolchainSelector<'a> {
    pub fn new(inventory: &'a ToolInventory, chain: &'a FallbackChain, platform: &Platform) -> Self {
        Self {
            inventory,
            chain,
            available_managers: inventory.available_package_managers(chain, platform),
            compiler_priority: None,
            generator_priority: None,
        }
    }

    /// Replace the platform default compiler order; empty keeps the default
    pub fn with_compiler_priority(mut self, priority: Vec<CompilerFamily>) -> Self {
        self.compiler_priority = (!priority.is_empty()).then_some(priority);
        self
    }

    /// Replace the platform default generator order; empty keeps the default
    pub fn with_generator_priority(mut self, priority: Vec<GeneratorFamily>) -> Self {
        self.generator_priority = (!priority.is_empty()).then_some(priority);
        self
    }

    /// Select every role.
    ///
    /// An explicit compiler must match a detected candidate by family,
    /// executable name or path. An explicit package manager that is not
    /// available only produces a warning and the chain is walked instead.
    pub fn select(
        &self,
        user_compiler: Option<&str>,
        user_package_manager: Option<PackageManagerKind>,
        platform: &Platform,
    ) -> BuildResult<Selection> {
        let mut reasoning = Vec::new();
        self.select_traced(user_compiler, user_package_manager, platform, &mut reasoning)
    }

    /// Like [`select`](Self::select), appending each decision to `reasoning`
    /// as it is made so the trail survives a failed selection.
    pub fn select_traced(
        &self,
        user_compiler: Option<&str>,
        user_package_manager: Option<PackageManagerKind>,
        platform: &Platform,
        reasoning: &mut Vec<DecisionStep>,
    ) -> BuildResult<Selection> {
        let compiler_priority = self
            .compiler_priority
            .clone()
            .unwrap_or_else(|| default_compiler_priority(platform.os_family));
        let compiler = pick(
            Role::Compiler,
            &self.inventory.compilers,
            user_compiler,
            &compiler_priority,
            |c| c.compiler_family(),
            reasoning,
        )
        .ok_or_else(|| BuildError::NoCompilerAvailable {
            requested: user_compiler.map(str::to_string),
            attempted: labels(&self.inventory.compilers),
        })?;

        let generator_priority = self
            .generator_priority
            .clone()
            .unwrap_or_else(|| default_generator_priority(platform.os_family));
        let generator = pick(
            Role::Generator,
            &self.inventory.generators,
            None,
            &generator_priority,
            |c| c.generator_family(),
            reasoning,
        )
        .ok_or_else(|| BuildError::NoGeneratorAvailable {
            requested: None,
            attempted: labels(&self.inventory.generators),
        })?;

        let Some(build_driver) = self.inventory.build_driver.clone() else {
            reasoning.push(DecisionStep::skipped(
                Role::BuildDriver,
                format!("{} not found", crate::toolchain::BUILD_DRIVER),
            ));
            return Err(BuildError::NoGeneratorAvailable {
                requested: Some(crate::toolchain::BUILD_DRIVER.to_string()),
                attempted: vec![],
            });
        };
        reasoning.push(DecisionStep::chosen(Role::BuildDriver, build_driver.label()));

        let package_manager = self
            .chain
            .walk(user_package_manager, &self.available_managers, reasoning)?;

        for step in reasoning.iter() {
            debug!("{}", step);
        }

        Ok(Selection {
            compiler,
            generator,
            build_driver,
            package_manager,
            reasoning: reasoning.clone(),
        })
    }
}

/// Shared compiler/generator choice.
///
/// Returns `None` when nothing matches; the caller maps that to its error.
fn pick<F, K>(
    role: Role,
    candidates: &[ToolchainCandidate],
    requested: Option<&str>,
    priority: &[K],
    family_of: F,
    reasoning: &mut Vec<DecisionStep>,
) -> Option<ToolchainCandidate>
where
    F: Fn(&ToolchainCandidate) -> Option<K>,
    K: PartialEq + fmt::Display,
{
    let best = |matches: Vec<&ToolchainCandidate>| {
        matches
            .into_iter()
            .max_by(|a, b| a.preference(b))
            .cloned()
    };

    let chosen = if let Some(requested) = requested {
        let Some(chosen) = best(candidates.iter().filter(|c| c.matches(requested)).collect()) else {
            reasoning.push(DecisionStep::skipped(
                role,
                format!("nothing detected matches requested '{}'", requested),
            ));
            return None;
        };
        reasoning.push(DecisionStep::chosen(
            role,
            format!("{} (requested '{}')", chosen.label(), requested),
        ));
        chosen
    } else {
        let mut found = None;
        for family in priority {
            let of_family: Vec<_> = candidates
                .iter()
                .filter(|c| family_of(c).as_ref() == Some(family))
                .collect();
            match best(of_family) {
                Some(candidate) => {
                    reasoning.push(DecisionStep::chosen(
                        role,
                        format!("{} (first available of platform order)", candidate.label()),
                    ));
                    found = Some(candidate);
                    break;
                }
                None => reasoning.push(DecisionStep::skipped(role, format!("no {} found", family))),
            }
        }

        match found {
            Some(candidate) => candidate,
            None => {
                let candidate = best(candidates.iter().collect())?;
                reasoning.push(DecisionStep::warning(
                    role,
                    format!("{} is outside the preferred order", candidate.label()),
                ));
                candidate
            }
        }
    };

    if chosen.detection_confidence == Confidence::Inferred {
        warn!("{} identity inferred from its file name: {}", role, chosen.label());
        reasoning.push(DecisionStep::warning(
            role,
            format!("{} was not positively identified", chosen.name),
        ));
    }

    Some(chosen)
}

fn labels(candidates: &[ToolchainCandidate]) -> Vec<String> {
    candidates.iter().map(ToolchainCandidate::label).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::testutil;
    use crate::toolchain::{ToolFamily, ToolVersion};

    fn candidate(family: ToolFamily, name: &str, version: &str, confidence: Confidence) -> ToolchainCandidate {
        ToolchainCandidate::new(
            family,
            name,
            ToolVersion::parse(version),
            format!("/usr/bin/{}", name),
            confidence,
        )
    }

    fn gcc(name: &str, version: &str) -> ToolchainCandidate {
        candidate(ToolFamily::Compiler(CompilerFamily::Gcc), name, version, Confidence::Exact)
    }

    fn clang(name: &str, version: &str) -> ToolchainCandidate {
        candidate(ToolFamily::Compiler(CompilerFamily::Clang), name, version, Confidence::Exact)
    }

    fn inventory(compilers: Vec<ToolchainCandidate>) -> ToolInventory {
        ToolInventory {
            compilers,
            generators: vec![candidate(
                ToolFamily::Generator(GeneratorFamily::Ninja),
                "ninja",
                "1.11.1",
                Confidence::Exact,
            )],
            package_managers: vec![candidate(
                ToolFamily::PackageManager(PackageManagerKind::Cpm),
                "cmake",
                "3.28.1",
                Confidence::Exact,
            )],
            build_driver: Some(candidate(ToolFamily::BuildDriver, "cmake", "3.28.1", Confidence::Exact)),
        }
    }

    fn select(inv: &ToolInventory, compiler: Option<&str>) -> BuildResult<Selection> {
        let chain = FallbackChain::default();
        let platform = testutil::linux_platform();
        ToolchainSelector::new(inv, &chain, &platform).select(compiler, None, &platform)
    }

    #[test]
    fn linux_prefers_newest_gcc() {
        let inv = inventory(vec![clang("clang++", "17.0.6"), gcc("g++-12", "12.2.0"), gcc("g++-13", "13.2.1")]);
        let selection = select(&inv, None).unwrap();

        assert_eq!(selection.compiler.name, "g++-13");
        assert_eq!(selection.generator.name, "ninja");
        assert_eq!(selection.package_manager.kind, PackageManagerKind::Cpm);
    }

    #[test]
    fn explicit_compiler_wins() {
        let inv = inventory(vec![gcc("g++", "13.2.1"), clang("clang++-17", "17.0.6")]);
        let selection = select(&inv, Some("clang")).unwrap();
        assert_eq!(selection.compiler.name, "clang++-17");

        let by_path = select(&inv, Some("/usr/bin/g++")).unwrap();
        assert_eq!(by_path.compiler.name, "g++");
    }

    #[test]
    fn unknown_explicit_compiler_fails() {
        let inv = inventory(vec![gcc("g++", "13.2.1")]);
        let err = select(&inv, Some("nonexistent-cc")).unwrap_err();

        assert_eq!(err.kind(), ErrorKind::NoCompilerAvailable);
        assert_eq!(err.attempted().len(), 1);
        assert!(err.to_string().contains("nonexistent-cc"));
    }

    #[test]
    fn empty_compiler_list_fails() {
        let err = select(&inventory(vec![]), None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NoCompilerAvailable);
    }

    #[test]
    fn exact_beats_newer_inferred() {
        let inferred = candidate(
            ToolFamily::Compiler(CompilerFamily::Gcc),
            "g++-15",
            "15.0.0",
            Confidence::Inferred,
        );
        let inv = inventory(vec![inferred, gcc("g++-13", "13.2.1")]);
        assert_eq!(select(&inv, None).unwrap().compiler.name, "g++-13");
    }

    #[test]
    fn inferred_choice_adds_warning() {
        let inferred = candidate(
            ToolFamily::Compiler(CompilerFamily::Gcc),
            "g++",
            "unknown",
            Confidence::Inferred,
        );
        let selection = select(&inventory(vec![inferred]), None).unwrap();
        assert!(selection
            .reasoning
            .iter()
            .any(|s| s.role == Role::Compiler && s.outcome == StepOutcome::Warning));
    }

    #[test]
    fn config_priority_overrides_platform_default() {
        let inv = inventory(vec![gcc("g++", "13.2.1"), clang("clang++", "17.0.6")]);
        let chain = FallbackChain::default();
        let platform = testutil::linux_platform();
        let selection = ToolchainSelector::new(&inv, &chain, &platform)
            .with_compiler_priority(vec![CompilerFamily::Clang])
            .select(None, None, &platform)
            .unwrap();
        assert_eq!(selection.compiler.name, "clang++");
    }

    #[test]
    fn family_outside_platform_order_still_selected() {
        let em = candidate(
            ToolFamily::Compiler(CompilerFamily::Emscripten),
            "em++",
            "3.1.50",
            Confidence::Exact,
        );
        let selection = select(&inventory(vec![em]), None).unwrap();
        assert_eq!(selection.compiler.name, "em++");
        let warnings = selection
            .reasoning
            .iter()
            .filter(|s| s.outcome == StepOutcome::Warning)
            .count();
        assert_eq!(warnings, 1);
    }

    #[test]
    fn missing_cmake_is_a_generator_failure() {
        let mut inv = inventory(vec![gcc("g++", "13.2.1")]);
        inv.build_driver = None;
        let err = select(&inv, None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NoGeneratorAvailable);
    }

    #[test]
    fn failed_selection_keeps_its_trail() {
        let mut inv = inventory(vec![gcc("g++", "13.2.1")]);
        inv.build_driver = None;
        let chain = FallbackChain::default();
        let platform = testutil::linux_platform();

        let mut reasoning = Vec::new();
        let err = ToolchainSelector::new(&inv, &chain, &platform)
            .select_traced(None, None, &platform, &mut reasoning)
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::NoGeneratorAvailable);
        let roles: Vec<_> = reasoning.iter().map(|s| s.role).collect();
        assert_eq!(roles, [Role::Compiler, Role::Generator, Role::BuildDriver]);
        assert_eq!(reasoning[2].outcome, StepOutcome::Skipped);
    }
}
