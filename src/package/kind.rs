//! Package manager backends and the fallback chain

use crate::error::{BuildError, BuildResult};
use crate::toolchain::{DecisionStep, Role};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// Supported dependency backends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PackageManagerKind {
    /// Nix flakes (pinned nixpkgs)
    Nix,
    /// Microsoft vcpkg
    Vcpkg,
    /// Conan 2
    Conan,
    /// CPM.cmake, driven through a cmake script
    Cpm,
}

impl PackageManagerKind {
    pub fn all() -> &'static [Self] {
        &[Self::Nix, Self::Vcpkg, Self::Conan, Self::Cpm]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Nix => "nix",
            Self::Vcpkg => "vcpkg",
            Self::Conan => "conan",
            Self::Cpm => "cpm",
        }
    }

    /// Executable probed to decide availability
    pub fn binary(&self) -> &'static str {
        match self {
            Self::Nix => "nix",
            Self::Vcpkg => "vcpkg",
            Self::Conan => "conan",
            Self::Cpm => "cmake",
        }
    }

    pub fn version_args(&self) -> &'static [&'static str] {
        match self {
            Self::Vcpkg => &["version"],
            Self::Nix | Self::Conan | Self::Cpm => &["--version"],
        }
    }

    /// Version banner fragment
    pub fn banner(&self) -> &'static str {
        match self {
            Self::Nix => "(Nix)",
            Self::Vcpkg => "vcpkg package management program",
            Self::Conan => "Conan version",
            Self::Cpm => "cmake version",
        }
    }

    /// Nix only resolves against the pinned package set of a reproducible shell
    pub fn requires_reproducible_shell(&self) -> bool {
        matches!(self, Self::Nix)
    }
}

impl fmt::Display for PackageManagerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for PackageManagerKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "nix" => Ok(Self::Nix),
            "vcpkg" => Ok(Self::Vcpkg),
            "conan" => Ok(Self::Conan),
            "cpm" | "cpm.cmake" => Ok(Self::Cpm),
            other => Err(format!("unknown package manager: {}", other)),
        }
    }
}

/// One position in the fallback chain.
///
/// Field order matters: descriptors sort by priority first.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PackageManagerDescriptor {
    /// Lower is preferred
    pub priority: u32,
    pub kind: PackageManagerKind,
    /// Next backend in the chain
    pub fallback_to: Option<PackageManagerKind>,
}

impl PackageManagerDescriptor {
    pub fn name(&self) -> &'static str {
        self.kind.as_str()
    }
}

/// Ordered package manager chain, most preferred first
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FallbackChain {
    descriptors: Vec<PackageManagerDescriptor>,
}

impl FallbackChain {
    /// Build from kinds in priority order; duplicates keep their first position
    pub fn new(kinds: impl IntoIterator<Item = PackageManagerKind>) -> Self {
        let mut seen = BTreeSet::new();
        let kinds: Vec<PackageManagerKind> =
            kinds.into_iter().filter(|k| seen.insert(*k)).collect();

        let descriptors = kinds
            .iter()
            .enumerate()
            .map(|(i, kind)| PackageManagerDescriptor {
                priority: i as u32,
                kind: *kind,
                fallback_to: kinds.get(i + 1).copied(),
            })
            .collect();

        Self { descriptors }
    }

    /// Parse the configured chain
    pub fn from_names(names: &[String]) -> BuildResult<Self> {
        let kinds = names
            .iter()
            .map(|name| {
                name.parse::<PackageManagerKind>()
                    .map_err(|reason| BuildError::ConfigValue {
                        field: "package_managers.chain".to_string(),
                        reason,
                    })
            })
            .collect::<BuildResult<Vec<_>>>()?;
        Ok(Self::new(kinds))
    }

    pub fn descriptors(&self) -> &[PackageManagerDescriptor] {
        &self.descriptors
    }

    pub fn get(&self, kind: PackageManagerKind) -> Option<&PackageManagerDescriptor> {
        self.descriptors.iter().find(|d| d.kind == kind)
    }

    /// Order in which managers are attempted: an available preferred manager
    /// first, then the remaining available chain entries. Every skipped or
    /// unavailable entry is recorded as a reasoning step.
    pub fn plan(
        &self,
        preferred: Option<PackageManagerKind>,
        available: &BTreeSet<PackageManagerDescriptor>,
    ) -> (Vec<PackageManagerDescriptor>, Vec<DecisionStep>) {
        let is_available = |kind: PackageManagerKind| available.iter().any(|d| d.kind == kind);
        let mut order = Vec::new();
        let mut steps = Vec::new();

        let mut preferred_taken = false;
        if let Some(kind) = preferred {
            match self.get(kind) {
                Some(descriptor) if is_available(kind) => {
                    order.push(descriptor.clone());
                    preferred_taken = true;
                }
                Some(_) => steps.push(DecisionStep::warning(
                    Role::PackageManager,
                    format!("requested {} is not available, walking the chain", kind),
                )),
                None => steps.push(DecisionStep::warning(
                    Role::PackageManager,
                    format!("requested {} is not in the configured chain", kind),
                )),
            }
        }

        for descriptor in &self.descriptors {
            if preferred_taken && Some(descriptor.kind) == preferred {
                continue;
            }
            if is_available(descriptor.kind) {
                order.push(descriptor.clone());
            } else {
                steps.push(DecisionStep::skipped(
                    Role::PackageManager,
                    format!("{} not available", descriptor.kind),
                ));
            }
        }

        (order, steps)
    }

    /// Pick the manager to use first.
    ///
    /// Skip steps are only recorded up to the chosen entry; later entries are
    /// fallbacks, not decisions.
    pub fn select(
        &self,
        preferred: Option<PackageManagerKind>,
        available: &BTreeSet<PackageManagerDescriptor>,
    ) -> BuildResult<(PackageManagerDescriptor, Vec<DecisionStep>)> {
        let mut steps = Vec::new();
        let chosen = self.walk(preferred, available, &mut steps)?;
        Ok((chosen, steps))
    }

    /// Walk the chain, appending one step per manager considered
    pub fn walk(
        &self,
        preferred: Option<PackageManagerKind>,
        available: &BTreeSet<PackageManagerDescriptor>,
        steps: &mut Vec<DecisionStep>,
    ) -> BuildResult<PackageManagerDescriptor> {
        let is_available = |kind: PackageManagerKind| available.iter().any(|d| d.kind == kind);

        if let Some(kind) = preferred {
            if let Some(descriptor) = self.get(kind).filter(|_| is_available(kind)) {
                steps.push(DecisionStep::chosen(
                    Role::PackageManager,
                    format!("{} (requested)", kind),
                ));
                return Ok(descriptor.clone());
            }
            steps.push(DecisionStep::warning(
                Role::PackageManager,
                format!("requested {} is not available, walking the chain", kind),
            ));
        }

        for descriptor in &self.descriptors {
            if is_available(descriptor.kind) {
                steps.push(DecisionStep::chosen(
                    Role::PackageManager,
                    format!("{} (priority {})", descriptor.kind, descriptor.priority),
                ));
                return Ok(descriptor.clone());
            }
            steps.push(DecisionStep::skipped(
                Role::PackageManager,
                format!("{} not available", descriptor.kind),
            ));
        }

        Err(BuildError::NoPackageManagerAvailable {
            attempted: self
                .descriptors
                .iter()
                .map(|d| d.name().to_string())
                .collect(),
        })
    }
}

impl Default for FallbackChain {
    fn default() -> Self {
        Self::new(PackageManagerKind::all().iter().copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::toolchain::StepOutcome;

    fn available(chain: &FallbackChain, kinds: &[PackageManagerKind]) -> BTreeSet<PackageManagerDescriptor> {
        kinds
            .iter()
            .filter_map(|k| chain.get(*k).cloned())
            .collect()
    }

    #[test]
    fn fallback_links_follow_position() {
        let chain = FallbackChain::default();
        let d = chain.descriptors();
        assert_eq!(d[0].kind, PackageManagerKind::Nix);
        assert_eq!(d[0].fallback_to, Some(PackageManagerKind::Vcpkg));
        assert_eq!(d[3].fallback_to, None);
        assert!(d.windows(2).all(|w| w[0].priority < w[1].priority));
    }

    #[test]
    fn only_third_available_records_two_skips() {
        use PackageManagerKind::*;
        let chain = FallbackChain::new([Vcpkg, Conan, Cpm]);
        let (chosen, steps) = chain.select(None, &available(&chain, &[Cpm])).unwrap();

        assert_eq!(chosen.kind, Cpm);
        let skips = steps.iter().filter(|s| s.outcome == StepOutcome::Skipped).count();
        assert_eq!(skips, 2);
        assert_eq!(steps.last().unwrap().outcome, StepOutcome::Chosen);
    }

    #[test]
    fn preferred_available_wins() {
        use PackageManagerKind::*;
        let chain = FallbackChain::default();
        let avail = available(&chain, &[Vcpkg, Conan]);
        let (chosen, steps) = chain.select(Some(Conan), &avail).unwrap();
        assert_eq!(chosen.kind, Conan);
        assert_eq!(steps.len(), 1);
    }

    #[test]
    fn preferred_unavailable_walks_chain() {
        use PackageManagerKind::*;
        let chain = FallbackChain::default();
        let avail = available(&chain, &[Conan]);
        let (chosen, steps) = chain.select(Some(Vcpkg), &avail).unwrap();
        assert_eq!(chosen.kind, Conan);
        assert_eq!(steps[0].outcome, StepOutcome::Warning);
    }

    #[test]
    fn exhausted_chain_is_an_error() {
        let chain = FallbackChain::default();
        let err = chain.select(None, &BTreeSet::new()).unwrap_err();
        assert_eq!(err.attempted(), ["nix", "vcpkg", "conan", "cpm"]);
    }

    #[test]
    fn walk_keeps_skips_when_exhausted() {
        let chain = FallbackChain::default();
        let mut steps = Vec::new();
        let err = chain.walk(None, &BTreeSet::new(), &mut steps).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::NoPackageManagerAvailable);
        assert_eq!(steps.len(), 4);
        assert!(steps.iter().all(|s| s.outcome == StepOutcome::Skipped));
    }

    #[test]
    fn plan_puts_preferred_first() {
        use PackageManagerKind::*;
        let chain = FallbackChain::default();
        let avail = available(&chain, &[Vcpkg, Conan, Cpm]);
        let (order, steps) = chain.plan(Some(Cpm), &avail);

        let kinds: Vec<_> = order.iter().map(|d| d.kind).collect();
        assert_eq!(kinds, vec![Cpm, Vcpkg, Conan]);
        assert_eq!(steps.len(), 1); // nix skipped
    }

    #[test]
    fn from_names_rejects_unknown() {
        assert!(FallbackChain::from_names(&["pip".to_string()]).is_err());
        let chain = FallbackChain::from_names(&["conan".into(), "conan".into(), "cpm".into()]).unwrap();
        assert_eq!(chain.descriptors().len(), 2);
    }
}
