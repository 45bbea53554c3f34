//! Detected tool candidates and the closed set of tool families

use crate::package::PackageManagerKind;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Role a tool plays in a build
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolKind {
    Compiler,
    Generator,
    PackageManager,
    BuildDriver,
}

/// How a candidate was identified
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    /// The tool's own version banner named it
    Exact,
    /// Only the file name suggested it
    Inferred,
}

/// Which flag dialect a compiler speaks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlagSyntax {
    Gnu,
    Msvc,
}

/// Supported C++ compiler families
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompilerFamily {
    Gcc,
    Clang,
    Msvc,
    Emscripten,
}

impl CompilerFamily {
    pub fn all() -> &'static [Self] {
        &[Self::Gcc, Self::Clang, Self::Msvc, Self::Emscripten]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Gcc => "gcc",
            Self::Clang => "clang",
            Self::Msvc => "msvc",
            Self::Emscripten => "emscripten",
        }
    }

    /// Executable names searched for, without version suffix
    pub fn binaries(&self) -> &'static [&'static str] {
        match self {
            Self::Gcc => &["g++"],
            Self::Clang => &["clang++"],
            Self::Msvc => &["cl"],
            Self::Emscripten => &["em++"],
        }
    }

    /// Prefix of versioned installs such as `g++-13`
    pub fn versioned_prefix(&self) -> Option<&'static str> {
        match self {
            Self::Gcc => Some("g++-"),
            Self::Clang => Some("clang++-"),
            Self::Msvc | Self::Emscripten => None,
        }
    }

    /// Arguments that make the compiler print its banner
    pub fn version_args(&self) -> &'static [&'static str] {
        match self {
            // cl prints its banner on stderr when run without arguments
            Self::Msvc => &[],
            Self::Gcc | Self::Clang | Self::Emscripten => &["--version"],
        }
    }

    pub fn flag_syntax(&self) -> FlagSyntax {
        match self {
            Self::Msvc => FlagSyntax::Msvc,
            Self::Gcc | Self::Clang | Self::Emscripten => FlagSyntax::Gnu,
        }
    }

    /// Identify the family from version output.
    ///
    /// Emscripten is checked first because its banner mentions gcc and clang,
    /// and clang before gcc because Apple ships `g++` as a clang driver.
    pub fn identify(output: &str) -> Option<Self> {
        if output.contains("Emscripten") {
            Some(Self::Emscripten)
        } else if output.contains("clang version") {
            Some(Self::Clang)
        } else if output.contains("Microsoft (R) C/C++") {
            Some(Self::Msvc)
        } else if output.contains("(GCC)") || output.contains("Free Software Foundation") {
            Some(Self::Gcc)
        } else {
            None
        }
    }
}

impl fmt::Display for CompilerFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for CompilerFamily {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "gcc" | "g++" | "gnu" => Ok(Self::Gcc),
            "clang" | "clang++" | "llvm" => Ok(Self::Clang),
            "msvc" | "cl" => Ok(Self::Msvc),
            "emscripten" | "emcc" | "em++" => Ok(Self::Emscripten),
            other => Err(format!("unknown compiler family: {}", other)),
        }
    }
}

/// Supported CMake generators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GeneratorFamily {
    Ninja,
    Make,
    Msbuild,
    Xcode,
}

impl GeneratorFamily {
    pub fn all() -> &'static [Self] {
        &[Self::Ninja, Self::Make, Self::Msbuild, Self::Xcode]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ninja => "ninja",
            Self::Make => "make",
            Self::Msbuild => "msbuild",
            Self::Xcode => "xcode",
        }
    }

    pub fn binaries(&self) -> &'static [&'static str] {
        match self {
            Self::Ninja => &["ninja", "ninja-build"],
            Self::Make => &["make", "gmake"],
            Self::Msbuild => &["msbuild"],
            Self::Xcode => &["xcodebuild"],
        }
    }

    pub fn version_args(&self) -> &'static [&'static str] {
        match self {
            Self::Ninja | Self::Make => &["--version"],
            Self::Msbuild | Self::Xcode => &["-version"],
        }
    }

    /// Banner fragment identifying the tool; ninja prints a bare version
    pub fn banner(&self) -> Option<&'static str> {
        match self {
            Self::Ninja => None,
            Self::Make => Some("GNU Make"),
            Self::Msbuild => Some("MSBuild"),
            Self::Xcode => Some("Xcode"),
        }
    }

    /// Name passed to `cmake -G`
    pub fn cmake_name(&self) -> &'static str {
        match self {
            Self::Ninja => "Ninja",
            Self::Make => "Unix Makefiles",
            Self::Msbuild => "Visual Studio 17 2022",
            Self::Xcode => "Xcode",
        }
    }

    /// Multi-config generators take the profile at build time
    pub fn is_multi_config(&self) -> bool {
        matches!(self, Self::Msbuild | Self::Xcode)
    }
}

impl fmt::Display for GeneratorFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for GeneratorFamily {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ninja" | "ninja-build" => Ok(Self::Ninja),
            "make" | "gmake" | "unix makefiles" => Ok(Self::Make),
            "msbuild" | "visual studio" => Ok(Self::Msbuild),
            "xcode" | "xcodebuild" => Ok(Self::Xcode),
            other => Err(format!("unknown generator: {}", other)),
        }
    }
}

/// The build driver all generators are fed through
pub const BUILD_DRIVER: &str = "cmake";

/// Family of a detected tool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "family")]
pub enum ToolFamily {
    Compiler(CompilerFamily),
    Generator(GeneratorFamily),
    PackageManager(PackageManagerKind),
    BuildDriver,
}

impl ToolFamily {
    pub fn kind(&self) -> ToolKind {
        match self {
            Self::Compiler(_) => ToolKind::Compiler,
            Self::Generator(_) => ToolKind::Generator,
            Self::PackageManager(_) => ToolKind::PackageManager,
            Self::BuildDriver => ToolKind::BuildDriver,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Compiler(c) => c.as_str(),
            Self::Generator(g) => g.as_str(),
            Self::PackageManager(p) => p.as_str(),
            Self::BuildDriver => BUILD_DRIVER,
        }
    }
}

/// Tool version: semver when one could be parsed, raw text otherwise
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ToolVersion {
    Semantic(semver::Version),
    Opaque(String),
}

impl ToolVersion {
    /// Extract the first dotted version number from tool output
    pub fn parse(output: &str) -> Self {
        for token in output.split_whitespace() {
            let token = token.trim_start_matches(['(', 'v', 'V']);
            let numeric: String = token
                .chars()
                .take_while(|c| c.is_ascii_digit() || *c == '.')
                .collect();
            let parts: Vec<&str> = numeric.split('.').filter(|p| !p.is_empty()).collect();
            if parts.len() < 2 {
                continue;
            }
            let nums: Option<Vec<u64>> = parts.iter().take(3).map(|p| p.parse().ok()).collect();
            if let Some(nums) = nums {
                return Self::Semantic(semver::Version::new(
                    nums[0],
                    nums[1],
                    nums.get(2).copied().unwrap_or(0),
                ));
            }
        }

        let first_line = output.lines().map(str::trim).find(|l| !l.is_empty());
        Self::Opaque(first_line.unwrap_or("unknown").to_string())
    }

    pub fn major(&self) -> Option<u64> {
        match self {
            Self::Semantic(v) => Some(v.major),
            Self::Opaque(_) => None,
        }
    }
}

impl PartialOrd for ToolVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ToolVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Self::Semantic(a), Self::Semantic(b)) => a.cmp(b),
            (Self::Semantic(_), Self::Opaque(_)) => Ordering::Greater,
            (Self::Opaque(_), Self::Semantic(_)) => Ordering::Less,
            (Self::Opaque(a), Self::Opaque(b)) => a.cmp(b),
        }
    }
}

impl fmt::Display for ToolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Semantic(v) => write!(f, "{}", v),
            Self::Opaque(s) => write!(f, "{}", s),
        }
    }
}

/// A detected tool installation
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ToolchainCandidate {
    pub kind: ToolKind,
    pub family: ToolFamily,
    /// Executable file name, e.g. `clang++-17`
    pub name: String,
    pub version: ToolVersion,
    pub capability_flags: BTreeSet<String>,
    pub executable_path: PathBuf,
    pub detection_confidence: Confidence,
}

impl ToolchainCandidate {
    pub fn new(
        family: ToolFamily,
        name: impl Into<String>,
        version: ToolVersion,
        executable_path: impl Into<PathBuf>,
        detection_confidence: Confidence,
    ) -> Self {
        Self {
            kind: family.kind(),
            family,
            name: name.into(),
            version,
            capability_flags: BTreeSet::new(),
            executable_path: executable_path.into(),
            detection_confidence,
        }
    }

    pub fn compiler_family(&self) -> Option<CompilerFamily> {
        match self.family {
            ToolFamily::Compiler(c) => Some(c),
            _ => None,
        }
    }

    pub fn generator_family(&self) -> Option<GeneratorFamily> {
        match self.family {
            ToolFamily::Generator(g) => Some(g),
            _ => None,
        }
    }

    /// Whether a user-supplied name refers to this candidate
    /// (family name, executable name or full path)
    pub fn matches(&self, requested: &str) -> bool {
        self.family.name().eq_ignore_ascii_case(requested)
            || self.name == requested
            || self.executable_path.as_os_str() == requested
    }

    /// `name version (path)` for logs and reasoning
    pub fn label(&self) -> String {
        format!(
            "{} {} ({})",
            self.name,
            self.version,
            self.executable_path.display()
        )
    }

    /// Ordering used to pick among candidates of one family: exact detection
    /// first, then newest version
    pub fn preference(&self, other: &Self) -> Ordering {
        let exact = |c: &Self| c.detection_confidence == Confidence::Exact;
        exact(self)
            .cmp(&exact(other))
            .then_with(|| self.version.cmp(&other.version))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_gcc_version() {
        let out = "g++ (GCC) 13.2.1 20230801\nCopyright (C) 2023 Free Software Foundation, Inc.";
        assert_eq!(
            ToolVersion::parse(out),
            ToolVersion::Semantic(semver::Version::new(13, 2, 1))
        );
        assert_eq!(CompilerFamily::identify(out), Some(CompilerFamily::Gcc));
    }

    #[test]
    fn parse_apple_clang_masquerading_as_gxx() {
        let out = "Apple clang version 15.0.0 (clang-1500.1.0.2.5)\nTarget: arm64-apple-darwin23.2.0";
        assert_eq!(ToolVersion::parse(out).major(), Some(15));
        assert_eq!(CompilerFamily::identify(out), Some(CompilerFamily::Clang));
    }

    #[test]
    fn parse_two_component_version() {
        assert_eq!(
            ToolVersion::parse("GNU Make 4.4"),
            ToolVersion::Semantic(semver::Version::new(4, 4, 0))
        );
        assert_eq!(
            ToolVersion::parse("1.11.1.git.kitware.jobserver-1"),
            ToolVersion::Semantic(semver::Version::new(1, 11, 1))
        );
    }

    #[test]
    fn emscripten_identified_before_gcc() {
        let out = "emcc (Emscripten gcc/clang-like replacement + linker emulating GNU ld) 3.1.50";
        assert_eq!(CompilerFamily::identify(out), Some(CompilerFamily::Emscripten));
        assert_eq!(ToolVersion::parse(out).major(), Some(3));
    }

    #[test]
    fn unparseable_version_is_opaque() {
        let v = ToolVersion::parse("vcpkg package management program version 2024-01-11-710a3116");
        assert!(matches!(v, ToolVersion::Opaque(_)));
        assert!(ToolVersion::Semantic(semver::Version::new(0, 1, 0)) > v);
    }

    #[test]
    fn preference_orders_confidence_then_version() {
        let family = ToolFamily::Compiler(CompilerFamily::Gcc);
        let v = |s: &str| ToolVersion::Semantic(semver::Version::parse(s).unwrap());
        let old_exact = ToolchainCandidate::new(family, "g++-12", v("12.2.0"), "/usr/bin/g++-12", Confidence::Exact);
        let new_exact = ToolchainCandidate::new(family, "g++-14", v("14.1.0"), "/usr/bin/g++-14", Confidence::Exact);
        let newest_inferred =
            ToolchainCandidate::new(family, "g++-15", v("15.0.0"), "/opt/g++-15", Confidence::Inferred);

        assert_eq!(new_exact.preference(&old_exact), Ordering::Greater);
        assert_eq!(new_exact.preference(&newest_inferred), Ordering::Greater);
    }

    #[test]
    fn candidate_matches_family_name_or_path() {
        let c = ToolchainCandidate::new(
            ToolFamily::Compiler(CompilerFamily::Clang),
            "clang++-17",
            ToolVersion::Opaque("x".into()),
            "/usr/bin/clang++-17",
            Confidence::Exact,
        );
        assert!(c.matches("clang"));
        assert!(c.matches("clang++-17"));
        assert!(c.matches("/usr/bin/clang++-17"));
        assert!(!c.matches("nonexistent-cc"));
    }
}
