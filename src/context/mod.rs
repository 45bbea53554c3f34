//! Build context assembly
//!
//! A [`BuildContext`] is everything one build needs: the selected tools,
//! merged flags, tool environment and a fingerprint over all of it.
//! Building a context has no side effects.

mod commands;
pub mod flags;

pub use commands::Action;

use crate::config::Config;
use crate::error::{BuildError, BuildResult};
use crate::platform::Platform;
use crate::toolchain::{CompilerFamily, Selection};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Build profile
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Profile {
    Debug,
    Release,
    RelWithDebInfo,
    MinSizeRel,
}

impl Profile {
    pub fn all() -> &'static [Self] {
        &[Self::Debug, Self::Release, Self::RelWithDebInfo, Self::MinSizeRel]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Release => "release",
            Self::RelWithDebInfo => "relwithdebinfo",
            Self::MinSizeRel => "minsizerel",
        }
    }

    /// `CMAKE_BUILD_TYPE` value
    pub fn cmake_name(&self) -> &'static str {
        match self {
            Self::Debug => "Debug",
            Self::Release => "Release",
            Self::RelWithDebInfo => "RelWithDebInfo",
            Self::MinSizeRel => "MinSizeRel",
        }
    }
}

impl fmt::Display for Profile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Profile {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "debug" => Ok(Self::Debug),
            "release" => Ok(Self::Release),
            "relwithdebinfo" => Ok(Self::RelWithDebInfo),
            "minsizerel" => Ok(Self::MinSizeRel),
            other => Err(format!("unknown profile: {}", other)),
        }
    }
}

/// Hex SHA-256 over a canonical JSON rendering
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Fingerprint any serializable value. Object keys are sorted, so field
    /// and map ordering never changes the result.
    pub fn of<T: Serialize>(value: &T) -> BuildResult<Self> {
        let canonical = serde_json::to_vec(&serde_json::to_value(value)?)?;
        Ok(Self(hex::encode(Sha256::digest(&canonical))))
    }

    /// Parse a user-supplied fingerprint
    pub fn parse(s: &str) -> BuildResult<Self> {
        let s = s.trim().to_ascii_lowercase();
        if s.len() != 64 || !s.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(BuildError::invalid_invocation(format!(
                "'{}' is not a fingerprint (64 hex characters)",
                s
            )));
        }
        Ok(Self(s))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 12 characters, for display
    pub fn short(&self) -> &str {
        &self.0[..12.min(self.0.len())]
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Everything one build needs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildContext {
    pub target: String,
    pub profile: Profile,
    pub platform: Platform,
    pub selection: Selection,
    pub environment: BTreeMap<String, String>,
    pub flags: Vec<String>,
    pub source_dir: PathBuf,
    pub build_dir: PathBuf,
    pub fingerprint: Fingerprint,
}

/// Fields that identify a context; reasoning and probe details are left out
#[derive(Serialize)]
struct ContextIdentity<'a> {
    target: &'a str,
    profile: Profile,
    platform: &'a Platform,
    compiler: ToolIdentity<'a>,
    generator: ToolIdentity<'a>,
    build_driver: ToolIdentity<'a>,
    package_manager: &'a str,
    flags: &'a [String],
    environment: &'a BTreeMap<String, String>,
    source_dir: &'a Path,
    build_dir: &'a Path,
}

#[derive(Serialize)]
struct ToolIdentity<'a> {
    family: &'a str,
    name: &'a str,
    version: String,
    path: &'a Path,
}

impl<'a> ToolIdentity<'a> {
    fn of(candidate: &'a crate::toolchain::ToolchainCandidate) -> Self {
        Self {
            family: candidate.family.name(),
            name: &candidate.name,
            version: candidate.version.to_string(),
            path: &candidate.executable_path,
        }
    }
}

/// Assembles [`BuildContext`]s for one platform and configuration
pub struct BuildContextBuilder<'a> {
    platform: &'a Platform,
    config: &'a Config,
}

impl<'a> BuildContextBuilder<'a> {
    pub fn new(platform: &'a Platform, config: &'a Config) -> Self {
        Self { platform, config }
    }

    /// Merge flag layers, derive the tool environment and fingerprint the result
    pub fn build(&self, target: &str, profile: Profile, selection: Selection) -> BuildResult<BuildContext> {
        validate_target(target)?;

        let family = selection.compiler_family();
        let syntax = family.flag_syntax();

        let mut flags = flags::profile_layer(profile, syntax);
        flags::merge(&mut flags, &flags::platform_layer(self.platform.os_family, syntax));
        flags::merge(
            &mut flags,
            &flags::toolchain_layer(family, &self.config.toolchain.cxx_standard),
        );
        flags::merge(&mut flags, &self.config.flags.overrides);

        let source_dir = self.config.layout.source_dir.clone();
        let build_dir = source_dir
            .join(&self.config.layout.build_root)
            .join(target)
            .join(profile.as_str());

        let mut environment = BTreeMap::new();
        let cxx = &selection.compiler.executable_path;
        environment.insert("CXX".to_string(), cxx.to_string_lossy().into_owned());
        environment.insert("CC".to_string(), c_compiler(family, cxx).to_string_lossy().into_owned());
        environment.insert(
            "CMAKE_GENERATOR".to_string(),
            selection.generator_family().cmake_name().to_string(),
        );
        environment.insert("CMAKE_BUILD_TYPE".to_string(), profile.cmake_name().to_string());
        environment.insert("CXXFLAGS".to_string(), flags.join(" "));
        environment.extend(
            self.config
                .env
                .iter()
                .map(|(k, v)| (k.clone(), v.clone())),
        );

        let fingerprint = Fingerprint::of(&ContextIdentity {
            target,
            profile,
            platform: self.platform,
            compiler: ToolIdentity::of(&selection.compiler),
            generator: ToolIdentity::of(&selection.generator),
            build_driver: ToolIdentity::of(&selection.build_driver),
            package_manager: selection.package_manager.name(),
            flags: &flags,
            environment: &environment,
            source_dir: &source_dir,
            build_dir: &build_dir,
        })?;

        Ok(BuildContext {
            target: target.to_string(),
            profile,
            platform: self.platform.clone(),
            selection,
            environment,
            flags,
            source_dir,
            build_dir,
            fingerprint,
        })
    }
}

/// Target names end up in paths and argv
fn validate_target(target: &str) -> BuildResult<()> {
    let valid = !target.is_empty()
        && !target.starts_with(['-', '.'])
        && target
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));
    if valid {
        Ok(())
    } else {
        Err(BuildError::invalid_invocation(format!(
            "invalid target name '{}'",
            target
        )))
    }
}

/// C compiler that pairs with a C++ compiler
fn c_compiler(family: CompilerFamily, cxx: &Path) -> PathBuf {
    let name = cxx
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let c_name = match family {
        CompilerFamily::Gcc => name.replacen("g++", "gcc", 1),
        CompilerFamily::Clang => name.replacen("clang++", "clang", 1),
        CompilerFamily::Emscripten => name.replacen("em++", "emcc", 1),
        CompilerFamily::Msvc => name,
    };
    cxx.with_file_name(c_name)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::package::FallbackChain;
    use crate::platform::{Arch, OsFamily};
    use crate::toolchain::{
        Confidence, GeneratorFamily, ToolFamily, ToolVersion, ToolchainCandidate,
    };

    fn tool(family: ToolFamily, name: &str, version: &str) -> ToolchainCandidate {
        ToolchainCandidate::new(
            family,
            name,
            ToolVersion::parse(version),
            format!("/usr/bin/{}", name),
            Confidence::Exact,
        )
    }

    pub(crate) fn selection(compiler: CompilerFamily, name: &str) -> Selection {
        Selection {
            compiler: tool(ToolFamily::Compiler(compiler), name, "13.2.1"),
            generator: tool(ToolFamily::Generator(GeneratorFamily::Ninja), "ninja", "1.11.1"),
            build_driver: tool(ToolFamily::BuildDriver, "cmake", "3.28.1"),
            package_manager: FallbackChain::default().descriptors()[3].clone(),
            reasoning: vec![],
        }
    }

    fn platform() -> Platform {
        Platform {
            os_family: OsFamily::Linux,
            arch: Arch::X86_64,
            distro: Some("debian".into()),
            distro_family: Some(crate::platform::DistroFamily::Debian),
            in_reproducible_shell: false,
        }
    }

    #[test]
    fn build_is_pure() {
        let platform = platform();
        let config = Config::default();
        let builder = BuildContextBuilder::new(&platform, &config);

        let a = builder.build("game", Profile::Release, selection(CompilerFamily::Gcc, "g++")).unwrap();
        let b = builder.build("game", Profile::Release, selection(CompilerFamily::Gcc, "g++")).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.fingerprint.as_str().len(), 64);

        let debug = builder.build("game", Profile::Debug, selection(CompilerFamily::Gcc, "g++")).unwrap();
        assert_ne!(a.fingerprint, debug.fingerprint);
    }

    #[test]
    fn reasoning_does_not_change_fingerprint() {
        let platform = platform();
        let config = Config::default();
        let builder = BuildContextBuilder::new(&platform, &config);

        let mut with_reasoning = selection(CompilerFamily::Gcc, "g++");
        with_reasoning
            .reasoning
            .push(crate::toolchain::DecisionStep::chosen(crate::toolchain::Role::Compiler, "x"));

        let a = builder.build("game", Profile::Debug, selection(CompilerFamily::Gcc, "g++")).unwrap();
        let b = builder.build("game", Profile::Debug, with_reasoning).unwrap();
        assert_eq!(a.fingerprint, b.fingerprint);
    }

    #[test]
    fn layers_never_shrink() {
        let platform = platform();
        let overrides = [
            vec![],
            vec!["-O3".to_string()],
            vec!["-std=c++23".to_string(), "-O1".to_string(), "-DNDEBUG=1".to_string()],
            vec!["-fno-exceptions".to_string(), "-Wall".to_string()],
        ];

        for profile in Profile::all() {
            let mandatory = flags::profile_layer(*profile, crate::toolchain::FlagSyntax::Gnu).len()
                + flags::platform_layer(OsFamily::Linux, crate::toolchain::FlagSyntax::Gnu).len()
                + flags::toolchain_layer(CompilerFamily::Gcc, "c++20").len();

            for user in &overrides {
                let mut config = Config::default();
                config.flags.overrides = user.clone();
                let ctx = BuildContextBuilder::new(&platform, &config)
                    .build("game", *profile, selection(CompilerFamily::Gcc, "g++"))
                    .unwrap();
                assert!(ctx.flags.len() >= mandatory, "{:?} lost flags: {:?}", user, ctx.flags);
            }
        }
    }

    #[test]
    fn user_override_replaces_standard() {
        let platform = platform();
        let mut config = Config::default();
        config.flags.overrides = vec!["-std=c++23".to_string()];
        let ctx = BuildContextBuilder::new(&platform, &config)
            .build("game", Profile::Debug, selection(CompilerFamily::Clang, "clang++-17"))
            .unwrap();

        assert_eq!(ctx.flags.iter().filter(|f| f.starts_with("-std=")).count(), 1);
        assert!(ctx.flags.contains(&"-std=c++23".to_string()));
        assert!(ctx.flags.contains(&"-fcolor-diagnostics".to_string()));
    }

    #[test]
    fn environment_carries_tools_and_config() {
        let platform = platform();
        let mut config = Config::default();
        config.env.insert("CCACHE_DIR".into(), "/var/cache/ccache".into());
        let ctx = BuildContextBuilder::new(&platform, &config)
            .build("game", Profile::Release, selection(CompilerFamily::Clang, "clang++-17"))
            .unwrap();

        assert_eq!(ctx.environment["CXX"], "/usr/bin/clang++-17");
        assert_eq!(ctx.environment["CC"], "/usr/bin/clang-17");
        assert_eq!(ctx.environment["CMAKE_GENERATOR"], "Ninja");
        assert_eq!(ctx.environment["CMAKE_BUILD_TYPE"], "Release");
        assert_eq!(ctx.environment["CCACHE_DIR"], "/var/cache/ccache");
        assert!(ctx.environment["CXXFLAGS"].contains("-DNDEBUG"));
        assert!(ctx.build_dir.ends_with("build/game/release"));
    }

    #[test]
    fn msvc_uses_msvc_syntax() {
        let mut platform = platform();
        platform.os_family = OsFamily::Windows;
        let config = Config::default();
        let ctx = BuildContextBuilder::new(&platform, &config)
            .build("game", Profile::Debug, selection(CompilerFamily::Msvc, "cl"))
            .unwrap();
        assert!(ctx.flags.iter().all(|f| f.starts_with('/')));
    }

    #[test]
    fn rejects_path_like_targets() {
        let platform = platform();
        let config = Config::default();
        let builder = BuildContextBuilder::new(&platform, &config);
        for bad in ["", "../x", "a/b", "--target"] {
            assert!(builder.build(bad, Profile::Debug, selection(CompilerFamily::Gcc, "g++")).is_err());
        }
    }

    #[test]
    fn fingerprint_parse() {
        let fp = Fingerprint::of(&"x").unwrap();
        assert_eq!(Fingerprint::parse(&fp.as_str().to_uppercase()).unwrap(), fp);
        assert!(Fingerprint::parse("abc").is_err());
        assert_eq!(fp.short().len(), 12);
    }
}
