//! Tool discovery on the search path

use crate::invoke::{Invocation, Invoker};
use crate::package::{FallbackChain, PackageManagerDescriptor, PackageManagerKind};
use crate::platform::Platform;
use crate::toolchain::candidate::{
    CompilerFamily, Confidence, FlagSyntax, GeneratorFamily, ToolFamily, ToolVersion,
    ToolchainCandidate, BUILD_DRIVER,
};
use std::collections::{BTreeSet, HashSet};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

/// Language standards checked by the capability probe
const PROBED_STANDARDS: &[&str] = &["c++17", "c++20", "c++23"];

const PROBE_SOURCE: &str = "#include <cstddef>\nint main() { return 0; }\n";

/// Everything found by one probe pass
#[derive(Debug, Clone, Default)]
pub struct ToolInventory {
    pub compilers: Vec<ToolchainCandidate>,
    pub generators: Vec<ToolchainCandidate>,
    pub package_managers: Vec<ToolchainCandidate>,
    pub build_driver: Option<ToolchainCandidate>,
}

impl ToolInventory {
    /// Chain entries whose backend was found. Nix only counts inside a
    /// reproducible shell.
    pub fn available_package_managers(
        &self,
        chain: &FallbackChain,
        platform: &Platform,
    ) -> BTreeSet<PackageManagerDescriptor> {
        chain
            .descriptors()
            .iter()
            .filter(|d| {
                let found = self
                    .package_managers
                    .iter()
                    .any(|c| c.family == ToolFamily::PackageManager(d.kind));
                found && (!d.kind.requires_reproducible_shell() || platform.in_reproducible_shell)
            })
            .cloned()
            .collect()
    }

    /// Every candidate, for reports
    pub fn all(&self) -> impl Iterator<Item = &ToolchainCandidate> {
        self.compilers
            .iter()
            .chain(&self.generators)
            .chain(&self.build_driver)
            .chain(&self.package_managers)
    }
}

/// Finds compilers, generators and package managers and caches the result
pub struct ToolProbe {
    search_dirs: Vec<PathBuf>,
    invoker: Arc<dyn Invoker>,
    probe_timeout: Duration,
    probe_capabilities: bool,
    inventory: Mutex<Arc<OnceCell<Arc<ToolInventory>>>>,
}

impl ToolProbe {
    /// Probe the directories of `search_path` (a `PATH`-style list)
    pub fn new(search_path: &OsStr, invoker: Arc<dyn Invoker>) -> Self {
        Self {
            search_dirs: std::env::split_paths(search_path).collect(),
            invoker,
            probe_timeout: Duration::from_secs(10),
            probe_capabilities: true,
            inventory: Mutex::new(Arc::new(OnceCell::new())),
        }
    }

    /// Search these directories after the ones on the search path
    pub fn with_extra_dirs(mut self, dirs: &[PathBuf]) -> Self {
        self.search_dirs.extend(dirs.iter().cloned());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    pub fn with_capability_probe(mut self, enabled: bool) -> Self {
        self.probe_capabilities = enabled;
        self
    }

    /// Probe once; later calls return the cached inventory
    pub async fn inventory(&self) -> Arc<ToolInventory> {
        let cell = self
            .inventory
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        cell.get_or_init(|| async { Arc::new(self.probe_all().await) })
            .await
            .clone()
    }

    /// Drop the cached inventory and probe again
    pub async fn refresh(&self) -> Arc<ToolInventory> {
        *self
            .inventory
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Arc::new(OnceCell::new());
        self.inventory().await
    }

    pub async fn available_compilers(&self) -> Vec<ToolchainCandidate> {
        self.inventory().await.compilers.clone()
    }

    pub async fn available_generators(&self) -> Vec<ToolchainCandidate> {
        self.inventory().await.generators.clone()
    }

    pub async fn build_driver(&self) -> Option<ToolchainCandidate> {
        self.inventory().await.build_driver.clone()
    }

    pub async fn available_package_managers(
        &self,
        chain: &FallbackChain,
        platform: &Platform,
    ) -> BTreeSet<PackageManagerDescriptor> {
        self.inventory()
            .await
            .available_package_managers(chain, platform)
    }

    async fn probe_all(&self) -> ToolInventory {
        debug!("Probing tools in {} directories", self.search_dirs.len());

        let scratch = if self.probe_capabilities {
            match scratch_source() {
                Ok(scratch) => Some(scratch),
                Err(e) => {
                    warn!("Skipping capability probe: {}", e);
                    None
                }
            }
        } else {
            None
        };
        let source = scratch.as_ref().map(|(_, path)| path.as_path());

        let mut seen = HashSet::new();
        let mut compilers = Vec::new();
        for family in CompilerFamily::all() {
            for (name, path) in self.locate(family.binaries(), family.versioned_prefix(), &mut seen) {
                compilers.push(self.probe_compiler(*family, name, path, source).await);
            }
        }

        let mut seen = HashSet::new();
        let mut generators = Vec::new();
        for family in GeneratorFamily::all() {
            for (name, path) in self.locate(family.binaries(), None, &mut seen) {
                generators.push(self.probe_generator(*family, name, path).await);
            }
        }

        let build_driver = match self.locate(&[BUILD_DRIVER], None, &mut HashSet::new()).into_iter().next() {
            Some((name, path)) => {
                let output = self.version_output(&path, &["--version"]).await;
                Some(candidate_from_banner(
                    ToolFamily::BuildDriver,
                    name,
                    path,
                    output,
                    Some("cmake version"),
                ))
            }
            None => None,
        };

        let mut package_managers = Vec::new();
        for kind in PackageManagerKind::all() {
            let Some((name, path)) = self
                .locate(&[kind.binary()], None, &mut HashSet::new())
                .into_iter()
                .next()
            else {
                continue;
            };
            let output = self.version_output(&path, kind.version_args()).await;
            package_managers.push(candidate_from_banner(
                ToolFamily::PackageManager(*kind),
                name,
                path,
                output,
                Some(kind.banner()),
            ));
        }

        info!(
            compilers = compilers.len(),
            generators = generators.len(),
            package_managers = package_managers.len(),
            build_driver = build_driver.is_some(),
            "Tool probe complete"
        );

        ToolInventory {
            compilers,
            generators,
            package_managers,
            build_driver,
        }
    }

    /// Executables called `names` or `<prefix><version>`, one per canonical file
    fn locate(
        &self,
        names: &[&str],
        versioned_prefix: Option<&str>,
        seen: &mut HashSet<PathBuf>,
    ) -> Vec<(String, PathBuf)> {
        let mut wanted: Vec<String> = names.iter().map(|n| n.to_string()).collect();

        if let Some(prefix) = versioned_prefix {
            let mut versioned = BTreeSet::new();
            for dir in &self.search_dirs {
                let Ok(entries) = std::fs::read_dir(dir) else {
                    continue;
                };
                for entry in entries.flatten() {
                    let name = entry.file_name().to_string_lossy().into_owned();
                    if name.strip_prefix(prefix).is_some_and(is_version_suffix) {
                        versioned.insert(name);
                    }
                }
            }
            wanted.extend(versioned);
        }

        let Ok(paths) = std::env::join_paths(&self.search_dirs) else {
            warn!("Search path contains an invalid directory");
            return Vec::new();
        };
        let cwd = std::env::current_dir().unwrap_or_default();

        let mut found = Vec::new();
        for name in wanted {
            let Ok(hits) = which::which_in_all(&name, Some(&paths), &cwd) else {
                continue;
            };
            for path in hits {
                let canonical = std::fs::canonicalize(&path).unwrap_or_else(|_| path.clone());
                if seen.insert(canonical) {
                    found.push((name.clone(), path));
                } else {
                    debug!("{} duplicates an earlier candidate", path.display());
                }
            }
        }
        found
    }

    async fn probe_compiler(
        &self,
        expected: CompilerFamily,
        name: String,
        path: PathBuf,
        source: Option<&Path>,
    ) -> ToolchainCandidate {
        let output = self.version_output(&path, expected.version_args()).await;

        let (family, confidence) = match output.as_deref().and_then(CompilerFamily::identify) {
            Some(actual) => {
                if actual != expected {
                    debug!("{} identifies as {}", path.display(), actual);
                }
                (actual, Confidence::Exact)
            }
            None => (expected, Confidence::Inferred),
        };
        let version = output
            .as_deref()
            .map(ToolVersion::parse)
            .unwrap_or_else(|| ToolVersion::Opaque("unknown".to_string()));

        let mut candidate =
            ToolchainCandidate::new(ToolFamily::Compiler(family), name, version, path, confidence);

        if let Some(source) = source {
            if family.flag_syntax() == FlagSyntax::Gnu {
                candidate.capability_flags = self.probe_standards(&candidate.executable_path, source).await;
            }
        }

        debug!(
            confidence = ?candidate.detection_confidence,
            capabilities = ?candidate.capability_flags,
            "Compiler {}",
            candidate.label()
        );
        candidate
    }

    async fn probe_generator(
        &self,
        family: GeneratorFamily,
        name: String,
        path: PathBuf,
    ) -> ToolchainCandidate {
        let output = self.version_output(&path, family.version_args()).await;
        let candidate = candidate_from_banner(ToolFamily::Generator(family), name, path, output, family.banner());
        debug!("Generator {}", candidate.label());
        candidate
    }

    /// Trivial `-fsyntax-only` compile per language standard
    async fn probe_standards(&self, compiler: &Path, source: &Path) -> BTreeSet<String> {
        let mut supported = BTreeSet::new();
        for std in PROBED_STANDARDS {
            let invocation = Invocation::new([
                compiler.to_string_lossy().into_owned(),
                format!("-std={}", std),
                "-fsyntax-only".to_string(),
                source.to_string_lossy().into_owned(),
            ])
            .timeout(self.probe_timeout);

            match self.invoker.invoke(&invocation).await {
                Ok(result) if result.success() => {
                    supported.insert(std.to_string());
                }
                Ok(_) => {}
                Err(e) => debug!("Capability probe failed: {}", e),
            }
        }
        supported
    }

    /// Combined stdout and stderr of a version query, `None` when the tool
    /// could not be run or said nothing
    async fn version_output(&self, path: &Path, args: &[&str]) -> Option<String> {
        let mut argv = vec![path.to_string_lossy().into_owned()];
        argv.extend(args.iter().map(|a| a.to_string()));
        let invocation = Invocation::new(argv).timeout(self.probe_timeout);

        match self.invoker.invoke(&invocation).await {
            Ok(result) if result.timed_out => {
                warn!("{} timed out", invocation.command_line());
                None
            }
            Ok(result) => {
                let text = format!("{}{}", result.stdout_lossy(), result.stderr_lossy());
                (!text.trim().is_empty()).then_some(text)
            }
            Err(e) => {
                warn!("Could not query {}: {}", path.display(), e);
                None
            }
        }
    }
}

/// Candidate whose confidence comes from a banner substring. Tools without
/// a banner are exact when they print nothing but a version.
fn candidate_from_banner(
    family: ToolFamily,
    name: String,
    path: PathBuf,
    output: Option<String>,
    banner: Option<&str>,
) -> ToolchainCandidate {
    let (version, confidence) = match output {
        Some(text) => {
            let version = ToolVersion::parse(&text);
            let exact = match banner {
                Some(banner) => text.contains(banner),
                None => {
                    matches!(version, ToolVersion::Semantic(_)) && text.trim().lines().count() == 1
                }
            };
            let confidence = if exact {
                Confidence::Exact
            } else {
                Confidence::Inferred
            };
            (version, confidence)
        }
        None => (
            ToolVersion::Opaque("unknown".to_string()),
            Confidence::Inferred,
        ),
    };
    ToolchainCandidate::new(family, name, version, path, confidence)
}

fn is_version_suffix(s: &str) -> bool {
    s.starts_with(|c: char| c.is_ascii_digit()) && s.chars().all(|c| c.is_ascii_digit() || c == '.')
}

fn scratch_source() -> std::io::Result<(tempfile::TempDir, PathBuf)> {
    let dir = tempfile::Builder::new().prefix("buildwright-probe").tempdir()?;
    let path = dir.path().join("probe.cpp");
    std::fs::write(&path, PROBE_SOURCE)?;
    Ok((dir, path))
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::testutil::{self, fake_tool, ScriptedInvoker};
    use tempfile::TempDir;

    const GCC13: &str = "g++-13 (GCC) 13.2.1 20230801\nCopyright (C) 2023 Free Software Foundation, Inc.\n";
    const GCC12: &str = "g++ (Debian 12.2.0-14) 12.2.0\nCopyright (C) 2022 Free Software Foundation, Inc.\n";

    fn probe(dir: &Path, invoker: ScriptedInvoker) -> ToolProbe {
        ToolProbe::new(dir.as_os_str(), Arc::new(invoker)).with_capability_probe(false)
    }

    #[tokio::test]
    async fn finds_versioned_compilers() {
        let dir = TempDir::new().unwrap();
        fake_tool(dir.path(), "g++");
        fake_tool(dir.path(), "g++-13");
        fake_tool(dir.path(), "g++-tools"); // not a version suffix

        let invoker = ScriptedInvoker::new()
            .on("g++-13 --version", |_| testutil::ok(GCC13))
            .on("g++ --version", |_| testutil::ok(GCC12));
        let compilers = probe(dir.path(), invoker).available_compilers().await;

        let names: Vec<_> = compilers.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["g++", "g++-13"]);
        assert!(compilers.iter().all(|c| c.detection_confidence == Confidence::Exact));
        assert_eq!(compilers[1].version.major(), Some(13));
    }

    #[tokio::test]
    async fn symlinked_binaries_reported_once() {
        let dir = TempDir::new().unwrap();
        let real = fake_tool(dir.path(), "clang++-17");
        std::os::unix::fs::symlink(&real, dir.path().join("clang++")).unwrap();

        let invoker = ScriptedInvoker::new().on("--version", |_| testutil::ok("clang version 17.0.6\n"));
        let compilers = probe(dir.path(), invoker).available_compilers().await;
        assert_eq!(compilers.len(), 1);
    }

    #[tokio::test]
    async fn unrecognised_banner_is_inferred() {
        let dir = TempDir::new().unwrap();
        fake_tool(dir.path(), "g++");

        let invoker = ScriptedInvoker::new().on("--version", |_| testutil::ok("mystery compiler 1.0\n"));
        let compilers = probe(dir.path(), invoker).available_compilers().await;
        assert_eq!(compilers[0].detection_confidence, Confidence::Inferred);
        assert_eq!(compilers[0].compiler_family(), Some(CompilerFamily::Gcc));
    }

    #[tokio::test]
    async fn apple_gxx_is_reclassified_as_clang() {
        let dir = TempDir::new().unwrap();
        fake_tool(dir.path(), "g++");

        let invoker = ScriptedInvoker::new()
            .on("--version", |_| testutil::ok("Apple clang version 15.0.0 (clang-1500.1.0.2.5)\n"));
        let compilers = probe(dir.path(), invoker).available_compilers().await;
        assert_eq!(compilers[0].compiler_family(), Some(CompilerFamily::Clang));
    }

    #[tokio::test]
    async fn capability_probe_records_standards() {
        let dir = TempDir::new().unwrap();
        fake_tool(dir.path(), "clang++");

        let invoker = ScriptedInvoker::new()
            .on("--version", |_| testutil::ok("clang version 17.0.6\n"))
            .on("-std=c++23", |_| testutil::exit(1, "", "error: invalid value 'c++23'"))
            .on("-fsyntax-only", |_| testutil::ok(""));
        let probe = ToolProbe::new(dir.path().as_os_str(), Arc::new(invoker));
        let compilers = probe.available_compilers().await;

        let flags: Vec<_> = compilers[0].capability_flags.iter().cloned().collect();
        assert_eq!(flags, vec!["c++17", "c++20"]);
    }

    #[tokio::test]
    async fn generators_driver_and_package_managers() {
        let dir = TempDir::new().unwrap();
        fake_tool(dir.path(), "ninja");
        fake_tool(dir.path(), "cmake");
        fake_tool(dir.path(), "conan");
        fake_tool(dir.path(), "nix");

        let invoker = ScriptedInvoker::new()
            .on("ninja --version", |_| testutil::ok("1.11.1\n"))
            .on("cmake --version", |_| testutil::ok("cmake version 3.28.1\n"))
            .on("conan --version", |_| testutil::ok("Conan version 2.0.17\n"))
            .on("nix --version", |_| testutil::ok("nix (Nix) 2.18.1\n"));
        let probe = probe(dir.path(), invoker);
        let inventory = probe.inventory().await;

        assert_eq!(inventory.generators.len(), 1);
        assert_eq!(inventory.generators[0].detection_confidence, Confidence::Exact);
        assert!(inventory.build_driver.is_some());

        let chain = FallbackChain::default();
        let mut platform = testutil::linux_platform();
        let kinds = |set: BTreeSet<PackageManagerDescriptor>| {
            set.into_iter().map(|d| d.kind).collect::<Vec<_>>()
        };
        assert_eq!(
            kinds(inventory.available_package_managers(&chain, &platform)),
            vec![PackageManagerKind::Conan, PackageManagerKind::Cpm]
        );

        platform.in_reproducible_shell = true;
        assert_eq!(
            kinds(inventory.available_package_managers(&chain, &platform)),
            vec![PackageManagerKind::Nix, PackageManagerKind::Conan, PackageManagerKind::Cpm]
        );
    }

    #[tokio::test]
    async fn inventory_is_cached_until_refresh() {
        let dir = TempDir::new().unwrap();
        fake_tool(dir.path(), "make");

        let invoker = Arc::new(
            ScriptedInvoker::new().on("make --version", |_| testutil::ok("GNU Make 4.4.1\n")),
        );
        let probe = ToolProbe::new(dir.path().as_os_str(), invoker.clone()).with_capability_probe(false);

        probe.inventory().await;
        probe.inventory().await;
        assert_eq!(invoker.count("make --version"), 1);

        fake_tool(dir.path(), "ninja");
        let refreshed = probe.refresh().await;
        assert_eq!(invoker.count("make --version"), 2);
        assert_eq!(refreshed.generators.len(), 2);
    }

    #[tokio::test]
    async fn extra_dirs_are_searched() {
        let path_dir = TempDir::new().unwrap();
        let extra = TempDir::new().unwrap();
        fake_tool(extra.path(), "em++");

        let invoker = ScriptedInvoker::new().on("em++ --version", |_| {
            testutil::ok("emcc (Emscripten gcc/clang-like replacement + linker emulating GNU ld) 3.1.50\n")
        });
        let probe = probe(path_dir.path(), invoker).with_extra_dirs(&[extra.path().to_path_buf()]);
        let compilers = probe.available_compilers().await;

        assert_eq!(compilers.len(), 1);
        assert_eq!(compilers[0].compiler_family(), Some(CompilerFamily::Emscripten));
    }
}
