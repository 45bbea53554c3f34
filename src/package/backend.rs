//! Fetch steps per backend

use crate::package::{DependencySpec, PackageManagerKind};
use std::path::{Path, PathBuf};

/// Script handed to `cmake -P` for the CPM backend
pub const CPM_SCRIPT_NAME: &str = "cpm-fetch.cmake";

const CPM_SCRIPT: &str = r#"cmake_minimum_required(VERSION 3.14)
file(DOWNLOAD "${CPM_URL}" "${CPM_DEST}" STATUS status TLS_VERIFY ON)
list(GET status 0 code)
if(NOT code EQUAL 0)
  list(GET status 1 message)
  message(FATAL_ERROR "download of ${CPM_URL} failed: ${message}")
endif()
"#;

/// One command of a fetch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchStep {
    pub argv: Vec<String>,
    /// Write captured stdout to this file
    pub stdout_to: Option<PathBuf>,
}

impl FetchStep {
    fn new<I, S>(argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            argv: argv.into_iter().map(Into::into).collect(),
            stdout_to: None,
        }
    }

    fn capture_to(mut self, path: PathBuf) -> Self {
        self.stdout_to = Some(path);
        self
    }
}

/// Everything needed to fetch one dependency with one backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchPlan {
    pub steps: Vec<FetchStep>,
    /// Where the verified artifact ends up
    pub artifact: PathBuf,
    /// File to write before running the steps
    pub script: Option<(PathBuf, &'static str)>,
}

fn display(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

impl PackageManagerKind {
    /// Fetch plan for `spec`, staged under `staging`.
    ///
    /// `program` is the detected backend executable. Errors name why this
    /// backend cannot fetch the dependency at all.
    pub fn fetch_plan(
        &self,
        spec: &DependencySpec,
        staging: &Path,
        program: &Path,
    ) -> Result<FetchPlan, String> {
        let program = display(program);
        let stem = spec.artifact_stem();

        let plan = match self {
            Self::Nix => {
                let out_link = staging.join("result");
                let artifact = staging.join(format!("{}.nar", stem));
                let nix_store = Path::new(&program).with_file_name("nix-store");
                FetchPlan {
                    steps: vec![
                        FetchStep::new([
                            program.clone(),
                            "build".to_string(),
                            format!("nixpkgs#{}", spec.name),
                            "--out-link".to_string(),
                            display(&out_link),
                        ]),
                        FetchStep::new([display(&nix_store), "--dump".to_string(), display(&out_link)])
                            .capture_to(artifact.clone()),
                    ],
                    artifact,
                    script: None,
                }
            }
            Self::Vcpkg => FetchPlan {
                steps: vec![
                    FetchStep::new([program.clone(), "install".to_string(), spec.name.clone()]),
                    FetchStep::new([
                        program,
                        "export".to_string(),
                        spec.name.clone(),
                        "--zip".to_string(),
                        format!("--output-dir={}", display(staging)),
                        format!("--output={}", stem),
                    ]),
                ],
                artifact: staging.join(format!("{}.zip", stem)),
                script: None,
            },
            Self::Conan => {
                let reference = format!("{}/{}", spec.name, spec.version);
                let artifact = staging.join(format!("{}.tgz", stem));
                FetchPlan {
                    steps: vec![
                        FetchStep::new([
                            program.clone(),
                            "install".to_string(),
                            format!("--requires={}", reference),
                            "--build=missing".to_string(),
                        ]),
                        FetchStep::new([
                            program,
                            "cache".to_string(),
                            "save".to_string(),
                            reference,
                            "--file".to_string(),
                            display(&artifact),
                        ]),
                    ],
                    artifact,
                    script: None,
                }
            }
            Self::Cpm => {
                let source = spec
                    .source
                    .as_deref()
                    .ok_or_else(|| format!("{} declares no source URL", spec.id()))?;
                let script = staging.join(CPM_SCRIPT_NAME);
                let artifact = staging.join(format!("{}{}", stem, archive_suffix(source)));
                FetchPlan {
                    steps: vec![FetchStep::new([
                        program,
                        format!("-DCPM_URL={}", source),
                        format!("-DCPM_DEST={}", display(&artifact)),
                        "-P".to_string(),
                        display(&script),
                    ])],
                    artifact,
                    script: Some((script, CPM_SCRIPT)),
                }
            }
        };

        Ok(plan)
    }
}

/// Keep the archive extension of a source URL so consumers can unpack it
fn archive_suffix(url: &str) -> &'static str {
    const SUFFIXES: &[&str] = &[".tar.gz", ".tar.xz", ".tar.bz2", ".tgz", ".zip"];
    let path = url.split(['?', '#']).next().unwrap_or(url);
    SUFFIXES
        .iter()
        .find(|s| path.ends_with(*s))
        .copied()
        .unwrap_or(".archive")
}
