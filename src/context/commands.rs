//! CMake command lines for a build context

use crate::context::BuildContext;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// What a run should do after configuring
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Configure,
    Build,
    Clean,
    Test,
    Package,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Configure => "configure",
            Self::Build => "build",
            Self::Clean => "clean",
            Self::Test => "test",
            Self::Package => "package",
        }
    }

    /// Whether dependencies must be resolved before running
    pub fn needs_dependencies(&self) -> bool {
        !matches!(self, Self::Clean)
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Action {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "configure" => Ok(Self::Configure),
            "build" => Ok(Self::Build),
            "clean" => Ok(Self::Clean),
            "test" => Ok(Self::Test),
            "package" => Ok(Self::Package),
            other => Err(format!("unknown action: {}", other)),
        }
    }
}

fn lossy(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

impl BuildContext {
    fn multi_config(&self) -> bool {
        self.selection.generator_family().is_multi_config()
    }

    /// Sibling tool of the cmake executable (`ctest`, `cpack`)
    fn driver_tool(&self, name: &str) -> String {
        lossy(&self.selection.build_driver.executable_path.with_file_name(name))
    }

    fn with_config(&self, mut argv: Vec<String>, flag: &str) -> Vec<String> {
        if self.multi_config() {
            argv.push(flag.to_string());
            argv.push(self.profile.cmake_name().to_string());
        }
        argv
    }

    /// `cmake -S <src> -B <build> -G <generator> ...`
    pub fn configure_command(&self) -> Vec<String> {
        let generator = self.selection.generator_family();
        let mut argv = vec![
            lossy(&self.selection.build_driver.executable_path),
            "-S".to_string(),
            lossy(&self.source_dir),
            "-B".to_string(),
            lossy(&self.build_dir),
            "-G".to_string(),
            generator.cmake_name().to_string(),
        ];
        if !generator.is_multi_config() {
            argv.push(format!("-DCMAKE_BUILD_TYPE={}", self.profile.cmake_name()));
            argv.push(format!(
                "-DCMAKE_CXX_COMPILER={}",
                lossy(&self.selection.compiler.executable_path)
            ));
            argv.push(format!(
                "-DCMAKE_MAKE_PROGRAM={}",
                lossy(&self.selection.generator.executable_path)
            ));
        }
        argv.push(format!("-DCMAKE_CXX_FLAGS={}", self.flags.join(" ")));
        argv
    }

    /// Command for `action` alone, without the configure step
    pub fn action_command(&self, action: Action) -> Option<Vec<String>> {
        let cmake = lossy(&self.selection.build_driver.executable_path);
        let build_dir = lossy(&self.build_dir);

        let argv = match action {
            Action::Configure => return None,
            Action::Build => self.with_config(
                vec![
                    cmake,
                    "--build".to_string(),
                    build_dir,
                    "--target".to_string(),
                    self.target.clone(),
                    "--parallel".to_string(),
                ],
                "--config",
            ),
            Action::Clean => self.with_config(
                vec![
                    cmake,
                    "--build".to_string(),
                    build_dir,
                    "--target".to_string(),
                    "clean".to_string(),
                ],
                "--config",
            ),
            Action::Test => self.with_config(
                vec![
                    self.driver_tool("ctest"),
                    "--test-dir".to_string(),
                    build_dir,
                    "--output-on-failure".to_string(),
                ],
                "-C",
            ),
            Action::Package => self.with_config(
                vec![
                    self.driver_tool("cpack"),
                    "--config".to_string(),
                    lossy(&self.build_dir.join("CPackConfig.cmake")),
                ],
                "-C",
            ),
        };
        Some(argv)
    }

    /// Every command `action` runs, in order. Tests and packages are built
    /// first.
    pub fn commands(&self, action: Action) -> Vec<Vec<String>> {
        let mut plan = vec![self.configure_command()];
        if matches!(action, Action::Test | Action::Package) {
            plan.extend(self.action_command(Action::Build));
        }
        plan.extend(self.action_command(action));
        plan
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::context::tests::selection;
    use crate::context::{BuildContextBuilder, Profile};
    use crate::testutil;
    use crate::toolchain::{CompilerFamily, GeneratorFamily, ToolFamily};

    fn context(profile: Profile) -> BuildContext {
        let platform = testutil::linux_platform();
        let config = Config::default();
        BuildContextBuilder::new(&platform, &config)
            .build("game", profile, selection(CompilerFamily::Gcc, "g++"))
            .unwrap()
    }

    #[test]
    fn configure_command_shape() {
        let argv = context(Profile::Release).configure_command();
        assert_eq!(argv[0], "/usr/bin/cmake");
        assert_eq!(argv[5..7], ["-G", "Ninja"]);
        assert!(argv.contains(&"-DCMAKE_BUILD_TYPE=Release".to_string()));
        assert!(argv.contains(&"-DCMAKE_CXX_COMPILER=/usr/bin/g++".to_string()));
    }

    #[test]
    fn plans_per_action() {
        let ctx = context(Profile::Debug);
        assert_eq!(ctx.commands(Action::Configure).len(), 1);
        assert_eq!(ctx.commands(Action::Build).len(), 2);
        assert_eq!(ctx.commands(Action::Clean)[1].last().unwrap(), "clean");

        let test = ctx.commands(Action::Test);
        assert_eq!(test.len(), 3);
        assert_eq!(test[2][0], "/usr/bin/ctest");

        let package = ctx.commands(Action::Package);
        assert_eq!(package[2][0], "/usr/bin/cpack");
    }

    #[test]
    fn multi_config_generators_pass_config_at_build_time() {
        let mut ctx = context(Profile::RelWithDebInfo);
        ctx.selection.generator.family = ToolFamily::Generator(GeneratorFamily::Xcode);

        let configure = ctx.configure_command();
        assert!(!configure.iter().any(|a| a.starts_with("-DCMAKE_BUILD_TYPE")));

        let build = ctx.action_command(Action::Build).unwrap();
        assert_eq!(build[build.len() - 2..], ["--config", "RelWithDebInfo"]);
    }
}
