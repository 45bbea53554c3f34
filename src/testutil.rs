//! Test doubles shared by unit tests

use crate::error::{BuildError, BuildResult};
use crate::invoke::{Invocation, InvocationResult, Invoker, TIMEOUT_EXIT_CODE};
use crate::platform::{Arch, OsFamily, Platform};
use async_trait::async_trait;
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

type Handler = Box<dyn Fn(&Invocation) -> BuildResult<InvocationResult> + Send + Sync>;

/// Invoker answering from a list of `(needle, handler)` rules.
///
/// The first rule whose needle occurs in the command line wins. Commands
/// without a rule behave like a missing executable.
pub struct ScriptedInvoker {
    rules: Vec<(String, Handler)>,
    calls: Mutex<Vec<Vec<String>>>,
}

impl ScriptedInvoker {
    pub fn new() -> Self {
        Self {
            rules: Vec::new(),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn on<F>(mut self, needle: &str, handler: F) -> Self
    where
        F: Fn(&Invocation) -> BuildResult<InvocationResult> + Send + Sync + 'static,
    {
        self.rules.push((needle.to_string(), Box::new(handler)));
        self
    }

    /// Every command seen so far
    pub fn calls(&self) -> Vec<Vec<String>> {
        self.calls.lock().unwrap().clone()
    }

    /// Number of calls whose command line contains `needle`
    pub fn count(&self, needle: &str) -> usize {
        self.calls()
            .iter()
            .filter(|argv| argv.join(" ").contains(needle))
            .count()
    }
}

#[async_trait]
impl Invoker for ScriptedInvoker {
    async fn invoke(&self, invocation: &Invocation) -> BuildResult<InvocationResult> {
        invocation.validate()?;
        self.calls.lock().unwrap().push(invocation.argv.clone());

        let line = invocation.command_line();
        match self.rules.iter().find(|(needle, _)| line.contains(needle.as_str())) {
            Some((_, handler)) => handler(invocation),
            None => Err(BuildError::command_failed(
                line,
                std::io::Error::from(std::io::ErrorKind::NotFound),
            )),
        }
    }
}

/// Successful result with `stdout`
pub fn ok(stdout: &str) -> BuildResult<InvocationResult> {
    exit(0, stdout, "")
}

/// Result with the given exit code and output
pub fn exit(code: i32, stdout: &str, stderr: &str) -> BuildResult<InvocationResult> {
    Ok(InvocationResult {
        exit_code: code,
        stdout: stdout.as_bytes().to_vec(),
        stderr: stderr.as_bytes().to_vec(),
        duration: Duration::from_millis(1),
        timed_out: false,
    })
}

/// Result of an invocation killed by its timeout
pub fn timed_out() -> BuildResult<InvocationResult> {
    Ok(InvocationResult {
        exit_code: TIMEOUT_EXIT_CODE,
        stdout: vec![],
        stderr: vec![],
        duration: Duration::from_millis(1),
        timed_out: true,
    })
}

/// Value following `flag` in argv, either as `flag=value` or `flag value`
pub fn arg_value(invocation: &Invocation, flag: &str) -> Option<String> {
    let argv = &invocation.argv;
    argv.iter().enumerate().find_map(|(i, arg)| {
        if let Some(rest) = arg.strip_prefix(&format!("{}=", flag)) {
            Some(rest.to_string())
        } else if arg == flag {
            argv.get(i + 1).cloned()
        } else {
            None
        }
    })
}

pub fn linux_platform() -> Platform {
    Platform {
        os_family: OsFamily::Linux,
        arch: Arch::X86_64,
        distro: Some("cachyos".to_string()),
        distro_family: Some(crate::platform::DistroFamily::Arch),
        in_reproducible_shell: false,
    }
}

/// Create an executable stub in `dir`
#[cfg(unix)]
pub fn fake_tool(dir: &Path, name: &str) -> std::path::PathBuf {
    use std::os::unix::fs::PermissionsExt;
    let path = dir.join(name);
    std::fs::write(&path, "#!/bin/sh\nexit 0\n").unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}
