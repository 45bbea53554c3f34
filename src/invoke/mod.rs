//! External tool invocation
//!
//! Every compiler, generator and package-manager call goes through an
//! [`Invoker`]. Commands are argument vectors handed straight to the OS; no
//! shell ever parses them.

mod process;

pub use process::{SecureInvoker, TIMEOUT_EXIT_CODE};
/// Run-level cancellation shared by a run and its invocations
pub use tokio_util::sync::CancellationToken as CancelToken;

use crate::error::{BuildError, BuildResult};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::{Duration, Instant};

/// Max number of output lines kept when reporting a failed invocation.
pub const STDERR_TAIL_LINES: usize = 50;

/// Characters rejected in environment values. Execution never goes through
/// a shell, but values can end up echoed into generated scripts.
const ENV_DENY_LIST: &[char] = &['`', '$', ';', '|', '&', '<', '>', '\n', '\r', '\0'];

/// A single external command
#[derive(Debug, Clone)]
pub struct Invocation {
    /// Executable followed by its arguments
    pub argv: Vec<String>,
    /// Working directory (inherits ours when `None`)
    pub cwd: Option<PathBuf>,
    /// Variables added on top of the inherited environment
    pub env: BTreeMap<String, String>,
    /// Hard limit after which the process group is terminated
    pub timeout: Duration,
    /// Run-level cancellation
    pub cancel: Option<CancelToken>,
}

impl Invocation {
    pub fn new<I, S>(argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            argv: argv.into_iter().map(Into::into).collect(),
            cwd: None,
            env: BTreeMap::new(),
            timeout: Duration::from_secs(60),
            cancel: None,
        }
    }

    pub fn cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn envs(mut self, env: &BTreeMap<String, String>) -> Self {
        self.env
            .extend(env.iter().map(|(k, v)| (k.clone(), v.clone())));
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Executable name
    pub fn program(&self) -> &str {
        self.argv.first().map(String::as_str).unwrap_or("")
    }

    /// Space-joined rendering for logs and error messages only
    pub fn command_line(&self) -> String {
        self.argv.join(" ")
    }

    /// Check argv and env before anything is spawned
    pub fn validate(&self) -> BuildResult<()> {
        validate_argv(&self.argv)?;
        validate_env(&self.env)
    }
}

/// Result of one finished (or terminated) invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvocationResult {
    pub exit_code: i32,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub duration: Duration,
    pub timed_out: bool,
}

impl InvocationResult {
    pub fn success(&self) -> bool {
        self.exit_code == 0 && !self.timed_out
    }

    pub fn stdout_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    pub fn stderr_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }

    /// Last [`STDERR_TAIL_LINES`] lines of stderr, falling back to stdout
    /// when stderr is empty (some tools report errors on stdout)
    pub fn stderr_tail(&self) -> String {
        let source = if self.stderr.iter().all(u8::is_ascii_whitespace) {
            self.stdout_lossy()
        } else {
            self.stderr_lossy()
        };
        tail_lines(&source, STDERR_TAIL_LINES)
    }
}

/// Keep the last `n` lines of `text`
pub fn tail_lines(text: &str, n: usize) -> String {
    let lines: Vec<&str> = text.lines().collect();
    let start = lines.len().saturating_sub(n);
    lines[start..].join("\n")
}

/// Optional wall-clock limit shared by every invocation of a run
#[derive(Debug, Clone, Copy, Default)]
pub struct Deadline {
    at: Option<(Instant, Duration)>,
}

impl Deadline {
    pub fn none() -> Self {
        Self::default()
    }

    /// Deadline `limit` from now, or none
    pub fn after(limit: Option<Duration>) -> Self {
        Self {
            at: limit.map(|limit| (Instant::now() + limit, limit)),
        }
    }

    /// Cap `timeout` by the time left; fails once the deadline has passed
    pub fn clamp(&self, timeout: Duration) -> BuildResult<Duration> {
        match self.at {
            None => Ok(timeout),
            Some((at, limit)) => {
                let left = at.saturating_duration_since(Instant::now());
                if left.is_zero() {
                    return Err(BuildError::RunDeadlineExceeded { limit });
                }
                Ok(timeout.min(left))
            }
        }
    }

    /// Error out once the deadline has passed
    pub fn check(&self) -> BuildResult<()> {
        self.clamp(Duration::MAX).map(|_| ())
    }
}

/// Executes external commands
#[async_trait]
pub trait Invoker: Send + Sync {
    /// Run the command to completion, timeout or cancellation.
    ///
    /// A timeout is not an error: the result comes back with `timed_out` set.
    /// Cancellation terminates the process group and returns `Cancelled`.
    async fn invoke(&self, invocation: &Invocation) -> BuildResult<InvocationResult>;
}

/// Reject empty commands and NUL bytes
pub fn validate_argv(argv: &[String]) -> BuildResult<()> {
    let Some(program) = argv.first() else {
        return Err(BuildError::invalid_invocation("empty command"));
    };
    if program.trim().is_empty() {
        return Err(BuildError::invalid_invocation("empty executable path"));
    }
    if let Some(pos) = argv.iter().position(|arg| arg.contains('\0')) {
        return Err(BuildError::invalid_invocation(format!(
            "argument {} contains a NUL byte",
            pos
        )));
    }
    Ok(())
}

/// Reject malformed variable names and values containing shell metacharacters
pub fn validate_env(env: &BTreeMap<String, String>) -> BuildResult<()> {
    for (key, value) in env {
        if key.is_empty() || key.contains('=') || key.contains('\0') || key.contains(char::is_whitespace) {
            return Err(BuildError::invalid_invocation(format!(
                "invalid environment variable name '{}'",
                key.escape_debug()
            )));
        }
        if let Some(bad) = value.chars().find(|c| ENV_DENY_LIST.contains(c)) {
            return Err(BuildError::invalid_invocation(format!(
                "environment variable {} contains forbidden character '{}'",
                key,
                bad.escape_debug()
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn empty_command_rejected() {
        let err = Invocation::new(Vec::<String>::new()).validate().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInvocation);

        let err = Invocation::new(["", "--version"]).validate().unwrap_err();
        assert!(err.to_string().contains("empty executable"));
    }

    #[test]
    fn nul_byte_rejected() {
        let err = Invocation::new(["cmake", "-DX=a\0b"]).validate().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInvocation);
    }

    #[test]
    fn shell_metacharacters_in_arguments_are_fine() {
        // argv never reaches a shell, so these are plain bytes
        let inv = Invocation::new(["echo", "$(rm -rf /); `id` | cat"]);
        assert!(inv.validate().is_ok());
    }

    #[test]
    fn env_deny_list() {
        let inv = Invocation::new(["cmake"]).env("CXXFLAGS", "-O2 -g -I/opt/include");
        assert!(inv.validate().is_ok());

        for bad in ["$(id)", "a;b", "x|y", "a\nb", "`id`", "a&b", "a>b"] {
            let inv = Invocation::new(["cmake"]).env("CXXFLAGS", bad);
            assert!(inv.validate().is_err(), "{:?} should be rejected", bad);
        }

        let inv = Invocation::new(["cmake"]).env("BAD=KEY", "1");
        assert!(inv.validate().is_err());
    }

    #[test]
    fn stderr_tail_keeps_last_lines() {
        let stderr: String = (0..80).map(|i| format!("line {}\n", i)).collect();
        let result = InvocationResult {
            exit_code: 1,
            stdout: vec![],
            stderr: stderr.into_bytes(),
            duration: Duration::ZERO,
            timed_out: false,
        };
        let tail = result.stderr_tail();
        assert_eq!(tail.lines().count(), STDERR_TAIL_LINES);
        assert!(tail.starts_with("line 30"));
        assert!(tail.ends_with("line 79"));
    }

    #[test]
    fn deadline_clamps_timeouts() {
        assert_eq!(
            Deadline::none().clamp(Duration::from_secs(5)).unwrap(),
            Duration::from_secs(5)
        );

        let deadline = Deadline::after(Some(Duration::from_secs(1)));
        assert!(deadline.clamp(Duration::from_secs(60)).unwrap() <= Duration::from_secs(1));

        let expired = Deadline::after(Some(Duration::ZERO));
        let err = expired.check().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvocationTimeout);
        assert!(!err.is_retryable());
    }

    #[test]
    fn stderr_tail_falls_back_to_stdout() {
        let result = InvocationResult {
            exit_code: 2,
            stdout: b"ninja: error: loading 'build.ninja'\n".to_vec(),
            stderr: b"\n".to_vec(),
            duration: Duration::ZERO,
            timed_out: false,
        };
        assert!(result.stderr_tail().contains("build.ninja"));
        assert!(!result.success());
    }
}
