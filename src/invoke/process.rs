//! Process-backed invoker with timeout and process-group termination

use crate::error::{BuildError, BuildResult};
use crate::invoke::{CancelToken, Invocation, InvocationResult, Invoker};
use async_trait::async_trait;
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Exit code reported for invocations that hit their timeout
pub const TIMEOUT_EXIT_CODE: i32 = 124;

/// Runs commands as child processes in their own process group
#[derive(Debug, Clone)]
pub struct SecureInvoker {
    kill_grace: Duration,
}

impl SecureInvoker {
    /// `kill_grace` is the wait between SIGTERM and SIGKILL
    pub fn new(kill_grace: Duration) -> Self {
        Self { kill_grace }
    }
}

impl Default for SecureInvoker {
    fn default() -> Self {
        Self::new(Duration::from_secs(2))
    }
}

enum Outcome {
    Exited(std::io::Result<ExitStatus>),
    TimedOut,
    Cancelled,
}

#[async_trait]
impl Invoker for SecureInvoker {
    async fn invoke(&self, invocation: &Invocation) -> BuildResult<InvocationResult> {
        invocation.validate()?;

        let mut cmd = Command::new(&invocation.argv[0]);
        cmd.args(&invocation.argv[1..])
            .envs(&invocation.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(ref cwd) = invocation.cwd {
            cmd.current_dir(cwd);
        }
        #[cfg(unix)]
        cmd.process_group(0);

        debug!("Executing: {:?}", invocation.argv);
        let started = Instant::now();
        let mut child = cmd
            .spawn()
            .map_err(|e| BuildError::command_failed(invocation.command_line(), e))?;

        let pid = child.id();
        let stdout = spawn_reader(child.stdout.take());
        let stderr = spawn_reader(child.stderr.take());

        let outcome = tokio::select! {
            status = child.wait() => Outcome::Exited(status),
            _ = tokio::time::sleep(invocation.timeout) => Outcome::TimedOut,
            _ = wait_cancelled(invocation.cancel.as_ref()) => Outcome::Cancelled,
        };

        let (exit_code, timed_out) = match outcome {
            Outcome::Exited(status) => {
                let status = status
                    .map_err(|e| BuildError::command_failed(invocation.command_line(), e))?;
                (exit_code(status), false)
            }
            Outcome::TimedOut => {
                warn!(
                    "Timed out after {}ms, terminating: {}",
                    invocation.timeout.as_millis(),
                    invocation.command_line()
                );
                self.terminate(&mut child).await;
                (TIMEOUT_EXIT_CODE, true)
            }
            Outcome::Cancelled => {
                debug!("Cancelled, terminating: {}", invocation.command_line());
                self.terminate(&mut child).await;
                stdout.abort();
                stderr.abort();
                return Err(BuildError::Cancelled);
            }
        };

        let (stdout, stderr) = self.collect_output(pid, stdout, stderr).await;
        let duration = started.elapsed();

        debug!(
            exit_code,
            timed_out,
            duration_ms = duration.as_millis() as u64,
            "Finished: {}",
            invocation.program()
        );

        Ok(InvocationResult {
            exit_code,
            stdout,
            stderr,
            duration,
            timed_out,
        })
    }
}

impl SecureInvoker {
    /// SIGTERM the whole group, wait out the grace period, then SIGKILL.
    /// Always reaps the direct child.
    async fn terminate(&self, child: &mut Child) {
        #[cfg(unix)]
        if let Some(pid) = child.id() {
            signal_group(pid, libc::SIGTERM);
            if tokio::time::timeout(self.kill_grace, child.wait()).await.is_ok() {
                // Leader is gone; make sure nothing else in its group survives
                signal_group(pid, libc::SIGKILL);
                return;
            }
            signal_group(pid, libc::SIGKILL);
        }

        if let Err(e) = child.kill().await {
            warn!("Failed to kill child process: {}", e);
        }
    }

    /// Join the output readers. If descendants still hold the pipes open
    /// after the leader exited, the group is killed so the readers finish.
    async fn collect_output(
        &self,
        pid: Option<u32>,
        stdout: JoinHandle<Vec<u8>>,
        stderr: JoinHandle<Vec<u8>>,
    ) -> (Vec<u8>, Vec<u8>) {
        let readers = async { (stdout.await.unwrap_or_default(), stderr.await.unwrap_or_default()) };
        tokio::pin!(readers);

        match tokio::time::timeout(self.kill_grace, &mut readers).await {
            Ok(output) => output,
            Err(_) => {
                warn!("Output pipes still open after exit, killing leftover processes");
                #[cfg(unix)]
                if let Some(pid) = pid {
                    signal_group(pid, libc::SIGKILL);
                }
                #[cfg(not(unix))]
                let _ = pid;
                tokio::time::timeout(self.kill_grace, readers)
                    .await
                    .unwrap_or_default()
            }
        }
    }
}

fn spawn_reader<R>(reader: Option<R>) -> JoinHandle<Vec<u8>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = Vec::new();
        if let Some(mut reader) = reader {
            if let Err(e) = reader.read_to_end(&mut buf).await {
                debug!("Reading child output failed: {}", e);
            }
        }
        buf
    })
}

async fn wait_cancelled(token: Option<&CancelToken>) {
    match token {
        Some(token) => token.cancelled().await,
        None => std::future::pending().await,
    }
}

fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    -1
}

#[cfg(unix)]
fn signal_group(pid: u32, signal: libc::c_int) {
    // SAFETY: killpg has no memory-safety preconditions; the child was spawned
    // with process_group(0), so its pid is also its process group id.
    let rc = unsafe { libc::killpg(pid as libc::pid_t, signal) };
    if rc != 0 {
        let err = std::io::Error::last_os_error();
        if err.raw_os_error() != Some(libc::ESRCH) {
            debug!("killpg({}, {}) failed: {}", pid, signal, err);
        }
    }
}
