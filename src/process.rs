//! Supervised execution of external tools.
//!
//! Each call owns exactly one child and its two pipes. Both pipes are drained
//! on dedicated reader threads while the calling thread polls for exit, so a
//! chatty tool can never stall on a full buffer. A run ends in one of: normal
//! exit (zero or not), timeout, cancellation, or a spawn/supervision error.

use crate::config::Config;
use std::ffi::OsString;
use std::io::Read;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, warn};

/// Shared flag a caller flips to stop every in-flight run that observes it.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone)]
pub struct ToolCommand {
    pub program: String,
    pub args: Vec<OsString>,
    pub env: Vec<(String, String)>,
    pub current_dir: Option<PathBuf>,
}

impl ToolCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
            current_dir: None,
        }
    }

    /// Runs `line` through `sh -c`.
    pub fn shell(line: &str) -> Self {
        Self::new("sh").arg("-c").arg(line)
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }

    fn to_command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        for (k, v) in &self.env {
            cmd.env(k, v);
        }
        if let Some(dir) = &self.current_dir {
            cmd.current_dir(dir);
        }
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }
        cmd
    }
}

/// Captured result of a run that reached a natural exit.
#[derive(Debug, Clone)]
pub struct ToolInvocation {
    pub success: bool,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub elapsed: Duration,
}

impl ToolInvocation {
    /// Turns a non-zero exit into [`ProcessError::NonZeroExit`].
    pub fn check(self, program: &str) -> Result<Self, ProcessError> {
        if self.success {
            return Ok(self);
        }
        Err(ProcessError::NonZeroExit {
            program: program.to_string(),
            code: self.exit_code,
            stderr: tail(&self.stderr, 2000),
        })
    }
}

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} timed out after {timeout:?}")]
    TimedOut {
        program: String,
        pid: u32,
        timeout: Duration,
        stderr: String,
    },

    #[error("{program} was cancelled")]
    Cancelled { program: String, pid: u32 },

    #[error("{program} exited with code {code:?}: {stderr}")]
    NonZeroExit {
        program: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("supervising {program}: {source}")]
    Supervise {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone)]
pub struct ProcessRunner {
    poll_interval: Duration,
    drain_grace: Duration,
}

impl Default for ProcessRunner {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(100),
            drain_grace: Duration::from_millis(500),
        }
    }
}

impl ProcessRunner {
    pub fn new(poll_interval: Duration, drain_grace: Duration) -> Self {
        Self {
            poll_interval: poll_interval.max(Duration::from_millis(1)),
            drain_grace,
        }
    }

    pub fn from_config(cfg: &Config) -> Self {
        Self::new(
            Duration::from_millis(cfg.runner.poll_interval_ms),
            Duration::from_millis(cfg.runner.drain_grace_ms),
        )
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    pub fn run(
        &self,
        cmd: &ToolCommand,
        timeout: Duration,
    ) -> Result<ToolInvocation, ProcessError> {
        self.run_cancellable(cmd, timeout, &CancelToken::new())
    }

    pub fn run_cancellable(
        &self,
        cmd: &ToolCommand,
        timeout: Duration,
        cancel: &CancelToken,
    ) -> Result<ToolInvocation, ProcessError> {
        debug!(program = %cmd.program, args = ?cmd.args, ?timeout, "spawning tool");
        let program = cmd.program.clone();

        if cancel.is_cancelled() {
            return Err(ProcessError::Cancelled { program, pid: 0 });
        }

        let started = Instant::now();
        let mut child = cmd
            .to_command()
            .spawn()
            .map_err(|source| ProcessError::Spawn {
                program: program.clone(),
                source,
            })?;
        let pid = child.id();

        let stdout_rx = spawn_reader(child.stdout.take());
        let stderr_rx = spawn_reader(child.stderr.take());

        let deadline = started + timeout;
        loop {
            match child.try_wait() {
                Ok(Some(status)) => {
                    let stdout = self.collect(&stdout_rx, &program, "stdout");
                    let stderr = self.collect(&stderr_rx, &program, "stderr");
                    let elapsed = started.elapsed();
                    debug!(program = %program, code = ?status.code(), ?elapsed, "tool exited");
                    return Ok(ToolInvocation {
                        success: status.success(),
                        exit_code: status.code(),
                        stdout,
                        stderr,
                        elapsed,
                    });
                }
                Ok(None) => {}
                Err(source) => {
                    terminate(&mut child);
                    return Err(ProcessError::Supervise { program, source });
                }
            }

            if cancel.is_cancelled() {
                warn!(program = %program, pid, "cancelling tool");
                terminate(&mut child);
                self.collect(&stdout_rx, &program, "stdout");
                self.collect(&stderr_rx, &program, "stderr");
                return Err(ProcessError::Cancelled { program, pid });
            }

            let now = Instant::now();
            if now >= deadline {
                warn!(program = %program, pid, ?timeout, "tool timed out");
                terminate(&mut child);
                self.collect(&stdout_rx, &program, "stdout");
                let stderr = self.collect(&stderr_rx, &program, "stderr");
                return Err(ProcessError::TimedOut {
                    program,
                    pid,
                    timeout,
                    stderr: tail(&stderr, 2000),
                });
            }

            std::thread::sleep(self.poll_interval.min(deadline - now));
        }
    }

    // A descendant that inherited the pipe can keep it open after the child is
    // reaped; keep what arrived and stop waiting once the grace period ends.
    fn collect(&self, rx: &Receiver<Vec<u8>>, program: &str, stream: &str) -> String {
        let deadline = Instant::now() + self.drain_grace;
        let mut buf = Vec::new();
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match rx.recv_timeout(remaining) {
                Ok(chunk) => buf.extend_from_slice(&chunk),
                Err(RecvTimeoutError::Disconnected) => break,
                Err(RecvTimeoutError::Timeout) => {
                    warn!(program, stream, "output not drained within grace period");
                    break;
                }
            }
        }
        String::from_utf8_lossy(&buf).into_owned()
    }
}

/// Forwards pipe output in chunks as it is read; the channel closes at EOF.
fn spawn_reader<R: Read + Send + 'static>(pipe: Option<R>) -> Receiver<Vec<u8>> {
    let (tx, rx) = mpsc::channel();
    std::thread::spawn(move || {
        let Some(mut pipe) = pipe else {
            return;
        };
        let mut chunk = [0u8; 8192];
        loop {
            match pipe.read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => {
                    if tx.send(chunk[..n].to_vec()).is_err() {
                        break;
                    }
                }
                Err(err) if err.kind() == std::io::ErrorKind::Interrupted => {}
                Err(err) => {
                    debug!("pipe read ended early: {err}");
                    break;
                }
            }
        }
    });
    rx
}

fn terminate(child: &mut Child) {
    // The child leads its own process group; take down helpers it forked too.
    #[cfg(unix)]
    {
        let group = format!("-{}", child.id());
        let _ = Command::new("kill")
            .args(["-KILL", "--", group.as_str()])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();
    }
    let _ = child.kill();
    if let Err(err) = child.wait() {
        warn!("reaping killed child {}: {err}", child.id());
    }
}

pub(crate) fn tail(s: &str, max_chars: usize) -> String {
    let count = s.chars().count();
    if count <= max_chars {
        return s.trim().to_string();
    }
    s.chars().skip(count - max_chars).collect::<String>().trim().to_string()
}
