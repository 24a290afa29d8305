// Installation mechanics
//
// The install script (`flow`) only talks to the `InstallSteps` trait. Everything that
// actually touches the OS lives behind it (`system`), built on the command runner below.
//
// Two kinds of commands go through the runner:
// - probes (`docker info`, `systeminfo`, `wsl --status`) are read-only and may be
//   started again after a transient spawn/IO failure;
// - installers (`dism`, `msiexec`, the Docker installer, `net localgroup /add`) change
//   the machine and are started exactly once.
// A command that hits its timeout is killed and reported, never restarted.

pub mod docker;
pub mod download;
pub mod flow;
pub mod steps;
pub mod supervisor;
pub mod system;

use anyhow::Result;
use log::{debug, error, info, warn};
use std::io;
use std::process::Stdio;
use std::time::Instant;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tokio::time::{timeout, Duration};
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::RetryIf;

#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u128,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Whether a command may be started again after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rerun {
    OnTransientFailure,
    Never,
}

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("Failed to spawn command '{program}' (operation={operation})")]
    Spawn {
        program: String,
        operation: String,
        #[source]
        source: io::Error,
    },
    #[error("Command timed out after {after_ms}ms (operation={operation}, program={program})")]
    TimedOut {
        program: String,
        operation: String,
        after_ms: u128,
    },
    #[error("Command I/O failed (operation={operation}, program={program}): {source}")]
    Io {
        program: String,
        operation: String,
        #[source]
        source: io::Error,
    },
}

impl CommandError {
    /// Spawn/IO hiccups that a second attempt can get past. Timeouts never are.
    pub fn is_transient(&self) -> bool {
        match self {
            CommandError::TimedOut { .. } => false,
            CommandError::Spawn { source, .. } | CommandError::Io { source, .. } => {
                is_transient_io(source)
            }
        }
    }
}

fn is_transient_io(e: &io::Error) -> bool {
    if matches!(
        e.kind(),
        io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock
    ) {
        return true;
    }
    let msg = e.to_string().to_ascii_lowercase();
    ["temporarily", "busy", "in use", "used by another process"]
        .iter()
        .any(|m| msg.contains(m))
}

fn should_rerun(policy: Rerun, e: &CommandError) -> bool {
    policy == Rerun::OnTransientFailure && e.is_transient()
}

async fn read_pipe<R>(pipe: Option<R>) -> io::Result<String>
where
    R: AsyncRead + Unpin,
{
    let mut buf = Vec::new();
    if let Some(mut pipe) = pipe {
        pipe.read_to_end(&mut buf).await?;
    }
    Ok(String::from_utf8_lossy(&buf).to_string())
}

async fn collect(task: JoinHandle<io::Result<String>>) -> io::Result<String> {
    task.await.unwrap_or_else(|e| Err(io::Error::other(e)))
}

/// One attempt: spawn, wait up to `limit`, kill on timeout.
async fn run_attempt(
    program: &str,
    args: &[String],
    limit: Duration,
    operation: &str,
) -> Result<CommandOutput, CommandError> {
    let started = Instant::now();
    let io_error = |source: io::Error| CommandError::Io {
        program: program.to_string(),
        operation: operation.to_string(),
        source,
    };

    debug!(
        "[PHASE: installation] [STEP: cmd] Attempt started (operation={}, program={}, args=[{}], timeout_ms={})",
        operation,
        program,
        args.join(", "),
        limit.as_millis()
    );

    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| CommandError::Spawn {
            program: program.to_string(),
            operation: operation.to_string(),
            source,
        })?;

    let stdout_task = tokio::spawn(read_pipe(child.stdout.take()));
    let stderr_task = tokio::spawn(read_pipe(child.stderr.take()));

    let status = match timeout(limit, child.wait()).await {
        Ok(waited) => waited.map_err(io_error)?,
        Err(_) => {
            warn!(
                "[PHASE: installation] [STEP: cmd] Timeout reached, killing (operation={}, program={}, timeout_ms={})",
                operation,
                program,
                limit.as_millis()
            );
            if let Err(e) = child.kill().await {
                warn!(
                    "[PHASE: installation] [STEP: cmd] Failed to kill timed-out process (operation={}, program={}): {}",
                    operation, program, e
                );
            }
            return Err(CommandError::TimedOut {
                program: program.to_string(),
                operation: operation.to_string(),
                after_ms: limit.as_millis(),
            });
        }
    };

    let out = CommandOutput {
        exit_code: status.code(),
        stdout: collect(stdout_task).await.map_err(io_error)?,
        stderr: collect(stderr_task).await.map_err(io_error)?,
        duration_ms: started.elapsed().as_millis(),
    };

    debug!(
        "[PHASE: installation] [STEP: cmd] Attempt finished (operation={}, program={}, exit_code={:?}, duration_ms={}, stdout_len={}, stderr_len={})",
        operation,
        program,
        out.exit_code,
        out.duration_ms,
        out.stdout.len(),
        out.stderr.len()
    );

    Ok(out)
}

async fn run_with_policy(
    program: &str,
    args: &[&str],
    limit: Duration,
    operation: &str,
    policy: Rerun,
) -> Result<CommandOutput> {
    let started = Instant::now();
    let args: Vec<String> = args.iter().map(|a| a.to_string()).collect();
    info!(
        "[PHASE: installation] [STEP: cmd] Running {} (operation={}, args_count={}, timeout_ms={}, rerun={:?})",
        program,
        operation,
        args.len(),
        limit.as_millis(),
        policy
    );

    let result = match policy {
        Rerun::Never => run_attempt(program, &args, limit, operation).await,
        Rerun::OnTransientFailure => {
            let strategy = ExponentialBackoff::from_millis(200)
                .factor(2)
                .max_delay(Duration::from_secs(2))
                .take(3)
                .map(jitter);
            RetryIf::spawn(
                strategy,
                || run_attempt(program, &args, limit, operation),
                |e: &CommandError| {
                    let again = should_rerun(policy, e);
                    if again {
                        warn!(
                            "[PHASE: installation] [STEP: cmd] Transient failure, starting again (operation={}, err={})",
                            operation, e
                        );
                    }
                    again
                },
            )
            .await
        }
    };

    match &result {
        Ok(out) => info!(
            "[PHASE: installation] [STEP: cmd] {} exited (operation={}, exit_code={:?}, duration_ms={})",
            program,
            operation,
            out.exit_code,
            started.elapsed().as_millis()
        ),
        Err(e) => error!(
            "[PHASE: installation] [STEP: cmd] {} failed (operation={}, duration_ms={}): {}",
            program,
            operation,
            started.elapsed().as_millis(),
            e
        ),
    }

    result.map_err(anyhow::Error::from)
}

/// Run a read-only command. Transient spawn/IO failures are retried up to 3 times.
///
/// Captured stdout/stderr are returned even when the exit code is non-zero (caller
/// decides success).
pub async fn run_cmd(
    program: &str,
    args: &[&str],
    limit: Duration,
    operation: &str,
) -> Result<CommandOutput> {
    run_with_policy(program, args, limit, operation, Rerun::OnTransientFailure).await
}

/// Run a command that changes the system. It is started exactly once.
pub async fn run_installer(
    program: &str,
    args: &[&str],
    limit: Duration,
    operation: &str,
) -> Result<CommandOutput> {
    run_with_policy(program, args, limit, operation, Rerun::Never).await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn io_failure(kind: io::ErrorKind, msg: &str) -> CommandError {
        CommandError::Io {
            program: "p".to_string(),
            operation: "op".to_string(),
            source: io::Error::new(kind, msg.to_string()),
        }
    }

    // ------------------------------------------------------------------------
    // Retry policy
    // ------------------------------------------------------------------------

    #[test]
    fn timeouts_are_never_transient() {
        let e = CommandError::TimedOut {
            program: "dism.exe".to_string(),
            operation: "dism_enable_feature".to_string(),
            after_ms: 10,
        };
        assert!(!e.is_transient());
        assert!(!should_rerun(Rerun::OnTransientFailure, &e));
    }

    #[test]
    fn sharing_violations_are_transient() {
        let e = io_failure(
            io::ErrorKind::Other,
            "The process cannot access the file because it is being used by another process",
        );
        assert!(e.is_transient());
        assert!(io_failure(io::ErrorKind::Interrupted, "signal").is_transient());
        assert!(!io_failure(io::ErrorKind::NotFound, "no such file").is_transient());
    }

    #[test]
    fn installers_are_never_started_again() {
        let e = io_failure(io::ErrorKind::Other, "resource busy");
        assert!(should_rerun(Rerun::OnTransientFailure, &e));
        assert!(!should_rerun(Rerun::Never, &e));
    }

    // ------------------------------------------------------------------------
    // Process execution
    // ------------------------------------------------------------------------

    #[tokio::test]
    async fn run_cmd_basic_smoke() {
        #[cfg(windows)]
        let (program, args) = ("cmd", vec!["/C", "echo", "hello"]);

        #[cfg(not(windows))]
        let (program, args) = ("sh", vec!["-c", "echo hello"]);

        let out = run_cmd(program, &args, Duration::from_secs(5), "test_echo")
            .await
            .expect("command should run");
        assert!(out.success());
        assert!(out.stdout.to_ascii_lowercase().contains("hello"));
    }

    #[tokio::test]
    async fn missing_program_is_an_error() {
        let res = run_cmd(
            "definitely-not-a-real-program-4449",
            &[],
            Duration::from_secs(5),
            "test_missing",
        )
        .await;
        assert!(res.is_err());
    }

    #[cfg(not(windows))]
    #[tokio::test]
    async fn non_zero_exit_is_returned_not_raised() {
        let out = run_installer("sh", &["-c", "exit 3"], Duration::from_secs(5), "test_exit")
            .await
            .unwrap();
        assert_eq!(out.exit_code, Some(3));
        assert!(!out.success());
    }

    #[cfg(not(windows))]
    #[tokio::test]
    async fn timed_out_command_is_started_only_once() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("runs");
        let script = format!("echo run >> '{}'; sleep 5", marker.display());

        let started = Instant::now();
        let err = run_cmd("sh", &["-c", &script], Duration::from_millis(300), "test_timeout")
            .await
            .unwrap_err();

        assert!(err.to_string().contains("timed out"));
        assert!(started.elapsed() < Duration::from_secs(2));
        let runs = std::fs::read_to_string(&marker).unwrap();
        assert_eq!(runs.lines().count(), 1);
    }
}
