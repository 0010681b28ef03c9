// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! In-container command execution.
//!
//! Commands run through the Docker exec API with stdout and stderr streamed
//! into separate buffers, so partial output survives a timeout.  Timeout
//! enforcement is two-layered: the in-container `timeout --signal=KILL`
//! wrapper terminates the process and produces the documented 124 exit code,
//! and a slightly longer host-side guard covers a hung daemon connection.

use std::time::Duration;

use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::Docker;
use futures::StreamExt;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::error::SandboxError;
use crate::manager::ContainerManager;

/// Exit code reported when a command exceeds its timeout.  Matches the
/// `timeout(1)` convention so callers can also recognise it from raw shell
/// use.
pub const EXEC_TIMEOUT_EXIT_CODE: i64 = 124;

/// Extra host-side grace on top of the in-container timeout, covering the
/// SIGKILL escalation window plus daemon round-trip latency.
const HOST_GUARD_EXTRA: Duration = Duration::from_secs(4);

/// The structured result of one command execution.
#[derive(Debug, Clone)]
pub struct ExecOutcome {
    pub exit_code: i64,
    pub stdout: String,
    pub stderr: String,
    /// True when the command was terminated by the timeout.  The partial
    /// stdout/stderr collected until that point is retained.
    pub timed_out: bool,
}

/// Raw output of a single exec run, used by both the command and file layers.
#[derive(Debug, Default)]
pub(crate) struct RawExecOutput {
    pub exit_code: i64,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub timed_out: bool,
}

/// Runs shell commands inside a user's container.
pub struct Executor {
    manager: std::sync::Arc<ContainerManager>,
}

impl Executor {
    pub fn new(manager: std::sync::Arc<ContainerManager>) -> Self {
        Self { manager }
    }

    /// Execute `command` in the user's container with a non-login shell.
    ///
    /// The command string is passed through verbatim as a single `bash -c`
    /// argument — no escaping is performed here.  On timeout the in-container
    /// process is killed, partial output is returned, and
    /// [`ExecOutcome::exit_code`] is [`EXEC_TIMEOUT_EXIT_CODE`].
    pub async fn execute(
        &self,
        user_id: &str,
        command: &str,
        timeout: Option<Duration>,
    ) -> Result<ExecOutcome, SandboxError> {
        let timeout = timeout.unwrap_or_else(|| self.manager.default_exec_timeout());
        let container_id = self.manager.acquire(user_id).await?;

        debug!(user = %user_id, timeout_secs = timeout.as_secs(), "executing command");

        // `timeout` wraps the shell so expiry terminates the process and
        // surfaces the 124 sentinel; `-k 2` escalates to SIGKILL for
        // processes that ignore SIGTERM.  The command itself stays a single
        // argv element.
        let cmd = vec![
            "timeout".to_string(),
            "-k".to_string(),
            "2".to_string(),
            format!("{}", timeout.as_secs().max(1)),
            "/bin/bash".to_string(),
            "-c".to_string(),
            command.to_string(),
        ];

        let raw = run_exec(
            self.manager.docker(),
            &container_id,
            cmd,
            None,
            timeout + HOST_GUARD_EXTRA,
        )
        .await?;

        let timed_out = raw.timed_out || raw.exit_code == EXEC_TIMEOUT_EXIT_CODE;
        Ok(ExecOutcome {
            exit_code: if timed_out { EXEC_TIMEOUT_EXIT_CODE } else { raw.exit_code },
            stdout: String::from_utf8_lossy(&raw.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&raw.stderr).into_owned(),
            timed_out,
        })
    }
}

/// Run one exec in `container_id`, optionally piping `stdin` into it, and
/// collect stdout/stderr until EOF or `deadline`.
///
/// When the deadline fires the partial buffers collected so far are returned
/// with `timed_out = true`; the exit code is not inspected in that case.
pub(crate) async fn run_exec(
    docker: &Docker,
    container_id: &str,
    cmd: Vec<String>,
    stdin: Option<Vec<u8>>,
    deadline: Duration,
) -> Result<RawExecOutput, SandboxError> {
    let exec = docker
        .create_exec(
            container_id,
            CreateExecOptions {
                cmd: Some(cmd),
                attach_stdout: Some(true),
                attach_stderr: Some(true),
                attach_stdin: Some(stdin.is_some()),
                ..Default::default()
            },
        )
        .await?;

    let mut out = RawExecOutput::default();

    match docker.start_exec(&exec.id, None).await? {
        StartExecResults::Attached { mut output, mut input } => {
            if let Some(bytes) = stdin {
                // Bit-exact write; shutdown closes the stream so the
                // in-container reader sees EOF.
                input
                    .write_all(&bytes)
                    .await
                    .map_err(|e| SandboxError::Internal(format!("exec stdin write: {e}")))?;
                input
                    .shutdown()
                    .await
                    .map_err(|e| SandboxError::Internal(format!("exec stdin close: {e}")))?;
            }

            let expired = {
                let collect = async {
                    while let Some(chunk) = output.next().await {
                        match chunk {
                            Ok(bollard::container::LogOutput::StdOut { message }) => {
                                out.stdout.extend_from_slice(&message);
                            }
                            Ok(bollard::container::LogOutput::StdErr { message }) => {
                                out.stderr.extend_from_slice(&message);
                            }
                            Ok(_) => {}
                            Err(e) => {
                                debug!(error = %e, "exec output stream error");
                                break;
                            }
                        }
                    }
                };
                tokio::time::timeout(deadline, collect).await.is_err()
            };

            if expired {
                out.timed_out = true;
                return Ok(out);
            }
        }
        StartExecResults::Detached => {}
    }

    let inspect = docker.inspect_exec(&exec.id).await?;
    out.exit_code = inspect.exit_code.unwrap_or(-1);
    Ok(out)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
