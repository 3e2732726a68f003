use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::process::Command;
use tracing::instrument;

/// Captured result of a finished process.
#[derive(Debug)]
pub struct Finished {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
}

fn program_name(cmd: &Command) -> String {
    cmd.as_std().get_program().to_string_lossy().into_owned()
}

/// Run a command to completion within `timeout`, regardless of exit status.
///
/// The child is killed if the budget runs out (the future owning it is
/// dropped and the command is configured with `kill_on_drop`). Stdin is
/// closed; stdout and stderr are captured and decoded lossily.
#[instrument(skip_all, fields(program = %program_name(&cmd), timeout = ?timeout))]
pub async fn output(mut cmd: Command, timeout: Duration) -> Result<Finished> {
    let program = program_name(&cmd);
    cmd.stdin(Stdio::null()).stdout(Stdio::piped()).stderr(Stdio::piped()).kill_on_drop(true);
    let child = cmd.spawn().or_raise(|| ErrorKind::Spawn(program.clone()))?;
    let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(result) => result.or_raise(|| ErrorKind::Io(program.clone()))?,
        Err(_elapsed) => {
            tracing::warn!(program = %program, "Process exceeded its time budget; killed");
            exn::bail!(ErrorKind::Timeout { program, timeout });
        },
    };
    Ok(Finished {
        status: output.status,
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}

/// Run a command within `timeout` and require a successful exit status.
///
/// A non-zero exit is reported as [`ErrorKind::Failed`] carrying the tool's
/// stderr verbatim (or stdout, if stderr was empty).
pub async fn run(cmd: Command, timeout: Duration) -> Result<Finished> {
    let program = program_name(&cmd);
    let finished = output(cmd, timeout).await?;
    if !finished.status.success() {
        let diagnostic = match finished.stderr.trim() {
            "" => finished.stdout.trim().to_string(),
            stderr => stderr.to_string(),
        };
        tracing::debug!(program = %program, status = %finished.status, "Process reported failure");
        exn::bail!(ErrorKind::Failed {
            program,
            status: finished.status.to_string(),
            stderr: diagnostic,
        });
    }
    Ok(finished)
}
