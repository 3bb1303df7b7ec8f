//! Running external tools (`tar`, `mysqldump`, `aws`, `scp`) with a deadline.

use std::{process::Stdio, time::Duration};
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("could not start `{program}`: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },
    #[error("`{program}` exited with {}: {stderr}", exit_label(.code))]
    Failed {
        program: String,
        code: Option<i32>,
        stderr: String,
    },
    #[error("`{program}` timed out after {}s", .after.as_secs())]
    TimedOut { program: String, after: Duration },
}

fn exit_label(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("status {code}"),
        None => "a signal".to_string(),
    }
}

impl CommandError {
    /// The tool's stderr when it failed, otherwise the error text.
    pub fn detail(&self) -> String {
        match self {
            CommandError::Failed { stderr, .. } if !stderr.is_empty() => stderr.clone(),
            other => other.to_string(),
        }
    }
}

/// Run a prepared command to completion.
///
/// Stderr is always captured. Stdout is captured only if the caller piped it;
/// callers redirecting stdout/stdin to files configure that beforehand. The
/// child is killed when the deadline passes.
pub async fn run(mut cmd: Command, timeout: Duration) -> Result<Vec<u8>, CommandError> {
    let program = cmd.as_std().get_program().to_string_lossy().into_owned();
    cmd.stderr(Stdio::piped()).kill_on_drop(true);

    debug!("running {:?}", cmd.as_std());
    let child = cmd.spawn().map_err(|source| CommandError::Spawn {
        program: program.clone(),
        source,
    })?;

    let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(Ok(output)) => output,
        Ok(Err(source)) => return Err(CommandError::Spawn { program, source }),
        Err(_) => {
            return Err(CommandError::TimedOut {
                program,
                after: timeout,
            });
        }
    };

    if output.status.success() {
        Ok(output.stdout)
    } else {
        Err(CommandError::Failed {
            program,
            code: output.status.code(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn captures_stdout() {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "printf hello"]).stdout(Stdio::piped());
        let out = run(cmd, Duration::from_secs(5)).await.unwrap();
        assert_eq!(out, b"hello");
    }

    #[tokio::test]
    async fn reports_stderr_on_failure() {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "echo 'disk full' >&2; exit 3"]);
        let err = run(cmd, Duration::from_secs(5)).await.unwrap_err();
        match &err {
            CommandError::Failed { code, stderr, .. } => {
                assert_eq!(*code, Some(3));
                assert_eq!(stderr, "disk full");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(err.detail(), "disk full");
    }

    #[tokio::test]
    async fn enforces_timeout() {
        let mut cmd = Command::new("sleep");
        cmd.arg("5");
        let err = run(cmd, Duration::from_millis(100)).await.unwrap_err();
        assert!(matches!(err, CommandError::TimedOut { .. }));
    }

    #[tokio::test]
    async fn missing_program_is_spawn_error() {
        let cmd = Command::new("backupd-no-such-tool");
        let err = run(cmd, Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, CommandError::Spawn { .. }));
    }
}
