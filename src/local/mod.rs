use std::collections::BTreeMap;
use std::process::Stdio;

use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::debug;

use crate::ctx::Ctx;

#[derive(Debug, Error)]
pub enum LocalError {
    #[error("failed to start local command: {command}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("local command exited with status {status}: {command}")]
    NonZeroExit { command: String, status: i32 },
}

/// Runs a shell command in the local process, with a caller-supplied environment
/// overlay and streamed debug output. Cancelling `ctx` kills the child.
pub struct LocalExecutor;

impl LocalExecutor {
    pub fn new() -> Self {
        Self
    }

    pub async fn run(
        &self,
        ctx: &Ctx,
        cmd: &str,
        env: &BTreeMap<String, String>,
    ) -> Result<(), LocalError> {
        let mut command = Command::new("sh");
        command.arg("-c").arg(cmd);
        command.envs(env);
        command.stdout(Stdio::piped());
        command.stderr(Stdio::piped());

        let mut child = command.spawn().map_err(|e| LocalError::Spawn {
            command: cmd.to_string(),
            source: e,
        })?;

        let stdout = child.stdout.take().expect("stdout was piped");
        let stderr = child.stderr.take().expect("stderr was piped");

        let stdout_task = tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!("{}", line);
            }
        });
        let stderr_task = tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!("{}", line);
            }
        });

        let status = tokio::select! {
            status = child.wait() => status.map_err(|e| LocalError::Spawn { command: cmd.to_string(), source: e })?,
            _ = ctx.cancelled() => {
                let _ = child.kill().await;
                let _ = child.wait().await;
                let _ = stdout_task.await;
                let _ = stderr_task.await;
                return Ok(());
            }
        };

        let _ = stdout_task.await;
        let _ = stderr_task.await;

        if status.success() {
            Ok(())
        } else {
            Err(LocalError::NonZeroExit {
                command: cmd.to_string(),
                status: status.code().unwrap_or(-1),
            })
        }
    }
}

impl Default for LocalExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn runs_a_command_and_succeeds() {
        let exec = LocalExecutor::new();
        let ctx = Ctx::background();
        exec.run(&ctx, "true", &BTreeMap::new()).await.unwrap();
    }

    #[tokio::test]
    async fn non_zero_exit_is_an_error() {
        let exec = LocalExecutor::new();
        let ctx = Ctx::background();
        let err = exec.run(&ctx, "exit 3", &BTreeMap::new()).await.unwrap_err();
        assert!(matches!(err, LocalError::NonZeroExit { status: 3, .. }));
    }

    #[tokio::test]
    async fn env_overlay_is_visible_to_the_command() {
        let exec = LocalExecutor::new();
        let ctx = Ctx::background();
        let mut env = BTreeMap::new();
        env.insert("SHIPCRATE_TEST_VAR".to_string(), "hello".to_string());
        exec.run(&ctx, "[ \"$SHIPCRATE_TEST_VAR\" = hello ]", &env)
            .await
            .unwrap();
    }
}
