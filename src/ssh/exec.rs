use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use openssh::Stdio;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, warn};

use crate::ctx::Ctx;
use crate::stream::StreamSplitter;

use super::{Executor, Fd, RemoteError, RemoteExecutor};

type LineSink = Box<dyn FnMut(&str) + Send>;

/// Per-call options for [`RemoteExecutor::run`], built with chained setters rather
/// than a function per option.
#[derive(Default)]
pub struct RunOptions {
    on_stdout: Option<LineSink>,
    on_stderr: Option<LineSink>,
    stdin: Option<Vec<u8>>,
    capture_stdout: Option<Arc<Mutex<Vec<u8>>>>,
    pty: bool,
}

impl RunOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_stdout_lines<F: FnMut(&str) + Send + 'static>(mut self, f: F) -> Self {
        self.on_stdout = Some(Box::new(f));
        self
    }

    pub fn with_stderr_lines<F: FnMut(&str) + Send + 'static>(mut self, f: F) -> Self {
        self.on_stderr = Some(Box::new(f));
        self
    }

    pub fn with_stdin(mut self, data: impl Into<Vec<u8>>) -> Self {
        self.stdin = Some(data.into());
        self
    }

    pub fn capturing_stdout(mut self, sink: Arc<Mutex<Vec<u8>>>) -> Self {
        self.capture_stdout = Some(sink);
        self
    }

    pub fn with_pty(mut self) -> Self {
        self.pty = true;
        self
    }
}

/// argv[0] tag applied to every remote invocation so a cancelled command can be
/// targeted with `pkill -f`, since disconnecting the local ssh multiplexer does not
/// terminate the process it started on the other end.
fn process_tag() -> String {
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    format!("shipcrate-{}", COUNTER.fetch_add(1, Ordering::Relaxed))
}

#[async_trait]
impl Executor for RemoteExecutor {
    fn host(&self) -> &str {
        RemoteExecutor::host(self)
    }

    async fn run(&self, ctx: &Ctx, cmd: &str, opts: RunOptions) -> Result<(), RemoteError> {
        if opts.pty {
            return self.run_with_pty(cmd).await;
        }

        let tag = process_tag();
        let tagged = format!("exec -a {} sh -c {:?}", tag, cmd);

        let mut command = self.session.command("bash");
        command.arg("-c").arg(&tagged);
        command.stdout(Stdio::piped());
        command.stderr(Stdio::piped());
        command.stdin(if opts.stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        });

        let mut child = command
            .spawn()
            .await
            .map_err(|e| RemoteError::SessionOpen {
                host: self.host.clone(),
                source: e.into(),
            })?;

        let stdout = child.stdout().take().expect("stdout was piped");
        let stderr = child.stderr().take().expect("stderr was piped");

        let host = self.host.clone();
        let mut on_stdout = opts.on_stdout;
        let capture = opts.capture_stdout.clone();
        let stdout_host = host.clone();
        let stdout_task = tokio::spawn(async move {
            let callback_host = stdout_host.clone();
            let mut splitter = StreamSplitter::new(move |line: &str| {
                if let Some(buf) = &capture {
                    buf.lock().unwrap().extend_from_slice(line.as_bytes());
                    buf.lock().unwrap().push(b'\n');
                }
                match &mut on_stdout {
                    Some(cb) => cb(line),
                    None => debug!("[{}] {}", callback_host, line),
                }
            });

            let mut stdout = stdout;
            let mut chunk = [0u8; 8192];
            let read_result = loop {
                match stdout.read(&mut chunk).await {
                    Ok(0) => break Ok(()),
                    Ok(n) => {
                        if splitter.feed(&chunk[..n]).is_err() {
                            break Ok(());
                        }
                    }
                    Err(e) => {
                        break Err(RemoteError::Pipe {
                            host: stdout_host.clone(),
                            fd: Fd::Stdout,
                            source: e,
                        })
                    }
                }
            };

            splitter.close().await.map_err(|e| RemoteError::SessionOpen {
                host: stdout_host.clone(),
                source: anyhow::anyhow!(e),
            })?;
            read_result
        });

        let mut on_stderr = opts.on_stderr;
        let stderr_host = host.clone();
        let stderr_task = tokio::spawn(async move {
            let callback_host = stderr_host.clone();
            let mut splitter = StreamSplitter::new(move |line: &str| match &mut on_stderr {
                Some(cb) => cb(line),
                None => debug!("[{}] {}", callback_host, line),
            });

            let mut stderr = stderr;
            let mut chunk = [0u8; 8192];
            let read_result = loop {
                match stderr.read(&mut chunk).await {
                    Ok(0) => break Ok(()),
                    Ok(n) => {
                        if splitter.feed(&chunk[..n]).is_err() {
                            break Ok(());
                        }
                    }
                    Err(e) => {
                        break Err(RemoteError::Pipe {
                            host: stderr_host.clone(),
                            fd: Fd::Stderr,
                            source: e,
                        })
                    }
                }
            };

            splitter.close().await.map_err(|e| RemoteError::SessionOpen {
                host: stderr_host.clone(),
                source: anyhow::anyhow!(e),
            })?;
            read_result
        });

        if let Some(data) = opts.stdin {
            let mut stdin = child.stdin().take().expect("stdin was piped");
            let host = self.host.clone();
            let write_result = stdin.write_all(&data).await;
            drop(stdin);
            if let Err(e) = write_result {
                return Err(RemoteError::Pipe {
                    host,
                    fd: Fd::Stdin,
                    source: e,
                });
            }
        }

        let cancel_watch = {
            let ctx = ctx.clone();
            let tag = tag.clone();
            let host = self.host.clone();
            tokio::spawn(async move {
                ctx.cancelled().await;
                debug!("cancelling [{}] tagged {}", host, tag);
            })
        };

        tokio::select! {
            status = child.wait() => {
                cancel_watch.abort();
                stdout_task.await.map_err(|_| RemoteError::SessionOpen {
                    host: self.host.clone(),
                    source: anyhow::anyhow!("stdout reader task panicked"),
                })??;
                stderr_task.await.map_err(|_| RemoteError::SessionOpen {
                    host: self.host.clone(),
                    source: anyhow::anyhow!("stderr reader task panicked"),
                })??;

                let status = status.map_err(|e| RemoteError::SessionOpen {
                    host: self.host.clone(),
                    source: e.into(),
                })?;

                match status.code() {
                    Some(0) => Ok(()),
                    Some(127) => Err(RemoteError::CommandNotFound {
                        host: self.host.clone(),
                        command: cmd.to_string(),
                    }),
                    Some(code) => Err(RemoteError::RemoteExit {
                        host: self.host.clone(),
                        command: cmd.to_string(),
                        status: code,
                    }),
                    None => Ok(()),
                }
            }
            _ = ctx.cancelled() => {
                if let Err(e) = self.kill_tagged(&tag).await {
                    warn!("failed to signal cancelled command on {}: {}", self.host, e);
                }
                let _ = child.wait().await;
                Ok(())
            }
        }
    }

    async fn read_file(&self, ctx: &Ctx, path: &str) -> Result<Vec<u8>, RemoteError> {
        let buf = Arc::new(Mutex::new(Vec::new()));
        let opts = RunOptions::new().capturing_stdout(buf.clone());
        let cmd = format!("cat {}", path);
        match self.run(ctx, &cmd, opts).await {
            Ok(()) => Ok(buf.lock().unwrap().clone()),
            Err(RemoteError::Pipe { fd: Fd::Stdout, .. }) => Err(RemoteError::Pipe {
                host: self.host.clone(),
                fd: Fd::Stdout,
                source: std::io::Error::new(std::io::ErrorKind::Other, "stdout closed early"),
            }),
            Err(_) => Ok(buf.lock().unwrap().clone()),
        }
    }

    async fn write_file(&self, ctx: &Ctx, path: &str, data: &[u8]) -> Result<(), RemoteError> {
        let cmd = format!("mkdir -p $(dirname {}) && cat > {}", path, path);
        let opts = RunOptions::new().with_stdin(data.to_vec());
        self.run(ctx, &cmd, opts).await
    }
}

impl RemoteExecutor {
    async fn kill_tagged(&self, tag: &str) -> Result<(), RemoteError> {
        let cmd = format!("pkill -TERM -f {} || true", tag);
        let mut command = self.session.command("bash");
        command.arg("-c").arg(&cmd);
        command
            .status()
            .await
            .map(|_| ())
            .map_err(|e| RemoteError::SessionOpen {
                host: self.host.clone(),
                source: e.into(),
            })
    }

    /// The native-mux session never allocates a remote tty (`native_mux_impl` has no
    /// tty/pty toggle at all), so an interactive exec shells out to the system `ssh`
    /// binary with `-tt` instead of running over the multiplexed session, trading the
    /// connection-pooling benefit of the mux session for a real remote pty.
    async fn run_with_pty(&self, cmd: &str) -> Result<(), RemoteError> {
        use crossterm::terminal;
        use tokio::process::Command as SystemCommand;

        let mut ssh = SystemCommand::new("ssh");
        ssh.arg("-tt");
        if let Some(port) = self.port {
            ssh.arg("-p").arg(port.to_string());
        }
        ssh.arg(format!("{}@{}", self.user, self.host));
        ssh.arg(cmd);
        ssh.stdin(std::process::Stdio::inherit());
        ssh.stdout(std::process::Stdio::inherit());
        ssh.stderr(std::process::Stdio::inherit());

        let raw_guard = terminal::enable_raw_mode();
        let status = ssh.status().await.map_err(|e| RemoteError::SessionOpen {
            host: self.host.clone(),
            source: e.into(),
        });
        if raw_guard.is_ok() {
            let _ = terminal::disable_raw_mode();
        }
        let status = status?;

        match status.code() {
            Some(0) | None => Ok(()),
            Some(127) => Err(RemoteError::CommandNotFound {
                host: self.host.clone(),
                command: cmd.to_string(),
            }),
            Some(code) => Err(RemoteError::RemoteExit {
                host: self.host.clone(),
                command: cmd.to_string(),
                status: code,
            }),
        }
    }
}
