use std::sync::Arc;

use tokio::sync::OnceCell;

use crate::config::Config;

use super::{ConnectError, RemoteExecutor};

/// Connects to every configured host on first use, and remembers either the
/// resulting executors or the error, so a failed fleet-wide connect is not silently
/// retried on every subsequent call within the same process run.
pub struct ConnectionPool {
    config: Arc<Config>,
    clients: OnceCell<Result<Vec<Arc<RemoteExecutor>>, ConnectError>>,
}

impl ConnectionPool {
    pub fn new(config: Arc<Config>) -> Self {
        Self {
            config,
            clients: OnceCell::new(),
        }
    }

    pub async fn executors(&self) -> Result<&[Arc<RemoteExecutor>], ConnectError> {
        let result = self
            .clients
            .get_or_init(|| async {
                let mut executors = Vec::with_capacity(self.config.servers.len());
                for host in &self.config.servers {
                    let executor = RemoteExecutor::connect(
                        &self.config.ssh.user,
                        host,
                        self.config.ssh.port,
                        None,
                    )
                    .await?;
                    executors.push(Arc::new(executor));
                }
                Ok(executors)
            })
            .await;

        result.as_deref().map_err(Clone::clone)
    }
}
