use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::ctx::Ctx;
use crate::ssh::Executor;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
pub type StepFn = Arc<dyn for<'a> Fn(&'a Ctx, &'a dyn Executor) -> BoxFuture<'a, anyhow::Result<()>> + Send + Sync>;

#[derive(Clone)]
pub struct Step {
    pub name: String,
    pub forward: StepFn,
    pub rollback: StepFn,
}

pub fn step<F, R>(name: impl Into<String>, forward: F, rollback: R) -> Step
where
    F: for<'a> Fn(&'a Ctx, &'a dyn Executor) -> BoxFuture<'a, anyhow::Result<()>> + Send + Sync + 'static,
    R: for<'a> Fn(&'a Ctx, &'a dyn Executor) -> BoxFuture<'a, anyhow::Result<()>> + Send + Sync + 'static,
{
    Step {
        name: name.into(),
        forward: Arc::new(forward),
        rollback: Arc::new(rollback),
    }
}

pub fn noop_rollback() -> StepFn {
    Arc::new(|_ctx: &Ctx, _executor: &dyn Executor| Box::pin(async { Ok(()) }))
}

pub fn step_no_rollback<F>(name: impl Into<String>, forward: F) -> Step
where
    F: for<'a> Fn(&'a Ctx, &'a dyn Executor) -> BoxFuture<'a, anyhow::Result<()>> + Send + Sync + 'static,
{
    Step {
        name: name.into(),
        forward: Arc::new(forward),
        rollback: noop_rollback(),
    }
}

#[derive(Debug)]
pub struct HostState {
    pub host: String,
    pub last_completed_step: i64,
}

#[derive(Debug, Error)]
pub enum TxError {
    #[error("unknown host: {0}")]
    UnknownHost(String),
    #[error("worker task panicked: {0}")]
    TaskPanicked(#[from] tokio::task::JoinError),
    #[error("rolled back transaction after failure: {cause}")]
    RolledBack { cause: anyhow::Error },
    #[error("{} host(s) failed", .0.len())]
    Aggregate(Vec<(String, anyhow::Error)>),
}

/// Fans a script of steps out across a set of hosts, compensating in reverse order on
/// the hosts that made progress if any host's forward step fails.
pub struct TransactionManager {
    executors: Vec<Arc<dyn Executor>>,
    primary: Option<String>,
    rollback_timeout: Duration,
}

impl TransactionManager {
    pub fn new(executors: Vec<Arc<dyn Executor>>) -> Self {
        Self {
            executors,
            primary: None,
            rollback_timeout: Duration::from_secs(30),
        }
    }

    pub fn set_primary_host(&mut self, host: &str) -> Result<(), TxError> {
        if self.executors.iter().any(|e| e.host() == host) {
            self.primary = Some(host.to_string());
            Ok(())
        } else {
            Err(TxError::UnknownHost(host.to_string()))
        }
    }

    fn targets(&self) -> Vec<Arc<dyn Executor>> {
        match &self.primary {
            Some(host) => self
                .executors
                .iter()
                .filter(|e| e.host() == host)
                .cloned()
                .collect(),
            None => self.executors.clone(),
        }
    }

    /// Runs `steps` on every target host, in order, on each host independently. On
    /// the first failure the shared cancellation signal fires; hosts still running
    /// stop at their current step boundary, and every host that completed at least
    /// one step gets its completed steps rolled back, in reverse order.
    pub async fn tx(&self, ctx: &Ctx, steps: &[Step], bypass_rollback: bool) -> Result<(), TxError> {
        let cancel_ctx = ctx.child();
        let targets = self.targets();

        let mut set = JoinSet::new();
        for executor in &targets {
            let executor = executor.clone();
            let cancel_ctx = cancel_ctx.clone();
            let steps = steps.to_vec();
            set.spawn(async move {
                let mut last_completed: i64 = -1;
                let mut failure = None;
                for (i, step) in steps.iter().enumerate() {
                    if cancel_ctx.is_cancelled() {
                        break;
                    }
                    match (step.forward)(&cancel_ctx, executor.as_ref()).await {
                        Ok(()) => last_completed = i as i64,
                        Err(e) => {
                            cancel_ctx.cancel();
                            failure = Some(e);
                            break;
                        }
                    }
                }
                (executor.host().to_string(), last_completed, failure)
            });
        }

        let mut host_states = Vec::new();
        let mut failure_cause: Option<anyhow::Error> = None;
        while let Some(joined) = set.join_next().await {
            let (host, last_completed, err) = joined?;
            if err.is_some() && failure_cause.is_none() {
                failure_cause = err;
            }
            host_states.push(HostState {
                host,
                last_completed_step: last_completed,
            });
        }

        let Some(cause) = failure_cause else {
            return Ok(());
        };

        if bypass_rollback {
            return Err(TxError::RolledBack { cause });
        }

        let rollback_ctx = Ctx::fresh_with_timeout(self.rollback_timeout);
        let mut compensations = JoinSet::new();
        for state in host_states {
            if state.last_completed_step < 0 {
                continue;
            }
            let Some(executor) = targets.iter().find(|e| e.host() == state.host).cloned() else {
                continue;
            };
            let steps = steps.to_vec();
            let rollback_ctx = rollback_ctx.clone();
            compensations.spawn(async move {
                for i in (0..=state.last_completed_step).rev() {
                    let step = &steps[i as usize];
                    match (step.rollback)(&rollback_ctx, executor.as_ref()).await {
                        Ok(()) => debug!("rolled back '{}' on {}", step.name, state.host),
                        Err(e) => warn!("rollback of '{}' failed on {}: {}", step.name, state.host, e),
                    }
                }
            });
        }
        while compensations.join_next().await.is_some() {}

        Err(TxError::RolledBack { cause })
    }

    /// Runs `callback` on every target host concurrently. Unlike `tx`, a failure on
    /// one host does not cancel the others; all errors are collected.
    pub async fn execute(&self, ctx: &Ctx, callback: StepFn) -> Result<(), TxError> {
        let targets = self.targets();
        let mut set = JoinSet::new();
        for executor in targets {
            let ctx = ctx.clone();
            let callback = callback.clone();
            set.spawn(async move {
                let result = callback(&ctx, executor.as_ref()).await;
                (executor.host().to_string(), result)
            });
        }

        let mut errors = Vec::new();
        while let Some(joined) = set.join_next().await {
            let (host, result) = joined?;
            if let Err(e) = result {
                errors.push((host, e));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(TxError::Aggregate(errors))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ssh::{Fd, RemoteError, RunOptions};
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct FakeExecutor {
        host: String,
        fail_on: Option<String>,
        calls: Arc<Mutex<Vec<(String, String)>>>,
    }

    #[async_trait]
    impl Executor for FakeExecutor {
        fn host(&self) -> &str {
            &self.host
        }

        async fn run(&self, _ctx: &Ctx, cmd: &str, _opts: RunOptions) -> Result<(), RemoteError> {
            self.calls.lock().unwrap().push((self.host.clone(), cmd.to_string()));
            if self.fail_on.as_deref() == Some(cmd) {
                return Err(RemoteError::RemoteExit {
                    host: self.host.clone(),
                    command: cmd.to_string(),
                    status: 1,
                });
            }
            Ok(())
        }

        async fn read_file(&self, _ctx: &Ctx, _path: &str) -> Result<Vec<u8>, RemoteError> {
            Ok(Vec::new())
        }

        async fn write_file(&self, _ctx: &Ctx, _path: &str, _data: &[u8]) -> Result<(), RemoteError> {
            Ok(())
        }
    }

    fn make_step(name: &'static str) -> Step {
        let fwd_name = name.to_string();
        let rb_name = name.to_string();
        step(
            name,
            move |_ctx, executor| {
                let cmd = format!("forward:{}", fwd_name);
                Box::pin(async move {
                    executor.run(&Ctx::background(), &cmd, RunOptions::new()).await?;
                    Ok(())
                })
            },
            move |_ctx, executor| {
                let cmd = format!("rollback:{}", rb_name);
                Box::pin(async move {
                    executor.run(&Ctx::background(), &cmd, RunOptions::new()).await?;
                    Ok(())
                })
            },
        )
    }

    #[tokio::test]
    async fn all_hosts_run_every_step_in_order_on_success() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let h1 = Arc::new(FakeExecutor { host: "h1".into(), fail_on: None, calls: calls.clone() });
        let h2 = Arc::new(FakeExecutor { host: "h2".into(), fail_on: None, calls: calls.clone() });
        let manager = TransactionManager::new(vec![h1, h2]);
        let steps = vec![make_step("pull"), make_step("stop"), make_step("start")];

        manager.tx(&Ctx::background(), &steps, false).await.unwrap();

        let recorded = calls.lock().unwrap();
        assert_eq!(recorded.len(), 6);
        let h1_calls: Vec<_> = recorded.iter().filter(|(h, _)| h == "h1").map(|(_, c)| c.clone()).collect();
        assert_eq!(h1_calls, vec!["forward:pull", "forward:stop", "forward:start"]);
    }

    #[tokio::test]
    async fn failure_triggers_reverse_rollback_on_the_host_that_progressed() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let h1 = Arc::new(FakeExecutor {
            host: "h1".into(),
            fail_on: Some("forward:start".into()),
            calls: calls.clone(),
        });
        let manager = TransactionManager::new(vec![h1]);
        let steps = vec![make_step("pull"), make_step("stop"), make_step("start")];

        let err = manager.tx(&Ctx::background(), &steps, false).await.unwrap_err();
        assert!(matches!(err, TxError::RolledBack { .. }));

        let recorded = calls.lock().unwrap();
        let cmds: Vec<_> = recorded.iter().map(|(_, c)| c.clone()).collect();
        assert_eq!(
            cmds,
            vec!["forward:pull", "forward:stop", "forward:start", "rollback:stop", "rollback:pull"]
        );
    }

    #[tokio::test]
    async fn bypass_skips_rollback_entirely() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let h1 = Arc::new(FakeExecutor {
            host: "h1".into(),
            fail_on: Some("forward:stop".into()),
            calls: calls.clone(),
        });
        let manager = TransactionManager::new(vec![h1]);
        let steps = vec![make_step("pull"), make_step("stop")];

        let err = manager.tx(&Ctx::background(), &steps, true).await.unwrap_err();
        assert!(matches!(err, TxError::RolledBack { .. }));

        let recorded = calls.lock().unwrap();
        let cmds: Vec<_> = recorded.iter().map(|(_, c)| c.clone()).collect();
        assert_eq!(cmds, vec!["forward:pull", "forward:stop"]);
    }

    #[tokio::test]
    async fn execute_runs_every_host_and_aggregates_errors() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let h1 = Arc::new(FakeExecutor { host: "h1".into(), fail_on: Some("ping".into()), calls: calls.clone() });
        let h2 = Arc::new(FakeExecutor { host: "h2".into(), fail_on: None, calls: calls.clone() });
        let manager = TransactionManager::new(vec![h1, h2]);

        let callback: StepFn = Arc::new(|_ctx, executor| {
            Box::pin(async move {
                executor.run(&Ctx::background(), "ping", RunOptions::new()).await?;
                Ok(())
            })
        });

        let err = manager.execute(&Ctx::background(), callback).await.unwrap_err();
        match err {
            TxError::Aggregate(errs) => {
                assert_eq!(errs.len(), 1);
                assert_eq!(errs[0].0, "h1");
            }
            other => panic!("unexpected error: {:?}", other),
        }
        // h2 still ran despite h1 failing.
        assert!(calls.lock().unwrap().iter().any(|(h, _)| h == "h2"));
    }

    #[tokio::test]
    async fn set_primary_host_restricts_to_one_host() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let h1 = Arc::new(FakeExecutor { host: "h1".into(), fail_on: None, calls: calls.clone() });
        let h2 = Arc::new(FakeExecutor { host: "h2".into(), fail_on: None, calls: calls.clone() });
        let mut manager = TransactionManager::new(vec![h1, h2]);
        manager.set_primary_host("h2").unwrap();

        let callback: StepFn = Arc::new(|_ctx, executor| {
            Box::pin(async move {
                executor.run(&Ctx::background(), "ping", RunOptions::new()).await?;
                Ok(())
            })
        });
        manager.execute(&Ctx::background(), callback).await.unwrap();

        let recorded = calls.lock().unwrap();
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].0, "h2");

        assert!(matches!(manager.set_primary_host("missing"), Err(TxError::UnknownHost(_))));
    }
}
