use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::Utc;

use crate::commands;
use crate::config::Config;
use crate::ctx::Ctx;
use crate::history::History;
use crate::local::LocalExecutor;
use crate::output;
use crate::release;
use crate::ssh::{pool::ConnectionPool, Executor, RunOptions};
use crate::txman::{noop_rollback, step, step_no_rollback, Step, StepFn, TransactionManager};

const HISTORY_PATH: &str = "~/.shipcrate/history.json";

pub struct Deployer {
    config: Arc<Config>,
    pool: ConnectionPool,
    local: LocalExecutor,
}

impl Deployer {
    pub fn new(config: Arc<Config>) -> Self {
        let pool = ConnectionPool::new(config.clone());
        Self {
            config,
            pool,
            local: LocalExecutor::new(),
        }
    }

    async fn manager(&self) -> Result<TransactionManager> {
        let executors = self.pool.executors().await?;
        let executors: Vec<Arc<dyn Executor>> =
            executors.iter().map(|e| e.clone() as Arc<dyn Executor>).collect();
        let mut manager = TransactionManager::new(executors);
        if let Some(host) = &self.config.host {
            manager.set_primary_host(host)?;
        }
        Ok(manager)
    }

    async fn load_history(&self, ctx: &Ctx) -> Result<History> {
        let manager = self.manager().await?;
        let contents: Arc<std::sync::Mutex<Vec<(String, Vec<u8>)>>> = Arc::new(std::sync::Mutex::new(Vec::new()));
        let collector = contents.clone();
        let callback: StepFn = Arc::new(move |ctx, executor| {
            let collector = collector.clone();
            Box::pin(async move {
                let bytes = executor.read_file(ctx, HISTORY_PATH).await?;
                collector.lock().unwrap().push((executor.host().to_string(), bytes));
                Ok(())
            })
        });
        manager.execute(ctx, callback).await.context("failed to read history from hosts")?;

        let expected = self.expected_host_count();
        let collected = Arc::try_unwrap(contents).unwrap().into_inner().unwrap();
        Ok(History::merge_from_hosts(&collected, expected)?)
    }

    fn expected_host_count(&self) -> usize {
        match &self.config.host {
            Some(_) => 1,
            None => self.config.servers.len(),
        }
    }

    fn write_history_step(&self, history: History) -> StepFn {
        Arc::new(move |ctx, executor| {
            let history = history.clone();
            Box::pin(async move {
                let bytes = history.to_bytes()?;
                executor.write_file(ctx, HISTORY_PATH, &bytes).await?;
                Ok(())
            })
        })
    }

    pub async fn deploy(&self, ctx: &Ctx) -> Result<String> {
        let mut history = self.load_history(ctx).await?;
        let current_version = history.latest_version();
        let new_version = release::generate_version();

        output::header(&format!("Deploying {} ({})", self.config.service, new_version));

        output::step(1, 3, "Building and pushing image");
        let image_tag = format!("{}:{}", self.config.image, new_version);
        let build_cmd = commands::build_and_push_image(
            &image_tag,
            &self.config.build.dockerfile,
            &self.config.build.platform,
            &self.config.build.builder,
            &self.config.secrets,
            &self.config.build.args,
        );
        self.local
            .run(ctx, &build_cmd, &self.config.env)
            .await
            .context("failed to build and push image")?;

        output::step(2, 3, "Ensuring proxy is running");
        if self.config.proxy.is_some() {
            self.ensure_proxy_running(ctx).await?;
        }

        output::step(3, 3, "Rolling out new containers");
        history.append(new_version.clone(), Utc::now());

        let new_container = format!("{}-{}", self.config.service, new_version);
        let old_container = current_version
            .as_ref()
            .map(|v| format!("{}-{}", self.config.service, v));

        let image_tag_forward = image_tag.clone();
        let pull_step = step_no_rollback("pull_image", move |ctx, executor| {
            let cmd = commands::pull_image(&image_tag_forward);
            Box::pin(async move {
                executor.run(ctx, &cmd, RunOptions::new()).await?;
                Ok(())
            })
        });

        let mut steps = vec![pull_step];

        if let Some(old_container) = old_container.clone() {
            let stop_forward = old_container.clone();
            let stop_rollback = old_container.clone();
            steps.push(step(
                "stop_previous",
                move |ctx, executor| {
                    let cmd = commands::stop_container(&stop_forward);
                    Box::pin(async move {
                        executor.run(ctx, &cmd, RunOptions::new()).await?;
                        Ok(())
                    })
                },
                move |ctx, executor| {
                    let cmd = commands::start_container(&stop_rollback);
                    Box::pin(async move {
                        executor.run(ctx, &cmd, RunOptions::new()).await?;
                        Ok(())
                    })
                },
            ));
        }

        let env = self.config.env.clone();
        let labels: BTreeMap<String, String> = BTreeMap::new();
        let run_forward_image = image_tag.clone();
        let run_forward_name = new_container.clone();
        let run_rollback_name = new_container.clone();
        steps.push(step(
            "start_new",
            move |ctx, executor| {
                let cmd = commands::run_container(&run_forward_image, &run_forward_name, &env, &labels);
                Box::pin(async move {
                    executor.run(ctx, &cmd, RunOptions::new()).await?;
                    Ok(())
                })
            },
            move |ctx, executor| {
                let cmd = commands::stop_container(&run_rollback_name);
                Box::pin(async move {
                    executor.run(ctx, &cmd, RunOptions::new()).await?;
                    Ok(())
                })
            },
        ));

        steps.push(Step {
            name: "append_version".to_string(),
            forward: self.write_history_step(history),
            rollback: noop_rollback(),
        });

        let manager = self.manager().await?;
        manager
            .tx(ctx, &steps, self.config.transaction.bypass)
            .await
            .context("deploy transaction failed")?;

        output::success(&format!("Deployed version {}", new_version));
        Ok(new_version)
    }

    pub async fn rollback(&self, ctx: &Ctx, target_version: &str) -> Result<()> {
        let mut history = self.load_history(ctx).await?;
        if !history.contains(target_version) {
            bail!("version {} does not exist in history", target_version);
        }
        let current = history
            .latest_version()
            .context("history is empty, nothing to roll back from")?;
        let already_current = current == target_version;
        if already_current {
            output::info("Already at the requested version; refreshing history timestamp only");
        }
        history.touch(target_version, Utc::now())?;

        let mut steps = Vec::new();

        if !already_current {
            let current_container = format!("{}-{}", self.config.service, current);
            let target_container = format!("{}-{}", self.config.service, target_version);

            let stop_forward = current_container.clone();
            let stop_rollback = current_container.clone();
            let start_forward = target_container.clone();
            let start_rollback = target_container.clone();

            steps.push(step(
                "stop_current",
                move |ctx, executor| {
                    let cmd = commands::stop_container(&stop_forward);
                    Box::pin(async move {
                        executor.run(ctx, &cmd, RunOptions::new()).await?;
                        Ok(())
                    })
                },
                move |ctx, executor| {
                    let cmd = commands::start_container(&stop_rollback);
                    Box::pin(async move {
                        executor.run(ctx, &cmd, RunOptions::new()).await?;
                        Ok(())
                    })
                },
            ));
            steps.push(step(
                "start_target",
                move |ctx, executor| {
                    let cmd = commands::start_container(&start_forward);
                    Box::pin(async move {
                        executor.run(ctx, &cmd, RunOptions::new()).await?;
                        Ok(())
                    })
                },
                move |ctx, executor| {
                    let cmd = commands::stop_container(&start_rollback);
                    Box::pin(async move {
                        executor.run(ctx, &cmd, RunOptions::new()).await?;
                        Ok(())
                    })
                },
            ));
        }

        steps.push(Step {
            name: "write_history".to_string(),
            forward: self.write_history_step(history),
            rollback: noop_rollback(),
        });

        let manager = self.manager().await?;
        manager
            .tx(ctx, &steps, self.config.transaction.bypass)
            .await
            .context("rollback transaction failed")?;

        output::success(&format!("Rolled back to {}", target_version));
        Ok(())
    }

    /// The container name of the currently deployed version, derived from history.
    pub async fn current_container(&self, ctx: &Ctx) -> Result<String> {
        let history = self.load_history(ctx).await?;
        let version = history.latest_version().context("no version has been deployed yet")?;
        Ok(format!("{}-{}", self.config.service, version))
    }

    pub fn proxy_container(&self) -> Result<String> {
        let proxy = self.config.proxy.clone().context("proxy is not configured")?;
        Ok(proxy.container)
    }

    pub async fn history(&self, ctx: &Ctx, ascending: bool) -> Result<Vec<crate::history::HistoryEntry>> {
        let mut history = self.load_history(ctx).await?;
        if ascending {
            Ok(history.entries_ascending())
        } else {
            Ok(history.entries().to_vec())
        }
    }

    async fn ensure_proxy_running(&self, ctx: &Ctx) -> Result<()> {
        let proxy = self.config.proxy.clone().expect("checked by caller");
        let callback: StepFn = Arc::new(move |ctx, executor| {
            let proxy = proxy.clone();
            Box::pin(async move {
                let running_buf = Arc::new(std::sync::Mutex::new(Vec::new()));
                let opts = RunOptions::new().capturing_stdout(running_buf.clone());
                executor.run(ctx, &commands::list_running_containers(), opts).await.ok();
                let running_out = String::from_utf8_lossy(&running_buf.lock().unwrap()).to_string();
                if running_out.contains(&proxy.container) {
                    return Ok(());
                }

                let all_buf = Arc::new(std::sync::Mutex::new(Vec::new()));
                let opts_all = RunOptions::new().capturing_stdout(all_buf.clone());
                executor.run(ctx, &commands::list_all_containers(), opts_all).await.ok();
                let all_out = String::from_utf8_lossy(&all_buf.lock().unwrap()).to_string();
                if all_out.contains(&proxy.container) {
                    let cmd = commands::start_container(&proxy.container);
                    executor.run(ctx, &cmd, RunOptions::new()).await?;
                } else {
                    let cmd = commands::start_proxy(&proxy.image, &proxy.container, &proxy.labels, &proxy.args);
                    executor.run(ctx, &cmd, RunOptions::new()).await?;
                }
                Ok(())
            })
        });
        let manager = self.manager().await?;
        manager.execute(ctx, callback).await.context("failed to ensure proxy is running")?;
        Ok(())
    }

    pub async fn start_service(&self, ctx: &Ctx, container: &str) -> Result<()> {
        self.run_on_every_host(ctx, commands::start_container(container)).await
    }

    pub async fn stop_service(&self, ctx: &Ctx, container: &str) -> Result<()> {
        self.run_on_every_host(ctx, commands::stop_container(container)).await
    }

    pub async fn restart_service(&self, ctx: &Ctx, container: &str) -> Result<()> {
        self.stop_service(ctx, container).await?;
        self.start_service(ctx, container).await
    }

    async fn run_on_every_host(&self, ctx: &Ctx, cmd: String) -> Result<()> {
        let callback: StepFn = Arc::new(move |ctx, executor| {
            let cmd = cmd.clone();
            Box::pin(async move {
                executor.run(ctx, &cmd, RunOptions::new()).await?;
                Ok(())
            })
        });
        let manager = self.manager().await?;
        manager.execute(ctx, callback).await?;
        Ok(())
    }

    pub async fn logs(
        &self,
        ctx: &Ctx,
        container: &str,
        follow: bool,
        lines: Option<u32>,
        since: Option<&str>,
    ) -> Result<()> {
        let cmd = commands::container_logs(container, follow, lines, since);
        let callback: StepFn = Arc::new(move |ctx, executor| {
            let cmd = cmd.clone();
            let host = executor.host().to_string();
            Box::pin(async move {
                let opts = RunOptions::new().with_stdout_lines(move |line| println!("[{}] {}", host, line));
                executor.run(ctx, &cmd, opts).await?;
                Ok(())
            })
        });
        let manager = self.manager().await?;
        manager.execute(ctx, callback).await?;
        Ok(())
    }

    pub async fn exec(&self, ctx: &Ctx, container: &str, cmd: &str, interactive: bool) -> Result<()> {
        let full_cmd = commands::exec_in_container(container, cmd, interactive);
        let callback: StepFn = Arc::new(move |ctx, executor| {
            let full_cmd = full_cmd.clone();
            let opts = if interactive {
                RunOptions::new().with_pty()
            } else {
                let host = executor.host().to_string();
                RunOptions::new().with_stdout_lines(move |line| println!("[{}] {}", host, line))
            };
            Box::pin(async move {
                executor.run(ctx, &full_cmd, opts).await?;
                Ok(())
            })
        });
        let manager = self.manager().await?;
        manager.execute(ctx, callback).await?;
        Ok(())
    }

    pub async fn registry_login(&self, ctx: &Ctx) -> Result<()> {
        let cmd = commands::registry_login(
            &self.config.registry.server,
            &self.config.registry.username,
            &self.config.registry.password,
        );
        self.run_on_every_host(ctx, cmd).await
    }

    pub async fn registry_logout(&self, ctx: &Ctx) -> Result<()> {
        let cmd = commands::registry_logout(&self.config.registry.server);
        self.run_on_every_host(ctx, cmd).await
    }

    pub async fn show_service_info(&self, ctx: &Ctx, container: &str) -> Result<BTreeMap<String, String>> {
        self.show_container_info(ctx, container).await
    }

    pub async fn show_proxy_info(&self, ctx: &Ctx) -> Result<BTreeMap<String, String>> {
        let proxy = self.config.proxy.clone().context("proxy is not configured")?;
        self.show_container_info(ctx, &proxy.container).await
    }

    async fn show_container_info(&self, ctx: &Ctx, container: &str) -> Result<BTreeMap<String, String>> {
        let results: Arc<std::sync::Mutex<BTreeMap<String, String>>> = Arc::new(std::sync::Mutex::new(BTreeMap::new()));
        let collector = results.clone();
        let container = container.to_string();
        let cmd = format!("{} --filter name={}", commands::list_all_containers(), container);
        let callback: StepFn = Arc::new(move |ctx, executor| {
            let cmd = cmd.clone();
            let collector = collector.clone();
            Box::pin(async move {
                let buf = Arc::new(std::sync::Mutex::new(Vec::new()));
                executor.run(ctx, &cmd, RunOptions::new().capturing_stdout(buf.clone())).await?;
                let out = String::from_utf8_lossy(&buf.lock().unwrap()).to_string();
                collector.lock().unwrap().insert(executor.host().to_string(), out);
                Ok(())
            })
        });
        let manager = self.manager().await?;
        manager.execute(ctx, callback).await?;
        Ok(Arc::try_unwrap(results).unwrap().into_inner().unwrap())
    }
}

