mod cli;
mod commands;
mod config;
mod ctx;
mod deploy;
mod history;
mod local;
mod output;
mod release;
mod ssh;
mod stream;
mod txman;

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use cli::{Cli, Command};
use config::{CliOverrides, Config};
use ctx::Ctx;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = match (cli.debug, cli.verbose) {
        (true, _) | (_, 2..) => "debug",
        (_, 1) => "info",
        _ => "warn",
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .without_time()
        .init();

    if let Command::Init = cli.command {
        return cli::init::run();
    }

    let overrides = CliOverrides {
        host: cli.host.clone(),
        force: cli.force,
        debug: cli.debug,
    };
    let config = Arc::new(Config::load(&cli.config, &overrides)?);

    let root_ctx = Ctx::background();
    let ctx = root_ctx.child();
    let signal_ctx = ctx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            signal_ctx.cancel();
        }
    });

    let result = match cli.command {
        Command::Init => unreachable!("handled above"),
        Command::Deploy => cli::deploy::run(&ctx, config).await,
        Command::Rollback { version } => cli::rollback::run(&ctx, config, &version).await,
        Command::History { sort } => cli::history::run(&ctx, config, sort).await,
        Command::Logs { follow, lines, since } => {
            cli::logs::run(&ctx, config, follow, lines, since.as_deref()).await
        }
        Command::App { action } => cli::app::run(&ctx, config, action).await,
        Command::Proxy { action } => cli::proxy::run(&ctx, config, action).await,
        Command::Registry { action } => cli::registry::run(&ctx, config, action).await,
    };

    if let Err(err) = &result {
        output::error(&format!("{:#}", err));
    }
    result
}
