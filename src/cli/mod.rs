use clap::{Parser, Subcommand};
use std::path::PathBuf;

pub mod app;
pub mod deploy;
pub mod history;
pub mod init;
pub mod logs;
pub mod proxy;
pub mod registry;
pub mod rollback;

#[derive(Parser)]
#[command(name = "shipcrate", version, about = "Transactional, multi-host container deployment over SSH")]
pub struct Cli {
    /// Path to shipcrate.yaml
    #[arg(short, long, default_value = "shipcrate.yaml")]
    pub config: PathBuf,

    /// Restrict this command to a single configured server
    #[arg(long)]
    pub host: Option<String>,

    /// Skip rollback on failure and surface the raw error
    #[arg(long)]
    pub force: bool,

    /// Enable debug logging
    #[arg(long)]
    pub debug: bool,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Scaffold shipcrate.yaml in the current directory
    Init,

    /// Build, push and roll out a new version across every configured server
    Deploy,

    /// Roll back to a previously deployed version
    Rollback {
        /// Version to roll back to
        version: String,
    },

    /// Show deployed version history
    History {
        /// Sort order
        #[arg(long, default_value = "desc")]
        sort: SortOrder,
    },

    /// Tail application logs
    Logs {
        /// Follow log output
        #[arg(short, long)]
        follow: bool,
        /// Number of lines to show
        #[arg(short = 'n', long)]
        lines: Option<u32>,
        /// Show logs since this time (docker's `--since` syntax)
        #[arg(long)]
        since: Option<String>,
    },

    /// Manage the application container
    App {
        #[command(subcommand)]
        action: ContainerAction,
    },

    /// Manage the reverse proxy container
    Proxy {
        #[command(subcommand)]
        action: ContainerAction,
    },

    /// Manage registry authentication on every server
    Registry {
        #[command(subcommand)]
        action: RegistryAction,
    },
}

#[derive(Clone, clap::ValueEnum)]
pub enum SortOrder {
    Asc,
    Desc,
}

#[derive(Subcommand)]
pub enum ContainerAction {
    /// Show container status on every server
    Show,
    /// Start the container
    Start,
    /// Stop the container
    Stop,
    /// Stop then start the container
    Restart,
    /// Tail container logs
    Logs {
        #[arg(short, long)]
        follow: bool,
        #[arg(short = 'n', long)]
        lines: Option<u32>,
        #[arg(long)]
        since: Option<String>,
    },
    /// Run a command inside the container
    Exec {
        /// Allocate a pty and attach interactively
        #[arg(short, long)]
        interactive: bool,
        /// Command to run
        #[arg(trailing_var_arg = true)]
        cmd: Vec<String>,
    },
}

#[derive(Subcommand)]
pub enum RegistryAction {
    /// Log in to the configured registry on every server
    Login,
    /// Log out of the configured registry on every server
    Logout,
}
