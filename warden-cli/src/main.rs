mod handlers;
mod reactor;
mod watch;

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use warden_core::client::{EventBackend, WardenClient};
use warden_core::config::Config;

use crate::handlers::Reply;

#[derive(Parser)]
#[command(
    name = "warden",
    about = "Warden: leases, agent registry and a single-leader watcher for agents sharing a repository",
    version
)]
struct Cli {
    /// Shared state directory
    #[arg(long, global = true, env = "WARDEN_DIR")]
    dir: Option<PathBuf>,

    /// Event store: "jsonl" or "sqlite:<path>"
    #[arg(long, global = true, default_value = "jsonl", env = "WARDEN_EVENTS")]
    events: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Exclusive leases on named resources
    Lock {
        #[command(subcommand)]
        action: LockCommand,
    },

    /// Advisory registry of active agents
    Agent {
        #[command(subcommand)]
        action: AgentCommand,
    },

    /// Run the single-leader event watcher
    #[command(args_conflicts_with_subcommands = true)]
    Watch {
        #[command(subcommand)]
        action: Option<WatchCommand>,

        /// Detach and log to watch.log in the state directory
        #[arg(long)]
        background: bool,

        /// Shell command run for each triggering event; its stdout becomes the reaction
        #[arg(long, value_name = "COMMAND")]
        exec: Option<String>,

        /// Seconds between polls (at least 1)
        #[arg(long, value_name = "SECS", value_parser = clap::value_parser!(u64).range(1..))]
        interval: Option<u64>,
    },

    /// Append a message event to the shared stream
    Post { body: String },

    /// Emit a reaction at most once per idempotency key
    Act {
        #[arg(long)]
        key: String,
        body: String,
    },

    /// Print version information
    Version,
}

#[derive(Subcommand)]
enum LockCommand {
    /// Exit 0 if the resource is free (or stale), 1 if locked
    Check { resource: String },
    Acquire {
        resource: String,
        #[arg(default_value = "")]
        purpose: String,
    },
    Release { resource: String },
    /// Refresh a lease this agent holds
    Renew { resource: String },
    Status,
    /// Remove stale leases
    Cleanup,
}

#[derive(Subcommand)]
enum AgentCommand {
    /// Register (or re-register) this agent with a task and comma-separated resources
    Register {
        task: String,
        resources: Option<String>,
    },
    /// Change task and/or resources; an empty value keeps the old one
    Update {
        task: String,
        resources: Option<String>,
    },
    Heartbeat,
    Deregister,
    Status,
    /// Evict agents whose heartbeat expired
    Cleanup,
    /// Exit 0 if no other active agent declared these resources, 1 otherwise
    CheckConflicts { resources: String },
}

#[derive(Subcommand)]
enum WatchCommand {
    /// Signal the running leader to shut down
    Stop,
    /// Report the leader pid and when it last polled
    Status,
}

fn init_tracing(default_directive: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let long_running = matches!(cli.command, Commands::Watch { action: None, .. });
    init_tracing(if long_running { "info" } else { "warn" });

    if matches!(cli.command, Commands::Version) {
        return handlers::version().emit();
    }

    let mut config = Config::from_env();
    if let Some(dir) = cli.dir {
        config.state_dir = dir;
    }

    let backend = match EventBackend::parse(&cli.events) {
        Ok(backend) => backend,
        Err(msg) => return Reply::usage(msg).emit(),
    };
    let client = match WardenClient::open(config, &backend) {
        Ok(client) => client,
        Err(e) => return Reply::error(&e).emit(),
    };
    tracing::debug!(agent_id = %client.agent_id(), dir = %client.config().state_dir.display(), "client ready");

    let reply = match cli.command {
        Commands::Lock { action } => handlers::lock(&client, action),
        Commands::Agent { action } => handlers::agent(&client, action),
        Commands::Watch {
            action,
            background,
            exec,
            interval,
        } => match action {
            Some(WatchCommand::Stop) => watch::stop(&client).await,
            Some(WatchCommand::Status) => watch::status(&client),
            None if background => watch::spawn_background(&client).await,
            None => {
                let options = watch::WatchOptions {
                    exec,
                    interval: interval.map(Duration::from_secs),
                };
                watch::run(client, options).await
            }
        },
        Commands::Post { body } => handlers::post(&client, &body),
        Commands::Act { key, body } => handlers::act(&client, &key, &body),
        Commands::Version => handlers::version(),
    };
    reply.emit()
}

#[cfg(test)]
#[path = "cli_test.rs"]
mod cli_test;
