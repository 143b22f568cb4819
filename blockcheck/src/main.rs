use std::{path::PathBuf, sync::Arc};

use blockcheck_blocklist::DecisionEngine;
use blockcheck_server::{CheckerClient, FailurePolicy, QueryServer};
use blocklist::{
    reload::{ReloadController, spawn_signal_listener},
    service::BlocklistService,
};
use clap::{Parser, Subcommand};
use config::{Config, DEFAULT_CONFIG_PATH, load_config};
use tokio::signal;
use tracing::level_filters::LevelFilter;
use tracing_appender::non_blocking;
use tracing_subscriber::{Layer, fmt, layer::SubscriberExt, util::SubscriberInitExt};

mod blocklist;
mod config;

/// Per-user DNS blocklist checker for a DoH proxy.
#[derive(Debug, Parser)]
#[command(version)]
struct Cli {
    /// Path of the TOML config file. Created with defaults if missing.
    #[arg(short, long, env = "BLOCKCHECK_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Override `server.socket_path`.
    #[arg(short, long)]
    socket: Option<PathBuf>,

    /// Override `blocklist.directory`.
    #[arg(short = 'f', long)]
    blocklist_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Serve blocklist checks on the configured socket (default).
    Serve,
    /// Ask a running checker whether a domain is blocked for a user.
    Check {
        #[arg(short, long)]
        user: String,
        #[arg(short, long)]
        domain: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = load_config(&cli.config)?;
    if let Some(socket) = cli.socket {
        config.server.socket_path = socket;
    }
    if let Some(dir) = cli.blocklist_dir {
        config.blocklist.directory = dir;
    }
    config.validate()?;

    let (nb, _guard) = non_blocking(std::io::stdout());

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(nb)
                .with_target(false)
                .with_filter(LevelFilter::from(config.server.log_level.clone())),
        )
        .init();

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config).await,
        Command::Check { user, domain } => check(config, &user, &domain).await,
    }
}

async fn serve(config: Config) -> anyhow::Result<()> {
    let engine = DecisionEngine::new(config.blocklist.unknown_user.into());

    // Refuse to start without blocklist data.
    let service = Arc::new(BlocklistService::load(&config.blocklist.directory, engine)?);
    tracing::debug!(
        "Unknown users fall back to {:?}",
        service.engine().unknown_user_policy()
    );

    let controller = Arc::new(ReloadController::new(service.clone()));
    let signals = spawn_signal_listener(controller.clone())?;
    let reloader = {
        let controller = controller.clone();
        tokio::spawn(async move { controller.run().await })
    };

    let server = QueryServer::bind(&config.server.socket_path, service, config.server.options())?;

    tokio::select! {
        r = server.run() => {
            if let Err(e) = r {
                tracing::error!("Query server exited with error: {}", e);
            }
        },
        _ = signal::ctrl_c() => {
            tracing::info!("Shutting down blocklist checker...");
        },
    }

    signals.abort();
    reloader.abort();

    Ok(())
}

async fn check(config: Config, user: &str, domain: &str) -> anyhow::Result<()> {
    let policy = FailurePolicy::from(config.proxy.on_checker_failure);
    let client = CheckerClient::new(&config.server.socket_path)
        .with_timeout(config.server.timeout())
        .with_failure_policy(policy);

    // Failures are logged by the client and resolved by the configured policy.
    let blocked = client.is_blocked(user, domain).await;
    println!("{}", if blocked { "blocked" } else { "allowed" });

    Ok(())
}
