//! Thin CLI entrypoint wiring a config file and the local machine to the
//! `sessioncast-core` runtime. No core logic lives here — just flag
//! parsing, config layering, logging init, and shutdown.

use anyhow::{Context, Result};
use clap::Parser;
use sessioncast_core::config::Config;
use sessioncast_core::Agent;
use tokio::signal;

#[derive(Parser)]
#[command(name = "sessioncast-agent", about = "SessionCast host agent")]
struct Cli {
    /// Path to a TOML configuration file.
    #[arg(long)]
    config: Option<std::path::PathBuf>,

    /// Override relay.url.
    #[arg(long)]
    relay_url: Option<String>,

    /// Override relay.token.
    #[arg(long)]
    relay_token: Option<String>,

    /// Override agent.machine_id.
    #[arg(long)]
    machine_id: Option<String>,

    /// Override agent.label.
    #[arg(long)]
    label: Option<String>,

    /// Don't connect automatically on startup.
    #[arg(long)]
    no_auto_connect: bool,
}

fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = match &cli.config {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("reading config file {}", path.display()))?;
            Config::from_toml_str(&text).with_context(|| format!("parsing config file {}", path.display()))?
        }
        None => Config::default(),
    };

    config.apply_env_overrides();

    if let Some(url) = &cli.relay_url {
        config.relay.url = url.clone();
    }
    if let Some(token) = &cli.relay_token {
        config.relay.token = token.clone();
    }
    if let Some(machine_id) = &cli.machine_id {
        config.agent.machine_id = machine_id.clone();
    }
    if let Some(label) = &cli.label {
        config.agent.label = label.clone();
    }
    if cli.no_auto_connect {
        config.agent.auto_connect = false;
    }

    config.validate().context("invalid configuration")?;
    Ok(config)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli)?;

    let agent = Agent::with_tmux(&config).context("failed to construct agent")?;

    if config.agent.auto_connect {
        if let Err(e) = agent.connect().await {
            tracing::warn!(error = %e, "initial connect failed, relying on reconnect/backoff");
        }
    }

    tracing::info!("sessioncast-agent running, waiting for shutdown signal");
    shutdown_signal().await;
    tracing::info!("shutting down");
    agent.close().await;

    Ok(())
}
