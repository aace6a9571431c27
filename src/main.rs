//! cloudplay-agent - host agent for cloud game streaming.
//!
//! Waits on a Redis work queue for session requests. For each one it
//! publishes the websocket endpoint the player should connect to, then
//! launches the game and its capture pipelines when the player starts the
//! session and relays their input until they disconnect.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cloudplay_agent::broker::Broker;
use cloudplay_agent::config::{default_config_path, AgentConfig, ConfigError};
use cloudplay_agent::queue::{QueueError, RedisQueue, WorkQueue};
use cloudplay_agent::services::Services;
use cloudplay_agent::state::AgentState;

/// cloudplay-agent - host agent for cloud game streaming
#[derive(Parser, Debug)]
#[command(name = "cloudplay-agent", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Path to the TOML config file
    #[arg(long, env = "CLOUDPLAY_CONFIG")]
    config: Option<PathBuf>,

    /// Interface the session websocket listener binds to
    #[arg(long)]
    bind_host: Option<String>,

    /// Host name advertised to players
    #[arg(long)]
    public_host: Option<String>,

    /// Session websocket port
    #[arg(long)]
    port: Option<u16>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Load and validate the configuration, then print it
    CheckConfig,
}

#[derive(Error, Debug)]
pub enum AgentError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("failed to render config: {0}")]
    Render(#[from] toml::ser::Error),
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "cloudplay_agent=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn load_config(cli: &Cli) -> Result<AgentConfig, AgentError> {
    let path = cli.config.clone().unwrap_or_else(default_config_path);
    let mut config = AgentConfig::load(&path)?;

    if let Some(host) = &cli.bind_host {
        config.bind_host = host.clone();
    }
    if let Some(host) = &cli.public_host {
        config.public_host = Some(host.clone());
    }
    if let Some(port) = cli.port {
        config.ws_port = port;
    }
    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<(), AgentError> {
    let cli = Cli::parse();
    init_tracing();

    let config = load_config(&cli)?;

    match cli.command {
        Some(Commands::CheckConfig) => {
            print!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
        None => run_agent(config).await,
    }
}

async fn run_agent(config: AgentConfig) -> Result<(), AgentError> {
    tracing::info!(
        endpoint = %config.ws_endpoint(),
        redis = %config.redis_url,
        "cloudplay agent starting"
    );

    let queue: Arc<dyn WorkQueue> = Arc::new(RedisQueue::new(
        &config.redis_url,
        config.queue_key.clone(),
        config.reply_ttl_secs,
    )?);
    let services = Services::from_config(&config);
    let state = AgentState::new();
    let broker = Broker::new(queue, state.clone(), services, Arc::new(config));

    let shutdown = CancellationToken::new();
    let broker_shutdown = shutdown.clone();
    let broker_task = tokio::spawn(async move { broker.run(broker_shutdown).await });

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for Ctrl+C");
    } else {
        tracing::info!("received Ctrl+C");
    }
    shutdown.cancel();

    if let Err(e) = broker_task.await {
        tracing::error!(error = %e, "broker task panicked");
    }

    // Anything a crashed session left behind.
    let mut slots = state.lock().await;
    if !slots.is_empty() {
        tracing::warn!("terminating leftover session processes");
        slots.terminate_all().await;
    }
    Ok(())
}
