//! `prism-agent` CLI entry point (§10.4): runs the heartbeat agent as a
//! standalone process.

use std::time::Duration;

use clap::Parser;
use prism_agent::{AgentConfig, HeartbeatAgent};
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "prism-agent", version, about = "Managed-hostname heartbeat agent")]
struct Cli {
    /// `host:port` of the registration server.
    #[arg(long)]
    server: String,

    /// Override OS hostname detection.
    #[arg(long)]
    hostname: Option<String>,

    /// Heartbeat interval in seconds.
    #[arg(long, default_value_t = 60)]
    interval: u64,

    /// Shared secret sent as `REGISTER.auth_token`.
    #[arg(long, env = "PRISM_AGENT_AUTH_TOKEN")]
    auth_token: Option<String>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    if let Err(e) = prism_agent::validate_server_addr(&cli.server) {
        eprintln!("FATAL: cannot resolve --server '{}': {e}", cli.server);
        std::process::exit(1);
    }

    let config = AgentConfig {
        server_addr: cli.server,
        hostname_override: cli.hostname,
        interval: Duration::from_secs(cli.interval),
        auth_token: cli.auth_token,
    };

    let agent = HeartbeatAgent::new(config);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let run = tokio::spawn(agent.run(shutdown_rx));

    let _ = tokio::signal::ctrl_c().await;
    info!("received Ctrl+C, stopping agent");
    let _ = shutdown_tx.send(true);
    let _ = run.await;
}
