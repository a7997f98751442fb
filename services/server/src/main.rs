//! `prism-server` CLI entry point (§10.4): loads configuration, wires the
//! store/DNS/email capabilities, and runs the TCP server, liveness monitor,
//! and read-only query surface until a shutdown signal arrives.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use prism_config::{Config, EmailProviderKind};
use prism_dns::{DisabledDnsProvider, DnsProvider, LoggingDnsProvider};
use prism_email::{
    ConsoleProvider, EmailProvider, InMemorySuppressionList, RetryConfig as EmailRetryConfig,
    SmtpPoolConfig, SmtpProvider, SmtpTransportConfig, TransactionalApiConfig, TransactionalProvider,
};
use prism_server::connection::ConnectionContext;
use prism_server::liveness::LivenessMonitor;
use prism_server::query_api::{self, QueryApiState};
use prism_server::registration::RegistrationProcessor;
use prism_server::stats::Statistics;
use prism_server::tcp_server::TcpServer;
use prism_store::SqliteHostStore;
use tokio::sync::{watch, Mutex};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "prism-server", version, about = "Managed-hostname registration server")]
struct Cli {
    /// Path to a TOML configuration file. Falls back to `PRISM_CONFIG` env var.
    #[arg(long)]
    config: Option<PathBuf>,
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

    let config = match Config::load(cli.config.as_deref()) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("FATAL: failed to load configuration: {e}");
            std::process::exit(1);
        }
    };

    info!(
        version = env!("CARGO_PKG_VERSION"),
        tcp_port = config.server.tcp_port,
        dns_enabled = config.dns.enabled,
        "prism-server starting"
    );

    if let Err(e) = run(config).await {
        error!(error = %e, "fatal runtime error");
        std::process::exit(2);
    }

    info!("prism-server shut down cleanly");
}

async fn run(config: Config) -> std::io::Result<()> {
    let store = Arc::new(Mutex::new(
        SqliteHostStore::open(std::path::Path::new(&config.store.database_path))
            .unwrap_or_else(|e| {
                eprintln!("FATAL: failed to open host store: {e}");
                std::process::exit(1);
            }),
    ));

    let dns: Arc<dyn DnsProvider> = if config.dns.enabled {
        // A concrete authoritative DNS backend is outside the core's scope
        // (§4.3 specifies the port contract only); LoggingDnsProvider is the
        // reference implementation that actually reaches "synced", emitting
        // every call to the log and an in-memory ledger the query surface
        // can read back.
        Arc::new(LoggingDnsProvider::new())
    } else {
        Arc::new(DisabledDnsProvider)
    };

    let email_provider = build_email_provider(&config);
    if !email_provider.verify_configuration().await {
        error!(provider = email_provider.name(), "email provider failed configuration check");
    }

    let stats = Statistics::new();
    let registration = Arc::new(RegistrationProcessor::new(
        Arc::clone(&store),
        Arc::clone(&dns),
        stats.clone(),
        &config,
    ));

    let conn_ctx = Arc::new(ConnectionContext {
        registration,
        stats: stats.clone(),
        max_message_size: config.protocol.max_message_size,
        max_buffer_size: config.protocol.max_buffer_size,
        connection_timeout: config.server.connection_timeout,
    });

    let tcp_server = TcpServer::bind(
        &config.server.host,
        config.server.tcp_port,
        conn_ctx,
        config.server.max_connections,
        config.server.graceful_shutdown_timeout,
    )
    .await?;

    let liveness = LivenessMonitor::new(
        Arc::clone(&store),
        Arc::clone(&dns),
        stats.clone(),
        config.heartbeat.interval,
        config.heartbeat.liveness_timeout,
        config.dns.retraction_policy.clone(),
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let tcp_handle = tokio::spawn(tcp_server.run(shutdown_rx.clone()));
    let liveness_handle = tokio::spawn(liveness.run(shutdown_rx.clone()));

    let query_api_handle = if config.query_api.enabled {
        let query_state = QueryApiState { store: Arc::clone(&store), stats: stats.clone() };
        let router = query_api::router(query_state);
        let listener = tokio::net::TcpListener::bind(&config.query_api.bind).await?;
        info!(addr = %config.query_api.bind, "read-only query surface listening");
        let mut shutdown_rx = shutdown_rx.clone();
        Some(tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(async move {
                    let _ = shutdown_rx.changed().await;
                })
                .await
        }))
    } else {
        None
    };

    shutdown_signal().await;
    info!("shutdown signal received, draining");
    let _ = shutdown_tx.send(true);

    let _ = tcp_handle.await;
    let _ = liveness_handle.await;
    if let Some(handle) = query_api_handle {
        let _ = handle.await;
    }

    Ok(())
}

fn build_email_provider(config: &Config) -> Arc<dyn EmailProvider> {
    match config.email.provider {
        EmailProviderKind::Console => Arc::new(ConsoleProvider::new()),
        EmailProviderKind::Smtp => {
            let transport = SmtpTransportConfig {
                host: config.smtp.host.clone(),
                port: config.smtp.port,
                username: config.smtp.username.clone(),
                password: config.smtp.password.clone(),
                use_tls: config.smtp.use_tls,
                use_ssl: config.smtp.use_ssl,
            };
            let pool_config = SmtpPoolConfig {
                max_size: config.smtp.pool.max_size,
                max_idle_time: config.smtp.pool.max_idle_time,
                acquire_timeout: std::time::Duration::from_secs(30),
            };
            let retry = EmailRetryConfig {
                max_attempts: config.retry.max_attempts,
                initial_delay: config.retry.initial_delay,
                max_delay: config.retry.max_delay,
                exponential_base: 2.0,
                jitter: config.retry.jitter,
            };
            let breaker = prism_email::CircuitBreakerConfig {
                failure_threshold: config.breaker.failure_threshold,
                recovery_timeout: config.breaker.recovery_timeout,
            };
            Arc::new(SmtpProvider::new(
                transport,
                pool_config,
                retry,
                breaker,
                Arc::new(InMemorySuppressionList::new()),
                config.email.from_email.clone(),
            ))
        }
        EmailProviderKind::Ses => {
            let api_config = TransactionalApiConfig {
                endpoint: std::env::var("PRISM_SES_ENDPOINT")
                    .unwrap_or_else(|_| "https://email.us-east-1.amazonaws.com".to_owned()),
                api_key: std::env::var("PRISM_SES_API_KEY").unwrap_or_default(),
                configuration_set: std::env::var("PRISM_SES_CONFIGURATION_SET").ok(),
            };
            Arc::new(TransactionalProvider::new(
                api_config,
                Arc::new(InMemorySuppressionList::new()),
                config.email.from_email.clone(),
            ))
        }
    }
}

/// Waits for SIGTERM or Ctrl-C (SIGINT) (§4.7 graceful shutdown trigger).
async fn shutdown_signal() {
    use tokio::signal;

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
        _ = ctrl_c => { info!("received Ctrl+C"); }
        _ = terminate => { info!("received SIGTERM"); }
    }
}
