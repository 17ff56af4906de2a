//! APK agent - control-plane to Kubernetes data-plane synchronization

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use axum_server::Handle;
use clap::{Parser, Subcommand};
use kube::Client;
use tokio::sync::watch;

use apk_agent::config::{Config, Overrides};
use apk_agent::context::AgentContext;
use apk_agent::events::broker;
use apk_agent::events::EventProcessor;
use apk_agent::fanout::server::EventStreamServer;
use apk_agent::fanout::FanOut;
use apk_agent::reconcile::{ClusterClient, InMemoryClusterClient, KubeClusterClient};
use apk_agent::store::StateStore;
use apk_agent::telemetry::{init_telemetry, TelemetryConfig};

/// How long the HTTPS server waits for in-flight requests on shutdown
const HTTP_GRACE_PERIOD: Duration = Duration::from_secs(10);

/// APK agent - keeps an APK gateway in sync with its API-management control plane
#[derive(Parser, Debug)]
#[command(name = "apk-agent", version, about, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, env = "APK_AGENT_CONFIG", default_value = "/home/wso2/conf/config.toml")]
    config: PathBuf,

    /// Control-plane base URL
    #[arg(long, env = "CP_SERVICE_URL")]
    service_url: Option<String>,

    /// Control-plane user name
    #[arg(long, env = "CP_USERNAME")]
    username: Option<String>,

    /// Control-plane password
    #[arg(long, env = "CP_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// AMQP URL of the event broker
    #[arg(long, env = "CP_BROKER_URL")]
    broker_url: Option<String>,

    /// Namespace the CRs are written to
    #[arg(long, env = "APK_NAMESPACE")]
    namespace: Option<String>,

    /// Log filter directive (overrides RUST_LOG)
    #[arg(long, env = "APK_AGENT_LOG")]
    log: Option<String>,

    /// Human-readable log lines instead of JSON
    #[arg(long)]
    pretty_logs: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the agent (default mode)
    ///
    /// Loads the control-plane state, starts the enforcer event stream and the
    /// HTTPS query surface, then follows change notifications until stopped.
    Run {
        /// Keep generated resources in memory instead of writing them to the cluster
        #[arg(long)]
        dry_run: bool,
    },

    /// Validate the configuration and print the effective settings
    CheckConfig,
}

impl Cli {
    fn overrides(&self) -> Overrides {
        Overrides {
            service_url: self.service_url.clone(),
            username: self.username.clone(),
            password: self.password.clone(),
            broker_url: self.broker_url.clone(),
            namespace: self.namespace.clone(),
        }
    }

    fn load_config(&self) -> anyhow::Result<Config> {
        let mut config = if self.config.exists() {
            Config::load(&self.config)?
        } else {
            Config::default()
        };
        config.apply(self.overrides());
        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
        eprintln!("CRITICAL: Failed to install crypto provider: {e:?}");
        std::process::exit(1);
    }

    let cli = Cli::parse();
    init_telemetry(TelemetryConfig {
        filter: cli.log.clone(),
        pretty: cli.pretty_logs,
    })?;

    match cli.command {
        Some(Commands::CheckConfig) => check_config(&cli),
        Some(Commands::Run { dry_run }) => run(&cli, dry_run).await,
        None => run(&cli, false).await,
    }
}

fn check_config(cli: &Cli) -> anyhow::Result<()> {
    let mut config = cli.load_config()?;
    config.control_plane.password = "********".to_string();
    let rendered = toml::to_string_pretty(&config).context("failed to render configuration")?;
    println!("{rendered}");
    Ok(())
}

async fn cluster_client(config: &Config, dry_run: bool) -> anyhow::Result<Arc<dyn ClusterClient>> {
    if dry_run {
        tracing::warn!("Dry run: generated resources stay in memory");
        return Ok(Arc::new(InMemoryClusterClient::new()));
    }
    let client = Client::try_default()
        .await
        .context("failed to create Kubernetes client")?;
    Ok(Arc::new(KubeClusterClient::new(
        client,
        config.data_plane.namespace.clone(),
    )))
}

async fn run(cli: &Cli, dry_run: bool) -> anyhow::Result<()> {
    let config = cli.load_config()?;
    tracing::info!(
        control_plane = %config.control_plane.service_url,
        namespace = %config.data_plane.namespace,
        labels = ?config.environment_labels(),
        "APK agent starting"
    );

    let cluster = cluster_client(&config, dry_run).await?;
    let fanout = Arc::new(FanOut::new());
    let store = Arc::new(StateStore::new(fanout.clone()));
    let ctx = Arc::new(AgentContext::new(config, store.clone(), cluster)?);

    apk_agent::sync::bootstrap(&ctx)
        .await
        .context("initial load from the control plane failed")?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let server = &ctx.config.server;

    let grpc_addr = SocketAddr::from(([0, 0, 0, 0], server.grpc_port));
    let mut grpc_shutdown = shutdown_rx.clone();
    let grpc = tokio::spawn(EventStreamServer::serve(fanout, grpc_addr, async move {
        let _ = grpc_shutdown.changed().await;
    }));

    let http_addr = SocketAddr::from(([0, 0, 0, 0], server.http_port));
    let http_handle = Handle::new();
    let http = tokio::spawn({
        let store = store.clone();
        let cert = server.tls_cert_path.clone();
        let key = server.tls_key_path.clone();
        let handle = http_handle.clone();
        async move { apk_agent::http::serve(store, http_addr, &cert, &key, handle).await }
    });

    let processor = EventProcessor::new(ctx.clone());
    let consumers: Vec<_> = match &ctx.config.control_plane.broker_url {
        Some(url) => broker::consumers(url, &processor)
            .into_iter()
            .map(|consumer| tokio::spawn(consumer.run(shutdown_rx.clone())))
            .collect(),
        None => {
            tracing::warn!("No broker configured, change notifications will not be followed");
            Vec::new()
        }
    };

    tracing::info!("APK agent running");
    shutdown_signal().await;
    tracing::info!("Shutting down");

    let _ = shutdown_tx.send(true);
    http_handle.graceful_shutdown(Some(HTTP_GRACE_PERIOD));

    for consumer in consumers {
        match consumer.await {
            Ok(Err(e)) => tracing::error!(error = %e, "Broker consumer failed"),
            Err(e) => tracing::error!(error = %e, "Broker consumer panicked"),
            Ok(Ok(())) => {}
        }
    }
    for (name, task) in [("grpc", grpc), ("http", http)] {
        match task.await {
            Ok(Err(e)) => tracing::error!(server = name, error = %e, "Server failed"),
            Err(e) => tracing::error!(server = name, error = %e, "Server panicked"),
            Ok(Ok(())) => {}
        }
    }

    tracing::info!("APK agent stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
