//! Synchronization service binary.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use ytsync_chain::{CliTxFactory, QueryNodeClient, RpcChainClient};
use ytsync_storage::{LatencyBook, StorageNodeClient};
use ytsync_store::{ChannelsRepository, DynamoBackend, VideosRepository, WhitelistRepository};
use ytsync_worker::quota::SyncQuotaSink;
use ytsync_worker::{Orchestrator, QuotaAccountant, SyncConfig, SyncContext};
use ytsync_youtube::{YoutubeClient, YoutubeCredentials, YtDlpFetcher};

#[derive(Debug, Parser)]
#[command(name = "ytsync-worker", about = "Channel synchronization service")]
struct Cli {
    /// Path to the configuration document (YAML or JSON).
    #[arg(long = "configPath")]
    config_path: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    // Install rustls crypto provider (required for TLS/HTTPS)
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(fmt::layer().json())
        .with(EnvFilter::from_default_env().add_directive("ytsync=info".parse().unwrap()))
        .init();

    let cli = Cli::parse();
    info!("Starting ytsync-worker");

    let config = match SyncConfig::load(cli.config_path.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {e}");
            std::process::exit(1);
        }
    };

    let ctx = match build_context(config).await {
        Ok(ctx) => Arc::new(ctx),
        Err(e) => {
            error!("Failed to build service context: {e}");
            std::process::exit(1);
        }
    };

    let orchestrator = Orchestrator::new(ctx);
    let shutdown = orchestrator.shutdown_handle();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Received shutdown signal");
        let _ = shutdown.send(true);
    });

    if let Err(e) = orchestrator.run().await {
        error!("Orchestrator error: {e}");
        std::process::exit(1);
    }

    info!("Shutdown complete");
}

async fn build_context(config: SyncConfig) -> ytsync_worker::SyncResult<SyncContext> {
    let backend = Arc::new(DynamoBackend::from_env().await);
    let channels = Arc::new(ChannelsRepository::new(backend.clone()));
    let videos = Arc::new(VideosRepository::new(backend.clone()));
    let whitelist = Arc::new(WhitelistRepository::new(backend));

    let quota = Arc::new(QuotaAccountant::new(
        config.limits.daily_api_quota.sync,
        config.limits.daily_api_quota.signup,
    ));

    let youtube = Arc::new(
        YoutubeClient::new(
            YoutubeCredentials {
                client_id: config.youtube.client_id.clone(),
                client_secret: config.youtube.client_secret.clone(),
            },
            Arc::new(SyncQuotaSink(quota.clone())),
        )
        .map_err(ytsync_worker::SyncError::from)?,
    );
    let fetcher = Arc::new(YtDlpFetcher::new().map_err(ytsync_worker::SyncError::from)?);

    let factory = Arc::new(CliTxFactory::new(
        config.joystream.signer_command.clone(),
        config.endpoints.joystream_node_ws.clone(),
        config.joystream.channel_collaborator.account.clone(),
    ));
    let chain = Arc::new(
        RpcChainClient::connect(&config.endpoints.joystream_node_ws, factory)
            .await
            .map_err(ytsync_worker::SyncError::from)?,
    );

    let query_node = Arc::new(
        QueryNodeClient::new(config.endpoints.query_node.clone())
            .map_err(ytsync_worker::SyncError::from)?,
    );
    let storage_nodes = Arc::new(
        StorageNodeClient::new(Duration::from_secs(3_600))
            .map_err(ytsync_worker::SyncError::from)?,
    );

    let disk = Arc::new(
        ytsync_worker::DiskBudget::with_usage_from_dir(
            config.limits.storage_bytes()?,
            &config.asset_dir(),
        )
        .await?,
    );

    Ok(SyncContext {
        config,
        channels,
        videos,
        whitelist,
        quota,
        youtube,
        fetcher,
        chain,
        query_node,
        storage_nodes,
        latency: Arc::new(LatencyBook::new()),
        disk,
    })
}
