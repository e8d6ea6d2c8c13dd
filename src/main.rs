//! Tollgate - payment-gated task ingestion gateway

use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tollgate::{
    config::Args,
    db::{MemoryStore, MongoClient, MongoTaskStore, TaskStore},
    notify::{Noop, Notifier, ReputationSink, Webhook},
    payment::{DevFacilitator, HttpFacilitator, SettlementFacilitator},
    server,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    let args = Args::parse();

    // Initialize tracing/logging
    let log_level = args.log_level.clone();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("tollgate={},info", log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Err(e) = args.validate() {
        error!("Configuration error: {}", e);
        std::process::exit(1);
    }

    info!("======================================");
    info!("  Tollgate - task ingestion gateway");
    info!("======================================");
    info!("Node ID: {}", args.node_id);
    info!("Listen: {}", args.listen);
    info!(
        "Mode: {}",
        if args.dev_mode { "DEVELOPMENT" } else { "PRODUCTION" }
    );
    info!(
        "Asset: {} on {} ({} decimals), fee {} bps",
        args.asset, args.network, args.asset_decimals, args.fee_bps
    );
    info!("Pay to: {}", args.pay_to());
    info!("MongoDB: {}", args.mongodb_uri);
    match &args.facilitator_url {
        Some(url) => info!("Facilitator: {}", url),
        None => info!("Facilitator: built-in dev rail"),
    }
    info!("======================================");

    // Connect to MongoDB; dev mode degrades to the in-memory store
    let (store, store_kind): (Arc<dyn TaskStore>, &'static str) =
        match MongoClient::new(&args.mongodb_uri, &args.mongodb_db).await {
            Ok(client) => match MongoTaskStore::new(&client).await {
                Ok(store) => {
                    info!("MongoDB store ready");
                    (Arc::new(store), "mongodb")
                }
                Err(e) => {
                    if args.dev_mode {
                        warn!("MongoDB index setup failed (dev mode, using memory store): {}", e);
                        (Arc::new(MemoryStore::new()), "memory")
                    } else {
                        error!("MongoDB index setup failed: {}", e);
                        std::process::exit(1);
                    }
                }
            },
            Err(e) => {
                if args.dev_mode {
                    warn!("MongoDB connection failed (dev mode, using memory store): {}", e);
                    (Arc::new(MemoryStore::new()), "memory")
                } else {
                    error!("MongoDB connection failed: {}", e);
                    std::process::exit(1);
                }
            }
        };

    // Settlement facilitator: HTTP client in production, dev rail otherwise
    let facilitator: Arc<dyn SettlementFacilitator> = match &args.facilitator_url {
        Some(url) => {
            let timeout = Duration::from_millis(args.facilitator_timeout_ms);
            match HttpFacilitator::new(url, timeout) {
                Ok(f) => Arc::new(f),
                Err(e) => {
                    error!("Failed to build facilitator client: {}", e);
                    std::process::exit(1);
                }
            }
        }
        None => Arc::new(DevFacilitator),
    };

    // Rating collaborators, fire-and-report; no-ops when unconfigured
    let webhook_timeout = Duration::from_millis(args.webhook_timeout_ms);
    let notifier: Arc<dyn Notifier> = match &args.notify_url {
        Some(url) => match Webhook::new(url, webhook_timeout) {
            Ok(w) => {
                info!("Notification webhook: {}", url);
                Arc::new(w)
            }
            Err(e) => {
                error!("Failed to build notification webhook: {}", e);
                std::process::exit(1);
            }
        },
        None => Arc::new(Noop),
    };
    let reputation: Arc<dyn ReputationSink> = match &args.reputation_url {
        Some(url) => match Webhook::new(url, webhook_timeout) {
            Ok(w) => {
                info!("Reputation webhook: {}", url);
                Arc::new(w)
            }
            Err(e) => {
                error!("Failed to build reputation webhook: {}", e);
                std::process::exit(1);
            }
        },
        None => Arc::new(Noop),
    };

    let state = Arc::new(server::AppState::new(
        args, store, store_kind, facilitator, notifier, reputation,
    ));

    if let Err(e) = server::run(state).await {
        error!("Server error: {:?}", e);
        std::process::exit(1);
    }

    Ok(())
}
