//! Rollcall registry server

use clap::Parser;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use rollcall::{
    config::{Args, Backend},
    dispatcher::{spawn_dispatcher, Dispatcher},
    logging,
    registry::{spawn_cleanup_task, Registry},
    server::{self, AppState},
    store::{BackingStore, MemoryStore, MongoStore},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    let args = Args::parse();
    logging::init_tracing(&args.log_level, args.log_format);

    if let Err(e) = args.validate() {
        error!("Configuration error: {}", e);
        std::process::exit(1);
    }

    let registry_config = args.registry_config();

    info!("======================================");
    info!("  Rollcall - Service Registry");
    info!("======================================");
    info!("Node ID: {}", args.node_id);
    info!("Listen: {}", args.listen);
    info!("Backend: {:?}", args.backend);
    if args.backend == Backend::Mongo {
        info!("MongoDB: {} ({}.{})", args.mongodb_uri, args.mongodb_db, args.mongodb_collection);
    }
    info!("TTL: {:?}", registry_config.ttl);
    info!(
        "Cleanup: grace {:?}, every {:?}",
        registry_config.cleanup_grace, registry_config.cleanup_interval
    );
    info!(
        "Dispatch: {}",
        if args.dispatch_enabled { "enabled" } else { "disabled" }
    );
    info!("======================================");

    let store: Arc<dyn BackingStore> = match args.backend {
        Backend::Memory => Arc::new(MemoryStore::new()),
        Backend::Mongo => Arc::new(
            MongoStore::connect(&args.mongodb_uri, &args.mongodb_db, &args.mongodb_collection)
                .await?,
        ),
    };

    let registry = Arc::new(Registry::new(store, registry_config));
    let shutdown = CancellationToken::new();

    spawn_cleanup_task(Arc::clone(&registry), shutdown.clone());

    if args.dispatch_enabled {
        let dispatcher = Dispatcher::new(Arc::clone(&registry), args.dispatcher_config())?;
        spawn_dispatcher(dispatcher, shutdown.clone());
    }

    let ctrl_c = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl-C, shutting down");
        }
        ctrl_c.cancel();
    });

    let state = Arc::new(AppState::new(args.node_id, registry));
    server::run(args.listen, state, shutdown).await?;

    Ok(())
}
