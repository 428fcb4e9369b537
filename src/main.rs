//! Accolade - student achievement records service

use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use accolade::{
    achievement::spawn_reconcile_task,
    auth::{revocation::spawn_cleanup_task, MemoryRevocationList},
    config::Args,
    db::{AccountStore, MongoAchievementStore, MongoClient, RelationalDb, SqliteReferenceStore, SqliteStudentDirectory},
    server::{self, AppState, Backends},
    store::{AchievementStore, MemoryAchievementStore, MemoryReferenceStore, ReferenceStore},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    let args = Args::parse();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("accolade={},info", args.log_level).into());
    if args.json_logs() {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    if let Err(e) = args.validate() {
        error!("Configuration error: {}", e);
        std::process::exit(1);
    }

    info!("======================================");
    info!("  Accolade - student achievements");
    info!("======================================");
    info!("Listen: {}", args.listen);
    info!("Mode: {}", if args.dev_mode { "DEVELOPMENT" } else { "PRODUCTION" });
    info!("MongoDB: {} (db {})", args.mongodb_uri, args.mongodb_db);
    info!("SQLite: {:?}", args.database_path);
    info!("Uploads: {:?}", args.upload_dir);
    info!("======================================");

    let db = RelationalDb::open(&args.database_path)?;
    let accounts = AccountStore::new(db.clone());

    if let Some((email, password)) = args.admin_credentials() {
        if accounts.ensure_admin(email, password).await? {
            info!("Created admin account {}", email);
        }
    }

    // MongoDB is required in production; dev mode falls back to memory
    let (documents, references, document_backend): (
        Arc<dyn AchievementStore>,
        Arc<dyn ReferenceStore>,
        &'static str,
    ) = match MongoClient::new(&args.mongodb_uri, &args.mongodb_db, args.store_timeout_ms).await {
        Ok(client) => {
            info!("MongoDB connected successfully");
            (
                Arc::new(MongoAchievementStore::new(&client).await?),
                Arc::new(SqliteReferenceStore::new(db.clone())),
                "mongodb",
            )
        }
        Err(e) if args.dev_mode => {
            warn!("MongoDB connection failed (dev mode, using in-memory stores): {}", e);
            (
                Arc::new(MemoryAchievementStore::new()),
                Arc::new(MemoryReferenceStore::new()),
                "memory",
            )
        }
        Err(e) => {
            error!("MongoDB connection failed: {}", e);
            std::process::exit(1);
        }
    };

    let backends = Backends {
        documents,
        references,
        students: Arc::new(SqliteStudentDirectory::new(db)),
        accounts,
        document_backend,
    };

    let revocations = Arc::new(MemoryRevocationList::new());
    spawn_cleanup_task(Arc::clone(&revocations), Duration::from_secs(60));

    let state = Arc::new(AppState::new(args, backends, revocations)?);

    match state.args.reconcile_interval() {
        Some(interval) => spawn_reconcile_task(Arc::clone(&state.reconciler), interval),
        None => info!("Reconcile task disabled"),
    }

    server::run(state).await?;
    Ok(())
}
