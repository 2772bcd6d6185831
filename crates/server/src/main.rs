use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use tokio::signal;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use inkwell_core::{
    audit::{create_audit_system, AuditEvent, AuditStore, SqliteAuditStore},
    context::PipelineContext,
    create_authenticator,
    db::Database,
    load_config, validate_config, Authenticator, PipelineService, PipelineWorkers,
};
use inkwell_server::{create_router, AppState};

/// Application version
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Buffer size for audit event channel
const AUDIT_BUFFER_SIZE: usize = 1000;

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("Fatal error: {:#}", e);
        std::process::exit(1);
    }
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,tower_http=debug".into());
    let json = std::env::var("INKWELL_LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
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
}

async fn run() -> Result<()> {
    init_tracing();

    let config_path = std::env::var("INKWELL_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("config.toml"));

    info!("Loading configuration from {:?}", config_path);
    let config = load_config(&config_path)
        .with_context(|| format!("Failed to load config from {:?}", config_path))?;
    validate_config(&config).context("Configuration validation failed")?;

    info!("Configuration loaded successfully");
    info!("Auth method: {:?}", config.auth.method);
    info!("Database path: {:?}", config.database.path);
    info!("Object storage root: {:?}", config.storage.root);

    // Compute config hash for audit
    let config_json = serde_json::to_string(&config).unwrap_or_default();
    let config_hash = format!("{:x}", Sha256::digest(config_json.as_bytes()));
    let config_hash_short = &config_hash[..16];

    let authenticator: Arc<dyn Authenticator> = Arc::from(
        create_authenticator(&config.auth).context("Failed to create authenticator")?,
    );
    info!("Using authenticator: {}", authenticator.method_name());

    let db = Arc::new(
        Database::open(&config.database.path)
            .with_context(|| format!("Failed to open database {:?}", config.database.path))?,
    );
    let audit_store: Arc<dyn AuditStore> = Arc::new(SqliteAuditStore::new(db.clone()));

    let (audit_handle, audit_writer) =
        create_audit_system(Arc::clone(&audit_store), AUDIT_BUFFER_SIZE);
    let writer_handle = tokio::spawn(audit_writer.run());

    audit_handle
        .emit(AuditEvent::ServiceStarted {
            version: VERSION.to_string(),
            config_hash: config_hash_short.to_string(),
        })
        .await;
    info!("Emitted ServiceStarted audit event");

    let ctx = Arc::new(
        PipelineContext::builder(config.clone())
            .with_database(db)
            .with_audit(audit_handle.clone())
            .build()
            .context("Failed to assemble pipeline context")?,
    );
    info!(model = %config.llm.editorial_model, "Pipeline context ready");

    let workers = Arc::new(PipelineWorkers::new(ctx.clone()));
    workers.start().await;

    let gc_handle = spawn_kv_gc(ctx.clone());

    let service = Arc::new(PipelineService::new(ctx.clone()));
    let state = Arc::new(AppState::new(
        config.clone(),
        authenticator,
        service,
        audit_store,
        Some(workers.clone()),
    ));
    let app = create_router(state);

    let addr = SocketAddr::new(config.server.host, config.server.port);
    info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("Server error")?;

    info!("Server shutting down...");
    workers.stop().await;
    gc_handle.abort();

    audit_handle
        .emit(AuditEvent::ServiceStopped {
            reason: "graceful_shutdown".to_string(),
        })
        .await;

    // The writer exits once every AuditHandle clone is gone: the context
    // holds one, and the workers and the aborted GC task hold the context.
    let _ = gc_handle.await;
    drop(workers);
    drop(ctx);
    drop(audit_handle);

    if let Err(e) = writer_handle.await {
        warn!("Audit writer ended abnormally: {}", e);
    }
    info!("Audit writer stopped");

    Ok(())
}

/// Periodically drop expired status and report-lookup entries.
fn spawn_kv_gc(ctx: Arc<PipelineContext>) -> JoinHandle<()> {
    let period = Duration::from_secs(ctx.config.pipeline.gc_interval_secs);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            match ctx.kv.purge_expired() {
                Ok(0) => {}
                Ok(purged) => debug!(purged, "Purged expired key-value entries"),
                Err(e) => warn!(error = %e, "Key-value sweep failed"),
            }
        }
    })
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
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
