use actix_web::{web, App, HttpResponse, HttpServer, Responder};
use anyhow::{anyhow, Context, Result};
use resilience::{database_config, with_retry};
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{info, warn};

use stream_session_service::config::{Config, StoreKind};
use stream_session_service::workers::counter_reconciler::{self, ReconcilerConfig};
use stream_session_service::{
    db, logging, metrics, MemoryStore, PgStore, SessionStore, StreamSessionCoordinator,
};

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {},
                    _ = terminate.recv() => {},
                }
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler; waiting for Ctrl+C only");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

#[derive(Clone)]
struct HealthState {
    pg: Option<PgStore>,
}

async fn health(state: web::Data<HealthState>) -> impl Responder {
    match &state.pg {
        Some(store) => match store.health_check().await {
            Ok(()) => HttpResponse::Ok().body("OK"),
            Err(e) => HttpResponse::ServiceUnavailable().body(format!("database: {}", e)),
        },
        None => HttpResponse::Ok().body("OK"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    logging::init_tracing();

    info!("Starting stream-session-service");

    let config = Config::from_env().context("Failed to load configuration")?;
    info!(
        env = %config.app.env,
        http_port = config.app.http_port,
        store = ?config.store,
        "Configuration loaded"
    );

    let lock_wait = config.coordinator.lock_wait();
    let (store, pg): (Arc<dyn SessionStore>, Option<PgStore>) =
        match (config.store, &config.database) {
            (StoreKind::Postgres, Some(database)) => {
                let pool = with_retry(&database_config().retry, || db::init_pool(database))
                    .await
                    .map_err(|e| anyhow!("Failed to initialize database: {}", e))?;
                info!("Database pool created and migrations applied");
                let store = PgStore::new(pool, lock_wait);
                (Arc::new(store.clone()), Some(store))
            }
            (StoreKind::Postgres, None) => {
                return Err(anyhow!("postgres store selected without database configuration"))
            }
            (StoreKind::Memory, _) => {
                warn!("Using the in-process session store; state is lost on restart");
                (Arc::new(MemoryStore::new()), None)
            }
        };

    let coordinator = Arc::new(StreamSessionCoordinator::new(store, &config.coordinator));
    info!("Stream session coordinator initialized");

    let mut join_set = JoinSet::new();

    let reconciler_config =
        ReconcilerConfig::from_interval_secs(config.coordinator.reconcile_interval_secs);
    let reconciler_coordinator = coordinator.clone();
    join_set.spawn(async move {
        counter_reconciler::start_counter_reconciler(reconciler_coordinator, reconciler_config)
            .await;
        Ok(())
    });

    let http_addr = format!("{}:{}", config.app.host, config.app.http_port);
    let health_state = HealthState { pg };
    let http_server = HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(health_state.clone()))
            .route("/health", web::get().to(health))
            .route("/ready", web::get().to(|| async { "READY" }))
            .route("/metrics", web::get().to(metrics::serve_metrics))
    })
    .bind(&http_addr)
    .context("Failed to bind HTTP server")?
    .disable_signals()
    .run();
    let server_handle = http_server.handle();

    join_set.spawn(async move {
        http_server
            .await
            .map_err(|e| anyhow!("HTTP server error: {}", e))
    });
    info!(addr = %http_addr, "HTTP health and metrics server started");

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("Shutdown signal received");
                break;
            }
            joined = join_set.join_next() => match joined {
                None => break,
                Some(Ok(Ok(()))) => info!("Task completed successfully"),
                Some(Ok(Err(e))) => {
                    tracing::error!("Task failed: {:#}", e);
                    return Err(e);
                }
                Some(Err(e)) => {
                    tracing::error!("Task panicked: {:#}", e);
                    return Err(anyhow!("Task panicked: {}", e));
                }
            }
        }
    }

    server_handle.stop(true).await;
    join_set.shutdown().await;

    info!("stream-session-service shut down");
    Ok(())
}
