use actix_web::{middleware::Logger, web, App, HttpServer};
use distribution_service::handlers::health::{
    health_summary, liveness_check, readiness_summary, HealthState,
};
use distribution_service::{cache, db, jobs, AppState, Config, Stores};
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const TASK_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut terminate =
            signal(SignalKind::terminate()).expect("Failed to install SIGTERM handler");

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {},
            _ = terminate.recv() => {},
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    }
}

fn init_tracing(json_logs: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,actix_web=info,sqlx=warn".into());

    let registry = tracing_subscriber::registry().with(filter);
    if json_logs {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// Distribution Service
///
/// Scores posts from watch events, promotes them through TEST → SCALE → BLAST
/// and maintains creator trust and viewer interest profiles.
///
/// # Routes
///
/// - `/api/v1/posts/*` - Watch event ingestion
/// - `/api/v1/admin/algorithm` - Algorithm overview (admin token)
/// - `/api/v1/internal/*` - Maintenance and service-to-service hooks (shared secrets)
/// - `/api/v1/health*`, `/metrics`
#[actix_web::main]
async fn main() -> io::Result<()> {
    // Container healthcheck: `distribution-service healthcheck`
    {
        let mut args = std::env::args();
        let _bin = args.next();
        if let Some(cmd) = args.next() {
            if cmd == "healthcheck" || cmd == "healthcheck-http" {
                let port = std::env::var("DISTRIBUTION_SERVICE_PORT")
                    .unwrap_or_else(|_| "8090".to_string());
                let url = format!("http://127.0.0.1:{}/api/v1/health", port);
                match reqwest::Client::new().get(&url).send().await {
                    Ok(resp) if resp.status().is_success() => return Ok(()),
                    Ok(resp) => {
                        eprintln!("healthcheck HTTP status: {}", resp.status());
                        return Err(io::Error::new(io::ErrorKind::Other, "healthcheck failed"));
                    }
                    Err(e) => {
                        eprintln!("healthcheck HTTP error: {}", e);
                        return Err(io::Error::new(io::ErrorKind::Other, "healthcheck error"));
                    }
                }
            }
        }
    }

    let _ = dotenvy::dotenv();

    let config = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("ERROR: Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    init_tracing(config.app.json_logs);

    tracing::info!("Starting distribution-service v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!("Environment: {}", config.app.env);
    tracing::debug!(security = ?config.security, "Loaded security configuration");

    let db_pool = match db::create_pool(&config.database).await {
        Ok(pool) => pool,
        Err(e) => {
            tracing::error!("Database pool creation failed: {:#}", e);
            eprintln!("ERROR: Failed to create database pool: {}", e);
            std::process::exit(1);
        }
    };

    if config.database.run_migrations {
        if let Err(e) = db::run_migrations(&db_pool).await {
            tracing::error!("Database migration failed: {:#}", e);
            std::process::exit(1);
        }
    }

    let redis = match cache::connect(&config.cache.url).await {
        Ok(manager) => manager,
        Err(e) => {
            tracing::error!("Redis connection failed: {:#}", e);
            eprintln!("ERROR: Failed to connect to Redis: {}", e);
            std::process::exit(1);
        }
    };

    let settings = config.settings.clone();
    let stores = Stores::new(db_pool.clone(), redis.clone(), &settings);
    let state = AppState::build(stores, &settings);
    let tasks = state.tasks.clone();
    let maintenance = state.maintenance.clone();

    let app_state = web::Data::new(state);
    let health_state = web::Data::new(HealthState::new(db_pool.clone(), redis));
    let security = config.security.clone();

    let http_bind_address = format!("{}:{}", config.app.host, config.app.port);
    tracing::info!("Starting HTTP server at {}", http_bind_address);

    let server = HttpServer::new(move || {
        let security = security.clone();
        App::new()
            .app_data(app_state.clone())
            .app_data(health_state.clone())
            .wrap(Logger::default())
            .wrap(tracing_actix_web::TracingLogger::default())
            .route(
                "/metrics",
                web::get().to(distribution_service::metrics::serve_metrics),
            )
            .route("/api/v1/health", web::get().to(health_summary))
            .route("/api/v1/health/ready", web::get().to(readiness_summary))
            .route("/api/v1/health/live", web::get().to(liveness_check))
            .configure(move |cfg| distribution_service::configure_routes(cfg, &security))
    })
    .bind(&http_bind_address)?
    .run();

    let server_handle = server.handle();
    let (shutdown_tx, _) = broadcast::channel(1);

    let mut background: JoinSet<io::Result<()>> = JoinSet::new();

    background.spawn(async move {
        tracing::info!("HTTP server is running");
        server.await
    });

    if config.settings.maintenance.scheduler_enabled {
        let period = Duration::from_secs(config.settings.maintenance.scheduler_interval_secs);
        let scheduler_shutdown = shutdown_tx.subscribe();
        let runner = Arc::clone(&maintenance);
        background.spawn(async move {
            jobs::run_scheduler(runner, period, scheduler_shutdown).await;
            Ok(())
        });
    }

    let mut first_error: Option<io::Error> = None;

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            result = background.join_next() => {
                match result {
                    Some(Ok(Ok(_))) => {
                        tracing::info!("Background task completed");
                    }
                    Some(Ok(Err(e))) => {
                        tracing::error!("Task returned error: {}", e);
                        if first_error.is_none() {
                            first_error = Some(e);
                        }
                        let _ = shutdown_tx.send(());
                        server_handle.stop(true).await;
                        background.shutdown().await;
                        break;
                    }
                    Some(Err(e)) => {
                        tracing::error!("Task join error: {}", e);
                        if first_error.is_none() {
                            first_error = Some(io::Error::new(io::ErrorKind::Other, e.to_string()));
                        }
                        let _ = shutdown_tx.send(());
                        server_handle.stop(true).await;
                        background.shutdown().await;
                        break;
                    }
                    None => break,
                }
            }
            _ = &mut shutdown => {
                tracing::info!("Shutdown signal received");
                let _ = shutdown_tx.send(());
                server_handle.stop(true).await;
                background.shutdown().await;
                break;
            }
        }
    }

    if !tasks.drain(TASK_DRAIN_TIMEOUT).await {
        tracing::warn!(stats = ?tasks.stats(), "Background tasks still pending at shutdown");
    }

    tracing::info!("Distribution-service shutting down");

    match first_error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}
