use crate::cli::ServeArgs;
use crate::infra::{listing_directory, queue_service, session_cache, AppState, QueueService};
use crate::routes::with_application_routes;
use axum::Extension;
use axum_prometheus::PrometheusMetricLayer;
use chrono::Utc;
use rental_queue::config::AppConfig;
use rental_queue::error::AppError;
use rental_queue::sessions::SessionCache;
use rental_queue::telemetry;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

pub(crate) async fn run(mut args: ServeArgs) -> Result<(), AppError> {
    let mut config = AppConfig::load()?;

    if let Some(host) = args.host.take() {
        config.server.host = host;
    }
    if let Some(port) = args.port.take() {
        config.server.port = port;
    }

    telemetry::init(&config.telemetry, config.environment)?;

    let (prometheus_layer, prometheus_handle) = PrometheusMetricLayer::pair();
    let readiness_flag = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let app_state = AppState {
        readiness: readiness_flag.clone(),
        metrics: Arc::new(prometheus_handle),
    };

    let directory = listing_directory(&config)?;
    info!(listings = directory.len(), "listing directory loaded");
    let service = queue_service(&config, directory);
    let sessions = session_cache(&config, &args.sessions);

    if let Some(interval) = config.queue.reconcile_interval() {
        tokio::spawn(maintenance_loop(service.clone(), sessions.clone(), interval));
    }

    let app = with_application_routes(service, sessions)
        .layer(Extension(app_state))
        .layer(prometheus_layer);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    readiness_flag.store(true, Ordering::Release);

    info!(?config.environment, %addr, "rental application queue ready");

    axum::serve(listener, app).await?;
    Ok(())
}

/// Periodic queue sweep plus expired session cleanup.
async fn maintenance_loop(service: Arc<QueueService>, sessions: Arc<SessionCache>, every: Duration) {
    let mut ticker = tokio::time::interval(every);
    // First tick fires immediately.
    ticker.tick().await;
    loop {
        ticker.tick().await;
        match service.sweep() {
            Ok(report) => info!(
                audited = report.audited,
                reconciled = report.reconciled,
                conflicts = report.conflicts,
                "queue sweep finished"
            ),
            Err(err) => warn!(error = %err, "queue sweep failed"),
        }
        let purged = sessions.purge_expired(Utc::now());
        if purged > 0 {
            info!(purged, "expired sessions purged");
        }
    }
}
