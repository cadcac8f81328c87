use crate::cli::ServeArgs;
use crate::infra::{sample_store, AppState};
use crate::routes::router;
use axum_prometheus::PrometheusMetricLayer;
use school_admissions::config::AppConfig;
use school_admissions::error::AppError;
use school_admissions::store::{AdmissionsStore, ChangeBus, RestStore};
use school_admissions::telemetry;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::{info, warn};

pub(crate) async fn run(mut args: ServeArgs) -> Result<(), AppError> {
    let mut config = AppConfig::load()?;

    if let Some(host) = args.host.take() {
        config.server.host = host;
    }
    if let Some(port) = args.port.take() {
        config.server.port = port;
    }

    telemetry::init(&config.telemetry)?;

    let changes = ChangeBus::default();
    let store: Arc<dyn AdmissionsStore> = if args.sample_data {
        warn!("serving in-memory sample data instead of the configured backend");
        Arc::new(sample_store(changes.clone()))
    } else {
        Arc::new(RestStore::new(&config.backend)?)
    };

    let (prometheus_layer, prometheus_handle) = PrometheusMetricLayer::pair();
    let state = AppState::new(store, changes, config.resolver, prometheus_handle)
        .with_webhook_secret(config.backend.webhook_secret.clone());
    let readiness_flag = state.readiness.clone();

    let app = router(state).layer(prometheus_layer);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    readiness_flag.store(true, Ordering::Release);

    info!(
        ?config.environment,
        %addr,
        backend = %config.backend.url,
        poll_secs = config.resolver.poll_interval.as_secs(),
        "school admissions service ready"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "unable to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}
