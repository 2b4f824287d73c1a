use axum::{routing::get, Extension, Router};
use axum_prometheus::PrometheusMetricLayer;
use enrollment_service::enrollments::{
    spawn_enrollment_tracker, EnrollmentService, EnrollmentStore, EnrollmentTracker,
    LifecyclePolicy, LifecycleThresholds,
};
use enrollment_service::payments::{HttpPaymentGateway, PaymentGateway};
use enrollment_service::routes::api_routes;
use enrollment_service::webhooks::WebhookSecret;
use sqlx::postgres::PgPoolOptions;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{fmt, EnvFilter};

async fn root() -> &'static str {
    "Enrollment Service API"
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .json()
        .init();

    dotenvy::dotenv().ok();
    // Fail fast if the JWT secret is missing
    let _ = enrollment_service::JWT_SECRET.as_str();
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(enrollment_service::DATABASE_URL.as_str())
        .await?;

    if let Err(error) = sqlx::migrate!().run(&pool).await {
        if *enrollment_service::ALLOW_MIGRATION_FAILURE {
            tracing::warn!(
                ?error,
                "Database migrations failed but continuing due to ALLOW_MIGRATION_FAILURE"
            );
        } else {
            return Err(Box::new(error) as Box<dyn std::error::Error>);
        }
    }

    let gateway: Arc<dyn PaymentGateway> = Arc::new(HttpPaymentGateway::from_env()?);
    let store: Arc<dyn EnrollmentStore> = Arc::new(EnrollmentService::new(pool.clone()));
    let thresholds = LifecycleThresholds::from_env();
    tracing::info!(?thresholds, "enrollment lifecycle thresholds loaded");
    let tracker = Arc::new(EnrollmentTracker::new(
        store,
        gateway.clone(),
        LifecyclePolicy::new(thresholds),
    ));

    if *enrollment_service::ENROLLMENT_TRACKER_ENABLED {
        let interval = Duration::from_secs(*enrollment_service::ENROLLMENT_TRACKER_INTERVAL_SECS);
        spawn_enrollment_tracker(tracker.clone(), interval);
        tracing::info!(interval_secs = interval.as_secs(), "enrollment tracker scheduled");
    } else {
        tracing::warn!("enrollment tracker disabled via ENROLLMENT_TRACKER_ENABLED");
    }

    let (prometheus_layer, metrics_handle) = PrometheusMetricLayer::pair();
    let app = Router::new()
        .route("/", get(root))
        .route(
            "/metrics",
            get(move || async move { metrics_handle.render() }),
        )
        .merge(api_routes())
        .layer(prometheus_layer)
        .layer(Extension(pool.clone()))
        .layer(Extension(gateway))
        .layer(Extension(tracker))
        .layer(Extension(WebhookSecret(
            enrollment_service::PAYMENT_WEBHOOK_SECRET.clone(),
        )));

    let addr: SocketAddr = format!(
        "{}:{}",
        enrollment_service::BIND_ADDRESS.as_str(),
        *enrollment_service::BIND_PORT
    )
    .parse()
    .map_err(|error| Box::new(error) as Box<dyn std::error::Error>)?;
    tracing::info!(%addr, "Listening for incoming connections");
    axum::Server::bind(&addr)
        .serve(app.into_make_service())
        .await?;

    Ok(())
}
