use axum::{
    routing::{get, post},
    Router,
};

use crate::{enrollments::api, webhooks};

pub fn api_routes() -> Router {
    Router::new()
        .route(
            "/api/tenants/:tenant_id/enrollments",
            post(api::create_enrollment),
        )
        .route(
            "/api/tenants/:tenant_id/enrollments/:id",
            get(api::get_enrollment),
        )
        .route("/api/webhooks/payments", post(webhooks::payment_webhook))
        .route(
            "/api/admin/enrollment-tracker/run",
            post(api::run_tracker),
        )
}
