use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use sqlx::PgPool;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use super::models::{Enrollment, EnrollmentStatus, NewEnrollment, TransitionOutcome};
use super::store::{EnrollmentService, EnrollmentStore};
use super::tracker::{CycleReport, EnrollmentTracker};
use crate::error::{AppError, AppResult};
use crate::extractor::AuthUser;
use crate::payments::{CheckoutRequest, NewCustomer, PaymentGateway};

/// Intake submission: stores a pending enrollment and opens its checkout at the gateway.
pub async fn create_enrollment(
    Extension(pool): Extension<PgPool>,
    Extension(gateway): Extension<Arc<dyn PaymentGateway>>,
    Path(tenant_id): Path<i32>,
    Json(payload): Json<NewEnrollment>,
) -> AppResult<(StatusCode, Json<Enrollment>)> {
    payload.validate().map_err(AppError::BadRequest)?;

    let service = EnrollmentService::new(pool);
    if !service.tenant_is_active(tenant_id).await? {
        return Err(AppError::NotFound);
    }
    let enrollment = service.create_enrollment(tenant_id, &payload).await?;
    let reference = enrollment.id.to_string();

    let customer = gateway
        .create_customer(&NewCustomer {
            name: enrollment.contact_name.clone(),
            email: enrollment.contact_email.clone(),
            phone: enrollment.contact_phone.clone(),
            document_number: enrollment.document_number.clone(),
            external_reference: reference.clone(),
        })
        .await
        .map_err(|err| {
            warn!(?err, tenant_id, enrollment_id = %enrollment.id, "gateway customer creation failed");
            AppError::Gateway(err)
        })?;
    service.attach_customer(enrollment.id, &customer.id).await?;

    let checkout = gateway
        .create_checkout_link(&CheckoutRequest::installment(
            format!("Enrollment {}", enrollment.course_id),
            enrollment.amount_cents,
            enrollment.installments,
            reference,
        ))
        .await
        .map_err(|err| {
            warn!(?err, tenant_id, enrollment_id = %enrollment.id, "gateway checkout creation failed");
            AppError::Gateway(err)
        })?;

    service
        .record_checkout(enrollment.id, &customer.id, &checkout.url)
        .await?;
    let mut refreshed = service
        .get_enrollment(tenant_id, enrollment.id)
        .await?
        .ok_or(AppError::NotFound)?;
    match service
        .transition(&refreshed, EnrollmentStatus::WaitingPayment, Utc::now())
        .await?
    {
        TransitionOutcome::Applied { .. } => info!(
            tenant_id,
            enrollment_id = %refreshed.id,
            customer_id = %customer.id,
            "enrollment intake awaiting payment"
        ),
        TransitionOutcome::Stale => warn!(
            tenant_id,
            enrollment_id = %refreshed.id,
            "enrollment changed by a payment webhook before intake finished"
        ),
    }
    refreshed = service
        .get_enrollment(tenant_id, enrollment.id)
        .await?
        .ok_or(AppError::NotFound)?;

    Ok((StatusCode::CREATED, Json(refreshed)))
}

pub async fn get_enrollment(
    Extension(pool): Extension<PgPool>,
    Path((tenant_id, id)): Path<(i32, Uuid)>,
) -> AppResult<Json<Enrollment>> {
    let service = EnrollmentService::new(pool);
    service
        .get_enrollment(tenant_id, id)
        .await?
        .map(Json)
        .ok_or(AppError::NotFound)
}

/// Operator trigger for an immediate tracker cycle.
pub async fn run_tracker(
    Extension(tracker): Extension<Arc<EnrollmentTracker>>,
    user: AuthUser,
) -> AppResult<Json<CycleReport>> {
    user.require_role("admin")?;
    info!(user_id = user.user_id, "manual enrollment tracker run requested");
    tracker
        .run_cycle(Utc::now())
        .await
        .map(Json)
        .ok_or_else(|| AppError::Conflict("enrollment tracker cycle already running".into()))
}
