use axum::{
    body::Bytes,
    extract::Extension,
    http::{HeaderMap, StatusCode},
};
use chrono::Utc;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use sqlx::PgPool;
use tracing::{info, warn};

use crate::enrollments::{EnrollmentService, EnrollmentStatus, EnrollmentStore, TransitionOutcome};
use crate::error::{AppError, AppResult};

pub const SIGNATURE_HEADER: &str = "x-webhook-signature";

/// Shared secret for payment webhook signatures; `None` disables verification.
#[derive(Clone, Debug, Default)]
pub struct WebhookSecret(pub Option<String>);

/// key: webhooks-payments -> gateway event envelope
#[derive(Debug, Deserialize)]
pub struct PaymentWebhookRequest {
    pub event: String,
    #[serde(default)]
    pub payment: Option<PaymentWebhookPayment>,
}

#[derive(Debug, Deserialize)]
pub struct PaymentWebhookPayment {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub customer: Option<String>,
}

/// Status a gateway event moves an enrollment to, if any.
pub fn target_status(event: &str) -> Option<EnrollmentStatus> {
    match event {
        "PAYMENT_CREATED" => Some(EnrollmentStatus::WaitingPayment),
        "PAYMENT_CONFIRMED" => Some(EnrollmentStatus::PaymentConfirmed),
        "PAYMENT_RECEIVED" => Some(EnrollmentStatus::Completed),
        "PAYMENT_REFUSED" | "PAYMENT_FAILED" => Some(EnrollmentStatus::Failed),
        _ => None,
    }
}

/// Checks a `sha256=<hex>` HMAC of `body`.
pub fn verify_signature(secret: &str, signature: Option<&str>, body: &[u8]) -> AppResult<()> {
    let signature =
        signature.ok_or_else(|| AppError::BadRequest("Missing signature".into()))?;
    let digest = signature
        .strip_prefix("sha256=")
        .and_then(|value| hex::decode(value).ok())
        .ok_or_else(|| AppError::BadRequest("Bad signature".into()))?;
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
        .map_err(|err| AppError::Internal(anyhow::anyhow!("invalid webhook secret: {err}")))?;
    mac.update(body);
    mac.verify_slice(&digest).map_err(|_| AppError::Unauthorized)
}

/// Applies payment gateway events to the enrollment they reference.
///
/// Unknown events, unknown references and transitions the lifecycle forbids are
/// acknowledged with `200` so the gateway does not redeliver them.
pub async fn payment_webhook(
    Extension(pool): Extension<PgPool>,
    Extension(secret): Extension<WebhookSecret>,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<StatusCode> {
    if let Some(secret) = secret.0.as_deref() {
        let signature = headers
            .get(SIGNATURE_HEADER)
            .and_then(|value| value.to_str().ok());
        verify_signature(secret, signature, &body)?;
    }

    let payload: PaymentWebhookRequest = serde_json::from_slice(&body)
        .map_err(|err| AppError::BadRequest(format!("invalid webhook payload: {err}")))?;

    let Some(target) = target_status(&payload.event) else {
        return Ok(StatusCode::OK);
    };
    let Some(payment) = payload.payment else {
        return Ok(StatusCode::OK);
    };

    let service = EnrollmentService::new(pool);
    let Some(enrollment) = service
        .find_by_gateway_reference(payment.id.as_deref(), payment.customer.as_deref())
        .await?
    else {
        warn!(
            event = %payload.event,
            payment_id = ?payment.id,
            customer_id = ?payment.customer,
            "payment webhook references no enrollment"
        );
        return Ok(StatusCode::OK);
    };

    if let Some(payment_id) = payment.id.as_deref() {
        if enrollment.gateway_payment_id.is_none() {
            service.attach_payment(enrollment.id, payment_id).await?;
        }
    }

    if enrollment.status == target {
        return Ok(StatusCode::OK);
    }
    if !enrollment.status.can_transition_to(target) {
        info!(
            enrollment_id = %enrollment.id,
            status = %enrollment.status,
            event = %payload.event,
            "payment webhook ignored for enrollment lifecycle state"
        );
        return Ok(StatusCode::OK);
    }

    match service.transition(&enrollment, target, Utc::now()).await? {
        TransitionOutcome::Applied { .. } => info!(
            tenant_id = enrollment.tenant_id,
            enrollment_id = %enrollment.id,
            from = %enrollment.status,
            to = %target,
            "enrollment status updated from payment webhook"
        ),
        TransitionOutcome::Stale => warn!(
            enrollment_id = %enrollment.id,
            event = %payload.event,
            "enrollment changed while applying payment webhook"
        ),
    }
    Ok(StatusCode::OK)
}
