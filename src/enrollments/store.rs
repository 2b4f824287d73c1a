use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use super::models::{
    Enrollment, EnrollmentStatus, FormalEnrollment, NewEnrollment, Tenant, TransitionOutcome,
};

/// key: enrollment-store -> persistence seam used by the tracker and webhooks
#[async_trait]
pub trait EnrollmentStore: Send + Sync {
    async fn active_tenants(&self) -> Result<Vec<Tenant>>;

    async fn enrollments_by_status(
        &self,
        tenant_id: i32,
        statuses: &[EnrollmentStatus],
    ) -> Result<Vec<Enrollment>>;

    /// Moves `enrollment` to `to` if its stored status still equals `enrollment.status`,
    /// mirroring suspension and cancellation onto the matching formal enrollment.
    async fn transition(
        &self,
        enrollment: &Enrollment,
        to: EnrollmentStatus,
        at: DateTime<Utc>,
    ) -> Result<TransitionOutcome>;
}

const ENROLLMENT_COLUMNS: &str = r#"
    id,
    tenant_id,
    course_id,
    student_id,
    contact_name,
    contact_email,
    contact_phone,
    document_number,
    amount_cents,
    installments,
    gateway_customer_id,
    gateway_payment_id,
    checkout_url,
    status,
    created_at,
    updated_at,
    completed_at,
    suspended_at,
    cancelled_at
"#;

/// key: enrollment-service -> Postgres-backed enrollment lifecycle
#[derive(Clone)]
pub struct EnrollmentService {
    pool: PgPool,
}

impl EnrollmentService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn tenant_is_active(&self, tenant_id: i32) -> Result<bool> {
        let active: Option<bool> = sqlx::query_scalar("SELECT active FROM tenants WHERE id = $1")
            .bind(tenant_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(active.unwrap_or(false))
    }

    pub async fn create_enrollment(
        &self,
        tenant_id: i32,
        submission: &NewEnrollment,
    ) -> Result<Enrollment> {
        let query = format!(
            r#"
            INSERT INTO enrollments (
                id,
                tenant_id,
                course_id,
                student_id,
                contact_name,
                contact_email,
                contact_phone,
                document_number,
                amount_cents,
                installments,
                status
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, 'pending')
            RETURNING {ENROLLMENT_COLUMNS}
            "#
        );
        let row = sqlx::query(&query)
            .bind(Uuid::new_v4())
            .bind(tenant_id)
            .bind(submission.course_id)
            .bind(submission.student_id)
            .bind(submission.contact_name.trim())
            .bind(submission.contact_email.trim())
            .bind(submission.contact_phone.as_deref())
            .bind(submission.document_number.as_deref())
            .bind(submission.amount_cents)
            .bind(submission.installments)
            .fetch_one(&self.pool)
            .await?;
        enrollment_from_row(&row)
    }

    pub async fn get_enrollment(&self, tenant_id: i32, id: Uuid) -> Result<Option<Enrollment>> {
        let query =
            format!("SELECT {ENROLLMENT_COLUMNS} FROM enrollments WHERE tenant_id = $1 AND id = $2");
        let row = sqlx::query(&query)
            .bind(tenant_id)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(enrollment_from_row).transpose()
    }

    /// Finds the enrollment a gateway event refers to, preferring the payment id.
    pub async fn find_by_gateway_reference(
        &self,
        payment_id: Option<&str>,
        customer_id: Option<&str>,
    ) -> Result<Option<Enrollment>> {
        if let Some(payment_id) = payment_id {
            let query = format!(
                "SELECT {ENROLLMENT_COLUMNS} FROM enrollments WHERE gateway_payment_id = $1 LIMIT 1"
            );
            let row = sqlx::query(&query)
                .bind(payment_id)
                .fetch_optional(&self.pool)
                .await?;
            if let Some(row) = row {
                return enrollment_from_row(&row).map(Some);
            }
        }

        let Some(customer_id) = customer_id else {
            return Ok(None);
        };
        let query = format!(
            r#"
            SELECT {ENROLLMENT_COLUMNS} FROM enrollments
            WHERE gateway_customer_id = $1
            ORDER BY created_at DESC
            LIMIT 1
            "#
        );
        let row = sqlx::query(&query)
            .bind(customer_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(enrollment_from_row).transpose()
    }

    pub async fn record_checkout(
        &self,
        enrollment_id: Uuid,
        customer_id: &str,
        checkout_url: &str,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE enrollments
            SET gateway_customer_id = $2,
                checkout_url = $3,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(enrollment_id)
        .bind(customer_id)
        .bind(checkout_url)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn attach_customer(&self, enrollment_id: Uuid, customer_id: &str) -> Result<()> {
        sqlx::query(
            "UPDATE enrollments SET gateway_customer_id = $2, updated_at = NOW() WHERE id = $1",
        )
        .bind(enrollment_id)
        .bind(customer_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn attach_payment(&self, enrollment_id: Uuid, payment_id: &str) -> Result<()> {
        sqlx::query(
            "UPDATE enrollments SET gateway_payment_id = $2 WHERE id = $1 AND gateway_payment_id IS NULL",
        )
        .bind(enrollment_id)
        .bind(payment_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn formal_enrollment(
        &self,
        tenant_id: i32,
        student_id: i32,
        course_id: i32,
    ) -> Result<Option<FormalEnrollment>> {
        let row = sqlx::query(
            r#"
            SELECT id, tenant_id, student_id, course_id, status, updated_at
            FROM formal_enrollments
            WHERE tenant_id = $1 AND student_id = $2 AND course_id = $3
            "#,
        )
        .bind(tenant_id)
        .bind(student_id)
        .bind(course_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let status: String = row.get("status");
        Ok(Some(FormalEnrollment {
            id: row.get("id"),
            tenant_id: row.get("tenant_id"),
            student_id: row.get("student_id"),
            course_id: row.get("course_id"),
            status: status.parse()?,
            updated_at: row.get("updated_at"),
        }))
    }
}

#[async_trait]
impl EnrollmentStore for EnrollmentService {
    async fn active_tenants(&self) -> Result<Vec<Tenant>> {
        let rows = sqlx::query("SELECT id, name FROM tenants WHERE active = TRUE ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .into_iter()
            .map(|row| Tenant {
                id: row.get("id"),
                name: row.get("name"),
            })
            .collect())
    }

    async fn enrollments_by_status(
        &self,
        tenant_id: i32,
        statuses: &[EnrollmentStatus],
    ) -> Result<Vec<Enrollment>> {
        let statuses: Vec<String> = statuses.iter().map(|s| s.as_str().to_string()).collect();
        let query = format!(
            r#"
            SELECT {ENROLLMENT_COLUMNS} FROM enrollments
            WHERE tenant_id = $1 AND status = ANY($2)
            ORDER BY created_at
            "#
        );
        let rows = sqlx::query(&query)
            .bind(tenant_id)
            .bind(&statuses)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(enrollment_from_row).collect()
    }

    async fn transition(
        &self,
        enrollment: &Enrollment,
        to: EnrollmentStatus,
        at: DateTime<Utc>,
    ) -> Result<TransitionOutcome> {
        enrollment.status.transition(to)?;

        let mut tx = self.pool.begin().await?;
        let updated = sqlx::query(
            r#"
            UPDATE enrollments
            SET status = $1,
                updated_at = $2,
                completed_at = CASE WHEN $1 = 'completed' THEN COALESCE(completed_at, $2) ELSE completed_at END,
                suspended_at = CASE WHEN $1 = 'suspended' THEN $2 ELSE suspended_at END,
                cancelled_at = CASE WHEN $1 = 'cancelled' THEN $2 ELSE cancelled_at END
            WHERE id = $3 AND tenant_id = $4 AND status = $5
            "#,
        )
        .bind(to.as_str())
        .bind(at)
        .bind(enrollment.id)
        .bind(enrollment.tenant_id)
        .bind(enrollment.status.as_str())
        .execute(&mut tx)
        .await?
        .rows_affected();

        if updated == 0 {
            tx.rollback().await?;
            return Ok(TransitionOutcome::Stale);
        }

        let mut formal_updated = false;
        if let (Some(formal_status), Some(student_id)) =
            (to.formal_counterpart(), enrollment.student_id)
        {
            let cascaded = sqlx::query(
                r#"
                UPDATE formal_enrollments
                SET status = $1, updated_at = $2
                WHERE tenant_id = $3
                  AND student_id = $4
                  AND course_id = $5
                  AND status <> 'cancelled'
                "#,
            )
            .bind(formal_status.as_str())
            .bind(at)
            .bind(enrollment.tenant_id)
            .bind(student_id)
            .bind(enrollment.course_id)
            .execute(&mut tx)
            .await?
            .rows_affected();
            formal_updated = cascaded > 0;
        }

        tx.commit().await?;
        Ok(TransitionOutcome::Applied { formal_updated })
    }
}

fn enrollment_from_row(row: &PgRow) -> Result<Enrollment> {
    let status: String = row.try_get("status")?;
    let status = status
        .parse::<EnrollmentStatus>()
        .map_err(|err| anyhow!("enrollment row has {err}"))?;
    Ok(Enrollment {
        id: row.try_get("id")?,
        tenant_id: row.try_get("tenant_id")?,
        course_id: row.try_get("course_id")?,
        student_id: row.try_get("student_id")?,
        contact_name: row.try_get("contact_name")?,
        contact_email: row.try_get("contact_email")?,
        contact_phone: row.try_get("contact_phone")?,
        document_number: row.try_get("document_number")?,
        amount_cents: row.try_get("amount_cents")?,
        installments: row.try_get("installments")?,
        gateway_customer_id: row.try_get("gateway_customer_id")?,
        gateway_payment_id: row.try_get("gateway_payment_id")?,
        checkout_url: row.try_get("checkout_url")?,
        status,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        completed_at: row.try_get("completed_at")?,
        suspended_at: row.try_get("suspended_at")?,
        cancelled_at: row.try_get("cancelled_at")?,
    })
}
