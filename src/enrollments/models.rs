use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

/// key: enrollment-status -> closed lifecycle of a simplified enrollment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnrollmentStatus {
    Pending,
    WaitingPayment,
    PaymentConfirmed,
    Completed,
    Suspended,
    Cancelled,
    Failed,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LifecycleError {
    #[error("illegal enrollment transition from `{from}` to `{to}`")]
    IllegalTransition {
        from: EnrollmentStatus,
        to: EnrollmentStatus,
    },
    #[error("unknown enrollment status `{0}`")]
    UnknownStatus(String),
}

impl EnrollmentStatus {
    pub const ALL: [EnrollmentStatus; 7] = [
        EnrollmentStatus::Pending,
        EnrollmentStatus::WaitingPayment,
        EnrollmentStatus::PaymentConfirmed,
        EnrollmentStatus::Completed,
        EnrollmentStatus::Suspended,
        EnrollmentStatus::Cancelled,
        EnrollmentStatus::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EnrollmentStatus::Pending => "pending",
            EnrollmentStatus::WaitingPayment => "waiting_payment",
            EnrollmentStatus::PaymentConfirmed => "payment_confirmed",
            EnrollmentStatus::Completed => "completed",
            EnrollmentStatus::Suspended => "suspended",
            EnrollmentStatus::Cancelled => "cancelled",
            EnrollmentStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, EnrollmentStatus::Cancelled)
    }

    /// Forward-only transition table. Suspended records are never reactivated.
    pub fn can_transition_to(&self, next: EnrollmentStatus) -> bool {
        use EnrollmentStatus::*;
        match self {
            Pending => matches!(
                next,
                WaitingPayment | PaymentConfirmed | Completed | Suspended | Cancelled | Failed
            ),
            WaitingPayment => matches!(
                next,
                PaymentConfirmed | Completed | Suspended | Cancelled | Failed
            ),
            PaymentConfirmed => matches!(next, Completed | Suspended | Cancelled),
            Completed => matches!(next, Suspended | Cancelled),
            Suspended => matches!(next, Cancelled),
            Failed => matches!(next, Cancelled),
            Cancelled => false,
        }
    }

    pub fn transition(self, next: EnrollmentStatus) -> Result<EnrollmentStatus, LifecycleError> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(LifecycleError::IllegalTransition {
                from: self,
                to: next,
            })
        }
    }

    /// Status mirrored onto the formal enrollment when this status is reached.
    pub fn formal_counterpart(&self) -> Option<FormalEnrollmentStatus> {
        match self {
            EnrollmentStatus::Suspended => Some(FormalEnrollmentStatus::Suspended),
            EnrollmentStatus::Cancelled => Some(FormalEnrollmentStatus::Cancelled),
            _ => None,
        }
    }
}

impl fmt::Display for EnrollmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EnrollmentStatus {
    type Err = LifecycleError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        EnrollmentStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == value)
            .ok_or_else(|| LifecycleError::UnknownStatus(value.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FormalEnrollmentStatus {
    Active,
    Completed,
    Suspended,
    Cancelled,
}

impl FormalEnrollmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FormalEnrollmentStatus::Active => "active",
            FormalEnrollmentStatus::Completed => "completed",
            FormalEnrollmentStatus::Suspended => "suspended",
            FormalEnrollmentStatus::Cancelled => "cancelled",
        }
    }
}

impl FromStr for FormalEnrollmentStatus {
    type Err = LifecycleError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "active" => Ok(FormalEnrollmentStatus::Active),
            "completed" => Ok(FormalEnrollmentStatus::Completed),
            "suspended" => Ok(FormalEnrollmentStatus::Suspended),
            "cancelled" => Ok(FormalEnrollmentStatus::Cancelled),
            other => Err(LifecycleError::UnknownStatus(other.to_string())),
        }
    }
}

/// key: tenant-model -> institution scanned by the tracker
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Tenant {
    pub id: i32,
    pub name: String,
}

/// key: enrollment-model -> intake record driving the payment flow
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Enrollment {
    pub id: Uuid,
    pub tenant_id: i32,
    pub course_id: i32,
    pub student_id: Option<i32>,
    pub contact_name: String,
    pub contact_email: String,
    pub contact_phone: Option<String>,
    pub document_number: Option<String>,
    pub amount_cents: i64,
    pub installments: i32,
    pub gateway_customer_id: Option<String>,
    pub gateway_payment_id: Option<String>,
    pub checkout_url: Option<String>,
    pub status: EnrollmentStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub suspended_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormalEnrollment {
    pub id: Uuid,
    pub tenant_id: i32,
    pub student_id: i32,
    pub course_id: i32,
    pub status: FormalEnrollmentStatus,
    pub updated_at: DateTime<Utc>,
}

/// key: enrollment-intake -> validated submission
#[derive(Debug, Clone, Deserialize)]
pub struct NewEnrollment {
    pub course_id: i32,
    #[serde(default)]
    pub student_id: Option<i32>,
    pub contact_name: String,
    pub contact_email: String,
    #[serde(default)]
    pub contact_phone: Option<String>,
    #[serde(default)]
    pub document_number: Option<String>,
    pub amount_cents: i64,
    #[serde(default = "default_installments")]
    pub installments: i32,
}

fn default_installments() -> i32 {
    1
}

impl NewEnrollment {
    pub fn validate(&self) -> Result<(), String> {
        if self.contact_name.trim().is_empty() {
            return Err("contact_name required".into());
        }
        let email = self.contact_email.trim();
        if email.is_empty() || !email.contains('@') {
            return Err("contact_email must be a valid address".into());
        }
        if self.amount_cents <= 0 {
            return Err("amount_cents must be positive".into());
        }
        if !(1..=24).contains(&self.installments) {
            return Err("installments must be between 1 and 24".into());
        }
        Ok(())
    }
}

/// Result of a compare-and-set status write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionOutcome {
    Applied { formal_updated: bool },
    /// The stored status no longer matched what was read; nothing was written.
    Stale,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancelled_is_terminal() {
        for next in EnrollmentStatus::ALL {
            assert!(!EnrollmentStatus::Cancelled.can_transition_to(next));
        }
        assert!(EnrollmentStatus::Cancelled.is_terminal());
    }

    #[test]
    fn suspended_cannot_be_reactivated() {
        let err = EnrollmentStatus::Suspended
            .transition(EnrollmentStatus::PaymentConfirmed)
            .unwrap_err();
        assert_eq!(
            err,
            LifecycleError::IllegalTransition {
                from: EnrollmentStatus::Suspended,
                to: EnrollmentStatus::PaymentConfirmed,
            }
        );
        assert_eq!(
            EnrollmentStatus::Suspended.transition(EnrollmentStatus::Cancelled),
            Ok(EnrollmentStatus::Cancelled)
        );
    }

    #[test]
    fn payment_flow_moves_forward_only() {
        assert!(EnrollmentStatus::Pending.can_transition_to(EnrollmentStatus::WaitingPayment));
        assert!(EnrollmentStatus::WaitingPayment.can_transition_to(EnrollmentStatus::Completed));
        assert!(EnrollmentStatus::PaymentConfirmed.can_transition_to(EnrollmentStatus::Completed));
        assert!(!EnrollmentStatus::Completed.can_transition_to(EnrollmentStatus::WaitingPayment));
        assert!(!EnrollmentStatus::PaymentConfirmed.can_transition_to(EnrollmentStatus::Pending));
    }

    #[test]
    fn status_strings_round_trip() {
        for status in EnrollmentStatus::ALL {
            assert_eq!(status.as_str().parse::<EnrollmentStatus>(), Ok(status));
        }
        assert!(matches!(
            "archived".parse::<EnrollmentStatus>(),
            Err(LifecycleError::UnknownStatus(_))
        ));
    }

    #[test]
    fn only_suspension_and_cancellation_cascade() {
        assert_eq!(
            EnrollmentStatus::Suspended.formal_counterpart(),
            Some(FormalEnrollmentStatus::Suspended)
        );
        assert_eq!(
            EnrollmentStatus::Cancelled.formal_counterpart(),
            Some(FormalEnrollmentStatus::Cancelled)
        );
        assert_eq!(EnrollmentStatus::Completed.formal_counterpart(), None);
    }

    #[test]
    fn intake_validation_rejects_bad_input() {
        let mut submission = NewEnrollment {
            course_id: 4,
            student_id: None,
            contact_name: "Ana".into(),
            contact_email: "ana@example.com".into(),
            contact_phone: None,
            document_number: None,
            amount_cents: 49_900,
            installments: 3,
        };
        assert!(submission.validate().is_ok());

        submission.contact_email = "not-an-email".into();
        assert!(submission.validate().is_err());

        submission.contact_email = "ana@example.com".into();
        submission.installments = 0;
        assert!(submission.validate().is_err());

        submission.installments = 1;
        submission.amount_cents = 0;
        assert!(submission.validate().is_err());
    }
}
