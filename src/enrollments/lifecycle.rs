//! Time and payment driven lifecycle rules for simplified enrollments.
//!
//! Every automatic transition is one row of [`LifecyclePolicy::rules`]. An
//! enrollment is matched against the table once per cycle and the first rule
//! whose source status and clock threshold both match fires.

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;

use super::models::{Enrollment, EnrollmentStatus};
use crate::config;

/// The only moves the tracker is allowed to make.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleAction {
    Suspend,
    Cancel,
}

impl LifecycleAction {
    pub fn target(&self) -> EnrollmentStatus {
        match self {
            LifecycleAction::Suspend => EnrollmentStatus::Suspended,
            LifecycleAction::Cancel => EnrollmentStatus::Cancelled,
        }
    }
}

/// Which timestamp a rule measures its age from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleClock {
    SinceCreated,
    SinceUpdated,
    /// Earliest due date among the customer's overdue payments.
    OldestOverdue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SideEffect {
    None,
    /// Cancel every pending charge of the customer, plus the intake charge
    /// when the enrollment was never paid.
    CancelBilling,
    /// Cancel every pending charge of the customer.
    CancelFutureBilling,
}

#[derive(Debug, Clone, Serialize)]
pub struct LifecycleRule {
    pub name: &'static str,
    pub from: &'static [EnrollmentStatus],
    pub clock: RuleClock,
    pub threshold_days: i64,
    pub action: LifecycleAction,
    pub side_effect: SideEffect,
}

impl LifecycleRule {
    pub fn applies_to(&self, status: EnrollmentStatus) -> bool {
        self.from.contains(&status)
    }
}

/// key: enrollment-lifecycle-config -> rule thresholds in days
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LifecycleThresholds {
    pub first_payment_days: i64,
    pub suspension_timeout_days: i64,
    pub overdue_suspend_days: i64,
    pub overdue_cancel_days: i64,
    /// Days past a cancel rule's threshold during which a failed billing
    /// cancellation keeps the enrollment in place for the next cycle.
    pub billing_cancel_retry_days: i64,
}

impl Default for LifecycleThresholds {
    fn default() -> Self {
        Self {
            first_payment_days: 10,
            suspension_timeout_days: 30,
            overdue_suspend_days: 30,
            overdue_cancel_days: 90,
            billing_cancel_retry_days: 7,
        }
    }
}

impl LifecycleThresholds {
    pub fn from_env() -> Self {
        Self {
            first_payment_days: *config::ENROLLMENT_FIRST_PAYMENT_DAYS,
            suspension_timeout_days: *config::ENROLLMENT_SUSPENSION_TIMEOUT_DAYS,
            overdue_suspend_days: *config::ENROLLMENT_OVERDUE_SUSPEND_DAYS,
            overdue_cancel_days: *config::ENROLLMENT_OVERDUE_CANCEL_DAYS,
            billing_cancel_retry_days: *config::ENROLLMENT_BILLING_CANCEL_RETRY_DAYS,
        }
    }
}

const AWAITING_FIRST_PAYMENT: &[EnrollmentStatus] = &[
    EnrollmentStatus::Pending,
    EnrollmentStatus::WaitingPayment,
];
const PAID: &[EnrollmentStatus] = &[
    EnrollmentStatus::PaymentConfirmed,
    EnrollmentStatus::Completed,
];
const SUSPENDED: &[EnrollmentStatus] = &[EnrollmentStatus::Suspended];

#[derive(Debug, Clone)]
pub struct LifecyclePolicy {
    rules: Vec<LifecycleRule>,
    billing_cancel_retry_days: i64,
}

impl Default for LifecyclePolicy {
    fn default() -> Self {
        Self::new(LifecycleThresholds::default())
    }
}

impl LifecyclePolicy {
    pub fn new(thresholds: LifecycleThresholds) -> Self {
        let rules = vec![
            LifecycleRule {
                name: "no_first_payment",
                from: AWAITING_FIRST_PAYMENT,
                clock: RuleClock::SinceCreated,
                threshold_days: thresholds.first_payment_days,
                action: LifecycleAction::Suspend,
                side_effect: SideEffect::None,
            },
            LifecycleRule {
                name: "suspension_timeout",
                from: SUSPENDED,
                clock: RuleClock::SinceUpdated,
                threshold_days: thresholds.suspension_timeout_days,
                action: LifecycleAction::Cancel,
                side_effect: SideEffect::CancelBilling,
            },
            LifecycleRule {
                name: "payment_lapse",
                from: PAID,
                clock: RuleClock::OldestOverdue,
                threshold_days: thresholds.overdue_suspend_days,
                action: LifecycleAction::Suspend,
                side_effect: SideEffect::None,
            },
            LifecycleRule {
                name: "long_term_delinquency",
                from: SUSPENDED,
                clock: RuleClock::OldestOverdue,
                threshold_days: thresholds.overdue_cancel_days,
                action: LifecycleAction::Cancel,
                side_effect: SideEffect::CancelFutureBilling,
            },
        ];
        Self {
            rules,
            billing_cancel_retry_days: thresholds.billing_cancel_retry_days,
        }
    }

    pub fn rules(&self) -> &[LifecycleRule] {
        &self.rules
    }

    /// Statuses any rule can move out of, in table order without repeats.
    pub fn scanned_statuses(&self) -> Vec<EnrollmentStatus> {
        let mut statuses = Vec::new();
        for rule in &self.rules {
            for status in rule.from {
                if !statuses.contains(status) {
                    statuses.push(*status);
                }
            }
        }
        statuses
    }

    /// Whether an enrollment in `status` can only be decided with the gateway's overdue list.
    pub fn needs_overdue_lookup(&self, status: EnrollmentStatus) -> bool {
        self.rules
            .iter()
            .any(|rule| rule.clock == RuleClock::OldestOverdue && rule.applies_to(status))
    }

    /// Returns the first rule that fires for `enrollment` at `now`.
    ///
    /// `oldest_overdue` is the earliest overdue due date for the enrollment's
    /// customer; rules on that clock never fire when it is `None`.
    pub fn evaluate(
        &self,
        enrollment: &Enrollment,
        oldest_overdue: Option<NaiveDate>,
        now: DateTime<Utc>,
    ) -> Option<&LifecycleRule> {
        self.rules.iter().find(|rule| {
            rule.applies_to(enrollment.status)
                && matches!(
                    rule_age(rule, enrollment, oldest_overdue, now),
                    Some(days) if days >= rule.threshold_days
                )
        })
    }

    /// Whether a cancel rule has waited long enough on a failing billing
    /// cancellation that the enrollment should be cancelled regardless.
    pub fn billing_retry_exhausted(
        &self,
        rule: &LifecycleRule,
        enrollment: &Enrollment,
        oldest_overdue: Option<NaiveDate>,
        now: DateTime<Utc>,
    ) -> bool {
        rule.action == LifecycleAction::Cancel
            && matches!(
                rule_age(rule, enrollment, oldest_overdue, now),
                Some(days) if days >= rule.threshold_days + self.billing_cancel_retry_days
            )
    }
}

fn rule_age(
    rule: &LifecycleRule,
    enrollment: &Enrollment,
    oldest_overdue: Option<NaiveDate>,
    now: DateTime<Utc>,
) -> Option<i64> {
    match rule.clock {
        RuleClock::SinceCreated => Some(days_since(enrollment.created_at, now)),
        RuleClock::SinceUpdated => Some(days_since(enrollment.updated_at, now)),
        RuleClock::OldestOverdue => oldest_overdue.map(|due| overdue_days(due, now)),
    }
}

/// Whole days elapsed between `since` and `now`.
pub fn days_since(since: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    (now - since).num_days()
}

/// Calendar days a charge due on `due_date` has been outstanding at `now`.
pub fn overdue_days(due_date: NaiveDate, now: DateTime<Utc>) -> i64 {
    (now.date_naive() - due_date).num_days()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use uuid::Uuid;

    fn enrollment(status: EnrollmentStatus, created_days_ago: i64, updated_days_ago: i64) -> Enrollment {
        let now = Utc::now();
        Enrollment {
            id: Uuid::new_v4(),
            tenant_id: 1,
            course_id: 10,
            student_id: Some(7),
            contact_name: "Bruno".into(),
            contact_email: "bruno@example.com".into(),
            contact_phone: None,
            document_number: None,
            amount_cents: 30_000,
            installments: 3,
            gateway_customer_id: Some("cus_1".into()),
            gateway_payment_id: None,
            checkout_url: None,
            status,
            created_at: now - Duration::days(created_days_ago),
            updated_at: now - Duration::days(updated_days_ago),
            completed_at: None,
            suspended_at: None,
            cancelled_at: None,
        }
    }

    #[test]
    fn pending_past_first_payment_window_is_suspended() {
        let policy = LifecyclePolicy::default();
        let now = Utc::now();
        let record = enrollment(EnrollmentStatus::Pending, 11, 11);
        let rule = policy.evaluate(&record, None, now).unwrap();
        assert_eq!(rule.name, "no_first_payment");
        assert_eq!(rule.action.target(), EnrollmentStatus::Suspended);

        let fresh = enrollment(EnrollmentStatus::WaitingPayment, 9, 9);
        assert!(policy.evaluate(&fresh, None, now).is_none());
    }

    #[test]
    fn suspension_timeout_uses_updated_at() {
        let policy = LifecyclePolicy::default();
        let now = Utc::now();
        let record = enrollment(EnrollmentStatus::Suspended, 120, 31);
        let rule = policy.evaluate(&record, None, now).unwrap();
        assert_eq!(rule.name, "suspension_timeout");
        assert_eq!(rule.side_effect, SideEffect::CancelBilling);

        let recent = enrollment(EnrollmentStatus::Suspended, 120, 5);
        assert!(policy.evaluate(&recent, None, now).is_none());
    }

    #[test]
    fn paid_enrollment_requires_overdue_age() {
        let policy = LifecyclePolicy::default();
        let now = Utc::now();
        let record = enrollment(EnrollmentStatus::PaymentConfirmed, 200, 100);
        assert!(policy.evaluate(&record, None, now).is_none());

        let due = now.date_naive() - Duration::days(35);
        let rule = policy.evaluate(&record, Some(due), now).unwrap();
        assert_eq!(rule.name, "payment_lapse");

        let due = now.date_naive() - Duration::days(29);
        assert!(policy.evaluate(&record, Some(due), now).is_none());
    }

    #[test]
    fn long_delinquency_cancels_recent_suspension() {
        let policy = LifecyclePolicy::default();
        let now = Utc::now();
        let record = enrollment(EnrollmentStatus::Suspended, 200, 3);
        let due = now.date_naive() - Duration::days(90);
        let rule = policy.evaluate(&record, Some(due), now).unwrap();
        assert_eq!(rule.name, "long_term_delinquency");
        assert_eq!(rule.side_effect, SideEffect::CancelFutureBilling);
    }

    #[test]
    fn cancelled_and_failed_never_match() {
        let policy = LifecyclePolicy::default();
        let now = Utc::now();
        let due = Some(now.date_naive() - Duration::days(400));
        for status in [EnrollmentStatus::Cancelled, EnrollmentStatus::Failed] {
            let record = enrollment(status, 400, 400);
            assert!(policy.evaluate(&record, due, now).is_none());
        }
    }

    #[test]
    fn overdue_lookup_only_for_paid_and_suspended() {
        let policy = LifecyclePolicy::default();
        assert!(policy.needs_overdue_lookup(EnrollmentStatus::Completed));
        assert!(policy.needs_overdue_lookup(EnrollmentStatus::Suspended));
        assert!(!policy.needs_overdue_lookup(EnrollmentStatus::Pending));
        assert_eq!(
            policy.scanned_statuses(),
            vec![
                EnrollmentStatus::Pending,
                EnrollmentStatus::WaitingPayment,
                EnrollmentStatus::Suspended,
                EnrollmentStatus::PaymentConfirmed,
                EnrollmentStatus::Completed,
            ]
        );
    }

    #[test]
    fn billing_retry_window_follows_the_cancel_threshold() {
        let policy = LifecyclePolicy::default();
        let now = Utc::now();
        let within = enrollment(EnrollmentStatus::Suspended, 120, 33);
        let rule = policy.evaluate(&within, None, now).unwrap();
        assert!(!policy.billing_retry_exhausted(rule, &within, None, now));

        let exhausted = enrollment(EnrollmentStatus::Suspended, 120, 37);
        let rule = policy.evaluate(&exhausted, None, now).unwrap();
        assert!(policy.billing_retry_exhausted(rule, &exhausted, None, now));

        let lapsed = enrollment(EnrollmentStatus::Completed, 120, 120);
        let due = Some(now.date_naive() - Duration::days(200));
        let rule = policy.evaluate(&lapsed, due, now).unwrap();
        assert!(!policy.billing_retry_exhausted(rule, &lapsed, due, now));
    }

    #[test]
    fn custom_thresholds_shift_the_table() {
        let policy = LifecyclePolicy::new(LifecycleThresholds {
            first_payment_days: 3,
            ..LifecycleThresholds::default()
        });
        let record = enrollment(EnrollmentStatus::Pending, 4, 4);
        assert!(policy.evaluate(&record, None, Utc::now()).is_some());
    }
}
