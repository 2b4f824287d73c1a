use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{self, Duration as TokioDuration, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use super::lifecycle::{LifecyclePolicy, LifecycleRule, SideEffect};
use super::models::{Enrollment, Tenant, TransitionOutcome};
use super::store::EnrollmentStore;
use crate::payments::{oldest_due_date, PaymentGateway};

/// key: enrollment-tracker-report -> per-cycle counters
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct CycleReport {
    pub tenants_scanned: usize,
    pub enrollments_evaluated: usize,
    pub suspended: usize,
    pub cancelled: usize,
    pub formal_updated: usize,
    pub stale: usize,
    pub failures: usize,
    /// Cancellations written after billing cancellation kept failing past the retry window.
    pub billing_cancel_abandoned: usize,
}

enum EnrollmentOutcome {
    Unchanged,
    Transitioned {
        rule: &'static str,
        formal_updated: bool,
        cancelled: bool,
        billing_abandoned: bool,
    },
    Stale,
}

/// key: enrollment-tracker -> suspension/cancellation automation
pub struct EnrollmentTracker {
    store: Arc<dyn EnrollmentStore>,
    gateway: Arc<dyn PaymentGateway>,
    policy: LifecyclePolicy,
    running: AtomicBool,
}

/// Clears the running flag when a cycle ends, including on error or panic.
struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl EnrollmentTracker {
    pub fn new(
        store: Arc<dyn EnrollmentStore>,
        gateway: Arc<dyn PaymentGateway>,
        policy: LifecyclePolicy,
    ) -> Self {
        Self {
            store,
            gateway,
            policy,
            running: AtomicBool::new(false),
        }
    }

    pub fn policy(&self) -> &LifecyclePolicy {
        &self.policy
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Runs one pass over every active tenant.
    ///
    /// Returns `None` without doing any work when another cycle holds the running flag.
    pub async fn run_cycle(&self, now: DateTime<Utc>) -> Option<CycleReport> {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            info!("enrollment tracker cycle already running; skipping");
            return None;
        }
        let _guard = RunningGuard(&self.running);

        let mut report = CycleReport::default();
        let tenants = match self.store.active_tenants().await {
            Ok(tenants) => tenants,
            Err(err) => {
                error!(?err, "enrollment tracker failed to list tenants");
                report.failures += 1;
                return Some(report);
            }
        };

        for tenant in &tenants {
            if let Err(err) = self.run_tenant(tenant, now, &mut report).await {
                error!(?err, tenant_id = tenant.id, "enrollment tracker tenant scan failed");
                report.failures += 1;
            }
        }

        info!(
            tenants = report.tenants_scanned,
            evaluated = report.enrollments_evaluated,
            suspended = report.suspended,
            cancelled = report.cancelled,
            formal_updated = report.formal_updated,
            stale = report.stale,
            failures = report.failures,
            "enrollment tracker cycle finished"
        );
        Some(report)
    }

    async fn run_tenant(
        &self,
        tenant: &Tenant,
        now: DateTime<Utc>,
        report: &mut CycleReport,
    ) -> Result<()> {
        let statuses = self.policy.scanned_statuses();
        let enrollments = self
            .store
            .enrollments_by_status(tenant.id, &statuses)
            .await?;
        report.tenants_scanned += 1;
        debug!(
            tenant_id = tenant.id,
            tenant = %tenant.name,
            candidates = enrollments.len(),
            "scanning tenant enrollments"
        );

        for enrollment in &enrollments {
            report.enrollments_evaluated += 1;
            match self.process_enrollment(enrollment, now).await {
                Ok(EnrollmentOutcome::Unchanged) => {}
                Ok(EnrollmentOutcome::Stale) => {
                    report.stale += 1;
                    info!(
                        tenant_id = tenant.id,
                        enrollment_id = %enrollment.id,
                        status = %enrollment.status,
                        "enrollment changed during scan; leaving concurrent update in place"
                    );
                }
                Ok(EnrollmentOutcome::Transitioned {
                    rule,
                    formal_updated,
                    cancelled,
                    billing_abandoned,
                }) => {
                    if billing_abandoned {
                        report.billing_cancel_abandoned += 1;
                    }
                    if cancelled {
                        report.cancelled += 1;
                    } else {
                        report.suspended += 1;
                    }
                    if formal_updated {
                        report.formal_updated += 1;
                    }
                    info!(
                        tenant_id = tenant.id,
                        enrollment_id = %enrollment.id,
                        from = %enrollment.status,
                        rule,
                        formal_updated,
                        "enrollment status updated by tracker"
                    );
                }
                Err(err) => {
                    report.failures += 1;
                    warn!(
                        ?err,
                        tenant_id = tenant.id,
                        enrollment_id = %enrollment.id,
                        "failed to process enrollment"
                    );
                }
            }
        }

        Ok(())
    }

    async fn process_enrollment(
        &self,
        enrollment: &Enrollment,
        now: DateTime<Utc>,
    ) -> Result<EnrollmentOutcome> {
        let mut oldest = None;
        let mut rule = self.policy.evaluate(enrollment, None, now);

        if rule.is_none() && self.policy.needs_overdue_lookup(enrollment.status) {
            let Some(customer_id) = enrollment.gateway_customer_id.as_deref() else {
                return Ok(EnrollmentOutcome::Unchanged);
            };
            let overdue = self.gateway.overdue_payments(customer_id).await?;
            oldest = oldest_due_date(&overdue);
            if oldest.is_none() {
                return Ok(EnrollmentOutcome::Unchanged);
            }
            rule = self.policy.evaluate(enrollment, oldest, now);
        }

        let Some(rule) = rule else {
            return Ok(EnrollmentOutcome::Unchanged);
        };

        let mut billing_abandoned = false;
        if let Err(err) = self.apply_side_effect(enrollment, rule).await {
            if !self
                .policy
                .billing_retry_exhausted(rule, enrollment, oldest, now)
            {
                return Err(err);
            }
            error!(
                ?err,
                enrollment_id = %enrollment.id,
                customer_id = ?enrollment.gateway_customer_id,
                rule = rule.name,
                "billing cancellation still failing after retry window; cancelling enrollment anyway"
            );
            billing_abandoned = true;
        }

        let target = rule.action.target();
        match self.store.transition(enrollment, target, now).await? {
            TransitionOutcome::Stale => Ok(EnrollmentOutcome::Stale),
            TransitionOutcome::Applied { formal_updated } => Ok(EnrollmentOutcome::Transitioned {
                rule: rule.name,
                formal_updated,
                cancelled: target.is_terminal(),
                billing_abandoned,
            }),
        }
    }

    /// Billing is cancelled before the status write so a gateway failure leaves the
    /// enrollment untouched for the next cycle, until the policy's retry window runs out.
    ///
    /// The intake charge is only cancelled for enrollments that were never paid.
    async fn apply_side_effect(&self, enrollment: &Enrollment, rule: &LifecycleRule) -> Result<()> {
        let cancel_intake_charge = match rule.side_effect {
            SideEffect::None => return Ok(()),
            SideEffect::CancelBilling => true,
            SideEffect::CancelFutureBilling => false,
        };

        if cancel_intake_charge && enrollment.completed_at.is_none() {
            if let Some(payment_id) = enrollment.gateway_payment_id.as_deref() {
                self.gateway.cancel_payment(payment_id).await?;
            }
        }

        if let Some(customer_id) = enrollment.gateway_customer_id.as_deref() {
            let cancelled = self.gateway.cancel_future_payments(customer_id).await?;
            debug!(
                enrollment_id = %enrollment.id,
                customer_id,
                cancelled,
                "cancelled pending charges"
            );
        }
        Ok(())
    }
}

/// key: enrollment-tracker-scheduler -> fixed-interval background cycles
pub fn spawn(tracker: Arc<EnrollmentTracker>, interval: TokioDuration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            let tracker = tracker.clone();
            tokio::spawn(async move {
                if tracker.run_cycle(Utc::now()).await.is_none() {
                    debug!("scheduled enrollment tracker tick skipped");
                }
            });
        }
    })
}
