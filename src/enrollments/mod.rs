pub mod api;
pub mod lifecycle;
pub mod models;
pub mod store;
pub mod tracker;

pub use lifecycle::{
    LifecycleAction, LifecyclePolicy, LifecycleRule, LifecycleThresholds, RuleClock, SideEffect,
};
pub use models::{
    Enrollment, EnrollmentStatus, FormalEnrollment, FormalEnrollmentStatus, LifecycleError,
    NewEnrollment, Tenant, TransitionOutcome,
};
pub use store::{EnrollmentService, EnrollmentStore};
pub use tracker::{spawn as spawn_enrollment_tracker, CycleReport, EnrollmentTracker};
