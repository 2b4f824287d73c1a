pub mod enrollments;
pub mod error;
pub mod extractor;
pub mod payments;
pub mod routes;
pub mod webhooks;

mod config;

pub use config::{
    ALLOW_MIGRATION_FAILURE, BIND_ADDRESS, BIND_PORT, DATABASE_URL, ENROLLMENT_TRACKER_ENABLED,
    ENROLLMENT_TRACKER_INTERVAL_SECS, JWT_SECRET, PAYMENT_WEBHOOK_SECRET,
};
