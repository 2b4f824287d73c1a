use async_trait::async_trait;
use thiserror::Error;

use super::models::{CheckoutLink, CheckoutRequest, GatewayCustomer, NewCustomer, OverduePayment};

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("payment gateway request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("payment gateway returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("payment gateway response invalid: {0}")]
    Decode(String),
}

/// key: payment-gateway -> provider integration consumed by intake and the tracker
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_customer(&self, customer: &NewCustomer) -> Result<GatewayCustomer, GatewayError>;

    async fn create_checkout_link(
        &self,
        request: &CheckoutRequest,
    ) -> Result<CheckoutLink, GatewayError>;

    async fn overdue_payments(&self, customer_id: &str)
        -> Result<Vec<OverduePayment>, GatewayError>;

    /// Cancels a single charge. Cancelling a charge that no longer exists succeeds.
    async fn cancel_payment(&self, payment_id: &str) -> Result<(), GatewayError>;

    /// Cancels every pending charge of the customer and returns how many were cancelled.
    async fn cancel_future_payments(&self, customer_id: &str) -> Result<usize, GatewayError>;
}
