pub mod gateway;
pub mod http;
pub mod models;

pub use gateway::{GatewayError, PaymentGateway};
pub use http::HttpPaymentGateway;
pub use models::{
    oldest_due_date, CheckoutLink, CheckoutRequest, GatewayCustomer, NewCustomer, OverduePayment,
};
