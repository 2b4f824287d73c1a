use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde::{de::DeserializeOwned, Deserialize};
use std::time::Duration;
use tracing::debug;

use super::gateway::{GatewayError, PaymentGateway};
use super::models::{CheckoutLink, CheckoutRequest, GatewayCustomer, NewCustomer, OverduePayment};
use crate::config;

const PAGE_LIMIT: usize = 100;

/// key: payment-gateway-http -> REST client for the hosted billing provider
pub struct HttpPaymentGateway {
    base: String,
    api_key: Option<String>,
    client: Client,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PaymentPage {
    #[serde(default)]
    data: Vec<OverduePayment>,
    #[serde(default)]
    has_more: bool,
}

impl HttpPaymentGateway {
    pub fn from_env() -> Result<Self, GatewayError> {
        Self::new(
            config::PAYMENT_GATEWAY_URL.as_str(),
            config::PAYMENT_GATEWAY_API_KEY.clone(),
        )
    }

    pub fn new(base: impl Into<String>, api_key: Option<String>) -> Result<Self, GatewayError> {
        let client = Client::builder().timeout(Duration::from_secs(10)).build()?;
        Ok(Self {
            base: base.into().trim_end_matches('/').to_string(),
            api_key,
            client,
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}/v3/{}", self.base, path);
        let req = self.client.request(method, &url);
        match &self.api_key {
            Some(key) => req.header("access_token", key),
            None => req,
        }
    }

    async fn send_json<T: DeserializeOwned>(&self, req: RequestBuilder) -> Result<T, GatewayError> {
        let resp = req.send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(GatewayError::Status {
                status: status.as_u16(),
                body,
            });
        }
        resp.json::<T>()
            .await
            .map_err(|err| GatewayError::Decode(err.to_string()))
    }

    async fn list_payments(
        &self,
        customer_id: &str,
        status: &str,
    ) -> Result<Vec<OverduePayment>, GatewayError> {
        let mut payments = Vec::new();
        let mut offset = 0usize;
        loop {
            let req = self.request(Method::GET, "payments").query(&[
                ("customer", customer_id.to_string()),
                ("status", status.to_string()),
                ("offset", offset.to_string()),
                ("limit", PAGE_LIMIT.to_string()),
            ]);
            let page: PaymentPage = self.send_json(req).await?;
            let fetched = page.data.len();
            payments.extend(page.data);
            if !page.has_more || fetched == 0 {
                break;
            }
            offset += fetched;
        }
        Ok(payments)
    }
}

#[async_trait]
impl PaymentGateway for HttpPaymentGateway {
    async fn create_customer(&self, customer: &NewCustomer) -> Result<GatewayCustomer, GatewayError> {
        let req = self.request(Method::POST, "customers").json(customer);
        self.send_json(req).await
    }

    async fn create_checkout_link(
        &self,
        request: &CheckoutRequest,
    ) -> Result<CheckoutLink, GatewayError> {
        let req = self.request(Method::POST, "paymentLinks").json(request);
        self.send_json(req).await
    }

    async fn overdue_payments(
        &self,
        customer_id: &str,
    ) -> Result<Vec<OverduePayment>, GatewayError> {
        self.list_payments(customer_id, "OVERDUE").await
    }

    async fn cancel_payment(&self, payment_id: &str) -> Result<(), GatewayError> {
        let resp = self
            .request(Method::DELETE, &format!("payments/{payment_id}"))
            .send()
            .await?;
        let status = resp.status();
        if status == StatusCode::NOT_FOUND {
            debug!(%payment_id, "payment already removed at gateway");
            return Ok(());
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(GatewayError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }

    async fn cancel_future_payments(&self, customer_id: &str) -> Result<usize, GatewayError> {
        let pending = self.list_payments(customer_id, "PENDING").await?;
        for payment in &pending {
            self.cancel_payment(&payment.id).await?;
        }
        Ok(pending.len())
    }
}
