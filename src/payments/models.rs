use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// key: payment-models -> customer provisioning payload
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewCustomer {
    pub name: String,
    pub email: String,
    #[serde(rename = "mobilePhone", skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(rename = "cpfCnpj", skip_serializing_if = "Option::is_none")]
    pub document_number: Option<String>,
    pub external_reference: String,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct GatewayCustomer {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

/// key: payment-models -> hosted checkout for an intake
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutRequest {
    pub name: String,
    pub value: f64,
    pub billing_type: String,
    pub charge_type: String,
    pub max_installment_count: i32,
    pub external_reference: String,
}

impl CheckoutRequest {
    /// Builds an installment checkout for `amount_cents` split into at most `installments`.
    pub fn installment(
        name: impl Into<String>,
        amount_cents: i64,
        installments: i32,
        external_reference: impl Into<String>,
    ) -> Self {
        let charge_type = if installments > 1 {
            "INSTALLMENT"
        } else {
            "DETACHED"
        };
        Self {
            name: name.into(),
            value: amount_cents as f64 / 100.0,
            billing_type: "UNDEFINED".to_string(),
            charge_type: charge_type.to_string(),
            max_installment_count: installments.max(1),
            external_reference: external_reference.into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct CheckoutLink {
    pub id: String,
    pub url: String,
}

/// A charge the gateway reports as past its due date without confirmed payment.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OverduePayment {
    pub id: String,
    #[serde(default)]
    pub customer: Option<String>,
    pub due_date: NaiveDate,
    #[serde(default)]
    pub value: f64,
}

/// Returns the earliest due date among `payments`; the oldest debt sets the overdue age.
pub fn oldest_due_date(payments: &[OverduePayment]) -> Option<NaiveDate> {
    payments.iter().map(|payment| payment.due_date).min()
}
