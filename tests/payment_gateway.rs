use chrono::NaiveDate;
use enrollment_service::payments::{
    CheckoutRequest, GatewayError, HttpPaymentGateway, NewCustomer, PaymentGateway,
};
use httpmock::prelude::*;
use serde_json::json;

fn gateway(server: &MockServer) -> HttpPaymentGateway {
    HttpPaymentGateway::new(server.base_url(), Some("test-key".to_string())).unwrap()
}

#[tokio::test]
async fn overdue_payments_follow_pagination() {
    let server = MockServer::start_async().await;

    let first_page = server.mock(|when, then| {
        when.method(GET)
            .path("/v3/payments")
            .header("access_token", "test-key")
            .query_param("customer", "cus_42")
            .query_param("status", "OVERDUE")
            .query_param("offset", "0");
        then.status(200).json_body(json!({
            "object": "list",
            "hasMore": true,
            "data": [
                { "id": "pay_1", "customer": "cus_42", "dueDate": "2024-03-10", "value": 199.0 }
            ]
        }));
    });

    let second_page = server.mock(|when, then| {
        when.method(GET)
            .path("/v3/payments")
            .query_param("customer", "cus_42")
            .query_param("status", "OVERDUE")
            .query_param("offset", "1");
        then.status(200).json_body(json!({
            "object": "list",
            "hasMore": false,
            "data": [
                { "id": "pay_2", "customer": "cus_42", "dueDate": "2024-01-05", "value": 199.0 }
            ]
        }));
    });

    let payments = gateway(&server).overdue_payments("cus_42").await.unwrap();

    first_page.assert();
    second_page.assert();
    assert_eq!(payments.len(), 2);
    assert_eq!(
        payments[1].due_date,
        NaiveDate::from_ymd_opt(2024, 1, 5).unwrap()
    );
}

#[tokio::test]
async fn cancel_payment_treats_missing_charge_as_cancelled() {
    let server = MockServer::start_async().await;
    let delete = server.mock(|when, then| {
        when.method(DELETE).path("/v3/payments/pay_gone");
        then.status(404).json_body(json!({ "errors": [{ "code": "not_found" }] }));
    });

    gateway(&server).cancel_payment("pay_gone").await.unwrap();
    delete.assert();
}

#[tokio::test]
async fn cancel_payment_surfaces_server_errors() {
    let server = MockServer::start_async().await;
    server.mock(|when, then| {
        when.method(DELETE).path("/v3/payments/pay_1");
        then.status(500).body("upstream exploded");
    });

    let err = gateway(&server).cancel_payment("pay_1").await.unwrap_err();
    match err {
        GatewayError::Status { status, body } => {
            assert_eq!(status, 500);
            assert_eq!(body, "upstream exploded");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn cancel_future_payments_deletes_each_pending_charge() {
    let server = MockServer::start_async().await;
    let listing = server.mock(|when, then| {
        when.method(GET)
            .path("/v3/payments")
            .query_param("customer", "cus_7")
            .query_param("status", "PENDING");
        then.status(200).json_body(json!({
            "hasMore": false,
            "data": [
                { "id": "pay_a", "customer": "cus_7", "dueDate": "2030-01-10", "value": 99.0 },
                { "id": "pay_b", "customer": "cus_7", "dueDate": "2030-02-10", "value": 99.0 }
            ]
        }));
    });
    let delete_a = server.mock(|when, then| {
        when.method(DELETE).path("/v3/payments/pay_a");
        then.status(200).json_body(json!({ "deleted": true, "id": "pay_a" }));
    });
    let delete_b = server.mock(|when, then| {
        when.method(DELETE).path("/v3/payments/pay_b");
        then.status(200).json_body(json!({ "deleted": true, "id": "pay_b" }));
    });

    let cancelled = gateway(&server)
        .cancel_future_payments("cus_7")
        .await
        .unwrap();

    assert_eq!(cancelled, 2);
    listing.assert();
    delete_a.assert();
    delete_b.assert();
}

#[tokio::test]
async fn intake_calls_create_customer_and_checkout() {
    let server = MockServer::start_async().await;
    let customers = server.mock(|when, then| {
        when.method(POST)
            .path("/v3/customers")
            .header("access_token", "test-key")
            .json_body_partial(r#"{ "name": "Dora", "externalReference": "enr-9" }"#);
        then.status(200)
            .json_body(json!({ "id": "cus_new", "name": "Dora", "email": "dora@example.com" }));
    });
    let links = server.mock(|when, then| {
        when.method(POST)
            .path("/v3/paymentLinks")
            .json_body_partial(r#"{ "chargeType": "INSTALLMENT", "maxInstallmentCount": 4 }"#);
        then.status(200)
            .json_body(json!({ "id": "lnk_9", "url": "https://pay.example.com/lnk_9" }));
    });

    let client = gateway(&server);
    let customer = client
        .create_customer(&NewCustomer {
            name: "Dora".into(),
            email: "dora@example.com".into(),
            phone: None,
            document_number: None,
            external_reference: "enr-9".into(),
        })
        .await
        .unwrap();
    let link = client
        .create_checkout_link(&CheckoutRequest::installment("Course 3", 40_000, 4, "enr-9"))
        .await
        .unwrap();

    customers.assert();
    links.assert();
    assert_eq!(customer.id, "cus_new");
    assert_eq!(link.url, "https://pay.example.com/lnk_9");
}

#[tokio::test]
async fn malformed_listing_is_a_decode_error() {
    let server = MockServer::start_async().await;
    server.mock(|when, then| {
        when.method(GET).path("/v3/payments");
        then.status(200).body("<html>maintenance</html>");
    });

    let err = gateway(&server).overdue_payments("cus_1").await.unwrap_err();
    assert!(matches!(err, GatewayError::Decode(_)));
}
