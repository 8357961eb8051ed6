mod common;

use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use common::{TestApp, CALLBACK_URL};
use mpesa_stk::database::PaymentStore;
use mpesa_stk::models::payment::PaymentStatus;
use mpesa_stk::services::gateway::{GatewayAck, GatewayError};
use mpesa_stk::services::payment_service::TRANSACTION_DESC;
use rust_decimal_macros::dec;

#[tokio::test]
async fn accepted_push_creates_pending_attempt() {
    let app = TestApp::new();
    app.gateway.accept("ws_1");

    let (status, body) = app
        .stk_push("phone=254712345678&amount=50&reference=Order1")
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "success");
    assert_eq!(body["checkout_request_id"], "ws_1");
    assert_eq!(body["customer_message"], "Success. Request accepted for processing");

    let calls = app.gateway.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].phone_number, "254712345678");
    assert_eq!(calls[0].amount, dec!(50));
    assert_eq!(calls[0].account_reference, "Order1");
    assert_eq!(calls[0].transaction_desc, TRANSACTION_DESC);
    assert_eq!(calls[0].callback_url, CALLBACK_URL);

    let attempt = app.store.find("ws_1").await.unwrap().unwrap();
    assert_eq!(attempt.status, PaymentStatus::Pending);
    assert_eq!(attempt.phone_number, "254712345678");
    assert_eq!(attempt.amount, dec!(50));
    assert_eq!(attempt.reference, "Order1");
    assert_eq!(attempt.merchant_request_id.as_deref(), Some("mr_ws_1"));
    assert!(attempt.callback_received_at.is_none());
}

#[tokio::test]
async fn reference_defaults_to_payment() {
    let app = TestApp::new();
    app.gateway.accept("ws_2");

    let (status, _) = app.stk_push("phone=254712345678&amount=10").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(app.gateway.calls()[0].account_reference, "Payment");
}

#[tokio::test]
async fn invalid_phones_never_reach_the_gateway() {
    let app = TestApp::new();

    for phone in ["0712345678", "%2B254712345678", "25471234567", "2547123456789", "254abc345678"] {
        let (status, body) = app.stk_push(&format!("phone={}&amount=10", phone)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{}", phone);
        assert_eq!(body["status"], "error");
        assert_eq!(body["message"], "Phone number must be in the format 254XXXXXXXXX");
    }

    assert!(app.gateway.calls().is_empty());
}

#[tokio::test]
async fn invalid_amounts_never_reach_the_gateway() {
    let app = TestApp::new();

    for amount in ["0", "-1", "0.5", "abc", "1%2C000"] {
        let (status, body) = app
            .stk_push(&format!("phone=254712345678&amount={}", amount))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{}", amount);
        assert_eq!(body["status"], "error");
    }

    let (status, body) = app.stk_push("phone=254712345678").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "Phone number and amount are required");

    assert!(app.gateway.calls().is_empty());
}

#[tokio::test]
async fn fractional_amounts_never_reach_the_gateway() {
    let app = TestApp::new();

    for amount in ["1.5", "100.01", "1e2", "1E3"] {
        let (status, body) = app
            .stk_push(&format!("phone=254712345678&amount={}", amount))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{}", amount);
        assert_eq!(body["status"], "error");
        assert_eq!(body["message"], "Amount must be a valid number");
    }

    assert!(app.gateway.calls().is_empty());
    assert_eq!(app.store.stats().await.unwrap().total, 0);
}

#[tokio::test]
async fn whole_amount_with_zero_fraction_is_accepted() {
    let app = TestApp::new();
    app.gateway.accept("ws_9");

    let (status, _) = app.stk_push("phone=254712345678&amount=50.00").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(app.gateway.calls()[0].amount.to_string(), "50");
}

#[tokio::test]
async fn gateway_rejection_creates_no_record() {
    let app = TestApp::new();
    app.gateway.push(Ok(GatewayAck {
        response_code: "400.002.02".to_string(),
        error_message: Some("Bad Request - Invalid PhoneNumber".to_string()),
        ..Default::default()
    }));

    let (status, body) = app.stk_push("phone=254712345678&amount=50").await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["status"], "error");
    assert_eq!(body["message"], "Bad Request - Invalid PhoneNumber");
    assert_eq!(app.store.stats().await.unwrap().total, 0);
}

#[tokio::test]
async fn gateway_rejection_without_message_uses_fallback() {
    let app = TestApp::new();
    app.gateway.push(Ok(GatewayAck {
        response_code: "1".to_string(),
        ..Default::default()
    }));

    let (status, body) = app.stk_push("phone=254712345678&amount=50").await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "Payment request failed");
}

#[tokio::test]
async fn gateway_failure_does_not_leak_detail() {
    let app = TestApp::new();
    app.gateway
        .push(Err(GatewayError::Auth("M-Pesa auth failed: 401 secret=abc".to_string())));

    let (status, body) = app.stk_push("phone=254712345678&amount=50").await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["status"], "error");
    assert_eq!(body["message"], "Payment processing failed");
    assert_eq!(app.store.stats().await.unwrap().total, 0);
}

#[tokio::test]
async fn accepted_ack_without_checkout_id_is_an_error() {
    let app = TestApp::new();
    app.gateway.push(Ok(GatewayAck {
        response_code: "0".to_string(),
        ..Default::default()
    }));

    let (status, body) = app.stk_push("phone=254712345678&amount=50").await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["message"], "Payment processing failed");
    assert_eq!(app.store.stats().await.unwrap().total, 0);
}

#[tokio::test]
async fn non_form_body_is_rejected() {
    let app = TestApp::new();
    let request = Request::builder()
        .method("POST")
        .uri("/stk-push")
        .header("content-type", "application/json")
        .body(Body::from(r#"{"phone":"254712345678","amount":"50"}"#))
        .unwrap();

    let (status, body) = app.send(request).await;
    let body: serde_json::Value = serde_json::from_slice(&body).unwrap();

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["status"], "error");
    assert!(app.gateway.calls().is_empty());
}

#[tokio::test]
async fn get_on_stk_push_is_not_allowed() {
    let app = TestApp::new();
    let (status, body) = app.get_json("/stk-push").await;

    assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(body["message"], "Invalid request method");
}
