#![allow(dead_code)]

use async_trait::async_trait;
use axum::{
    body::{to_bytes, Body},
    http::{header, Request, StatusCode},
    Router,
};
use mpesa_stk::database::MemoryPaymentStore;
use mpesa_stk::services::gateway::{GatewayAck, GatewayError, PaymentGateway, StkPushParams};
use mpesa_stk::{build_router, AppState};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tower::ServiceExt;

pub const CALLBACK_URL: &str = "https://example.com/callback";

/// Gateway double that replays scripted responses and records every call.
#[derive(Default)]
pub struct FakeGateway {
    responses: Mutex<VecDeque<Result<GatewayAck, GatewayError>>>,
    calls: Mutex<Vec<StkPushParams>>,
}

impl FakeGateway {
    pub fn push(&self, response: Result<GatewayAck, GatewayError>) {
        self.responses.lock().unwrap().push_back(response);
    }

    pub fn accept(&self, checkout_request_id: &str) {
        self.push(Ok(GatewayAck {
            response_code: "0".to_string(),
            checkout_request_id: Some(checkout_request_id.to_string()),
            merchant_request_id: Some(format!("mr_{}", checkout_request_id)),
            customer_message: Some("Success. Request accepted for processing".to_string()),
            error_message: None,
        }));
    }

    pub fn calls(&self) -> Vec<StkPushParams> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl PaymentGateway for FakeGateway {
    async fn initiate_payment(&self, params: &StkPushParams) -> Result<GatewayAck, GatewayError> {
        self.calls.lock().unwrap().push(params.clone());
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(GatewayError::InvalidRequest("no scripted response".to_string())))
    }
}

pub struct TestApp {
    pub router: Router,
    pub gateway: Arc<FakeGateway>,
    pub store: MemoryPaymentStore,
}

impl TestApp {
    pub fn new() -> Self {
        let gateway = Arc::new(FakeGateway::default());
        let store = MemoryPaymentStore::new(Duration::from_secs(300));
        let state = AppState::new(gateway.clone(), Arc::new(store.clone()), CALLBACK_URL);

        TestApp {
            router: build_router(state),
            gateway,
            store,
        }
    }

    pub async fn send(&self, request: Request<Body>) -> (StatusCode, Vec<u8>) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, body.to_vec())
    }

    pub async fn stk_push(&self, form: &str) -> (StatusCode, Value) {
        let request = Request::builder()
            .method("POST")
            .uri("/stk-push")
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from(form.to_string()))
            .unwrap();
        let (status, body) = self.send(request).await;
        (status, serde_json::from_slice(&body).unwrap())
    }

    pub async fn callback(&self, body: impl Into<Body>) -> (StatusCode, Vec<u8>) {
        let request = Request::builder()
            .method("POST")
            .uri("/callback")
            .header(header::CONTENT_TYPE, "application/json")
            .body(body.into())
            .unwrap();
        self.send(request).await
    }

    pub async fn get_json(&self, uri: &str) -> (StatusCode, Value) {
        let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
        let (status, body) = self.send(request).await;
        (status, serde_json::from_slice(&body).unwrap())
    }

    pub async fn check_status(&self, checkout_request_id: &str) -> (StatusCode, Value) {
        self.get_json(&format!("/check-status?checkout_request_id={}", checkout_request_id))
            .await
    }
}

pub fn stk_callback(checkout_request_id: &str, result_code: i64, result_desc: &str) -> String {
    serde_json::json!({
        "Body": {"stkCallback": {
            "MerchantRequestID": format!("mr_{}", checkout_request_id),
            "CheckoutRequestID": checkout_request_id,
            "ResultCode": result_code,
            "ResultDesc": result_desc,
        }}
    })
    .to_string()
}

pub fn success_callback(checkout_request_id: &str, receipt: &str) -> String {
    serde_json::json!({
        "Body": {"stkCallback": {
            "MerchantRequestID": format!("mr_{}", checkout_request_id),
            "CheckoutRequestID": checkout_request_id,
            "ResultCode": 0,
            "ResultDesc": "The service request is processed successfully.",
            "CallbackMetadata": {"Item": [
                {"Name": "Amount", "Value": 50},
                {"Name": "MpesaReceiptNumber", "Value": receipt},
                {"Name": "TransactionDate", "Value": 20240501103000u64},
                {"Name": "PhoneNumber", "Value": 254712345678u64}
            ]}
        }}
    })
    .to_string()
}
