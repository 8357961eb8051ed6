// services/mpesa_service.rs
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as base64, Engine as _};
use chrono::{DateTime, Utc};
use reqwest::{header, Client, StatusCode};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{error, info, warn};

use crate::config::AppConfig;
use crate::services::gateway::{
    GatewayAck, GatewayError, PaymentGateway, StkPushParams, ACCEPTED_RESPONSE_CODE,
};

const TRANSACTION_TYPE: &str = "CustomerPayBillOnline";

#[derive(Debug, Deserialize)]
pub struct AuthResponse {
    pub access_token: String,
    pub expires_in: String,
}

#[derive(Debug, Serialize)]
pub struct StkPushRequest {
    #[serde(rename = "BusinessShortCode")]
    pub business_short_code: String,
    #[serde(rename = "Password")]
    pub password: String,
    #[serde(rename = "Timestamp")]
    pub timestamp: String,
    #[serde(rename = "TransactionType")]
    pub transaction_type: String,
    #[serde(rename = "Amount")]
    pub amount: String,
    #[serde(rename = "PartyA")]
    pub party_a: String,
    #[serde(rename = "PartyB")]
    pub party_b: String,
    #[serde(rename = "PhoneNumber")]
    pub phone_number: String,
    #[serde(rename = "CallBackURL")]
    pub callback_url: String,
    #[serde(rename = "AccountReference")]
    pub account_reference: String,
    #[serde(rename = "TransactionDesc")]
    pub transaction_desc: String,
}

#[derive(Debug, Deserialize)]
pub struct StkPushResponse {
    #[serde(rename = "MerchantRequestID")]
    pub merchant_request_id: Option<String>,
    #[serde(rename = "CheckoutRequestID")]
    pub checkout_request_id: Option<String>,
    #[serde(rename = "ResponseCode")]
    pub response_code: String,
    #[serde(rename = "ResponseDescription")]
    pub response_description: Option<String>,
    #[serde(rename = "CustomerMessage")]
    pub customer_message: Option<String>,
}

/// Body Daraja returns when it refuses a request outright.
#[derive(Debug, Deserialize)]
pub struct DarajaErrorResponse {
    #[serde(rename = "requestId")]
    pub request_id: Option<String>,
    #[serde(rename = "errorCode")]
    pub error_code: String,
    #[serde(rename = "errorMessage")]
    pub error_message: Option<String>,
}

impl From<StkPushResponse> for GatewayAck {
    fn from(response: StkPushResponse) -> Self {
        let accepted = response.response_code.trim() == ACCEPTED_RESPONSE_CODE;
        GatewayAck {
            response_code: response.response_code,
            checkout_request_id: response.checkout_request_id,
            merchant_request_id: response.merchant_request_id,
            customer_message: response.customer_message,
            error_message: if accepted { None } else { response.response_description },
        }
    }
}

impl From<DarajaErrorResponse> for GatewayAck {
    fn from(response: DarajaErrorResponse) -> Self {
        GatewayAck {
            response_code: response.error_code,
            error_message: response.error_message,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone)]
pub struct MpesaService {
    config: AppConfig,
    client: Client,
    cached_token: Arc<RwLock<Option<(String, DateTime<Utc>)>>>,
}

impl MpesaService {
    pub fn new(config: AppConfig) -> Result<Self, GatewayError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(MpesaService {
            config,
            client,
            cached_token: Arc::new(RwLock::new(None)),
        })
    }

    fn generate_password(&self, timestamp: &str) -> String {
        stk_password(&self.config.mpesa_short_code, &self.config.mpesa_passkey, timestamp)
    }

    pub async fn get_access_token(&self) -> Result<String, GatewayError> {
        {
            let cached = self.cached_token.read().await;
            if let Some((token, expiry)) = cached.as_ref() {
                if *expiry > Utc::now() + chrono::Duration::minutes(5) {
                    return Ok(token.clone());
                }
            }
        }

        info!("Requesting new M-Pesa access token");
        let auth_string = format!(
            "{}:{}",
            self.config.mpesa_consumer_key, self.config.mpesa_consumer_secret
        );
        let encoded_auth = base64.encode(auth_string);

        let (auth_url, _) = self.config.get_mpesa_urls();

        let response = self
            .client
            .get(&auth_url)
            .header(header::AUTHORIZATION, format!("Basic {}", encoded_auth))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            error!("Failed to get access token: {} - {}", status, body);
            return Err(GatewayError::Auth(format!("M-Pesa auth failed: {}", status)));
        }

        let auth_response: AuthResponse = response.json().await?;
        let lifetime_secs: i64 = auth_response.expires_in.trim().parse().unwrap_or(3599);

        {
            let expiry_time = Utc::now() + chrono::Duration::seconds(lifetime_secs);
            let mut cached = self.cached_token.write().await;
            *cached = Some((auth_response.access_token.clone(), expiry_time));
        }

        info!("M-Pesa access token obtained");
        Ok(auth_response.access_token)
    }

    async fn invalidate_token(&self) {
        let mut cached = self.cached_token.write().await;
        *cached = None;
    }

    /// C2B: Customer to Business
    pub async fn initiate_stk_push(&self, params: &StkPushParams) -> Result<GatewayAck, GatewayError> {
        info!("C2B: STK push for {} - KSh {}", params.phone_number, params.amount);

        let amount = whole_units(params.amount).ok_or_else(|| {
            GatewayError::InvalidRequest(format!("amount {} is not a whole number of shillings", params.amount))
        })?;

        let access_token = self.get_access_token().await?;
        let timestamp = Utc::now().format("%Y%m%d%H%M%S").to_string();
        let password = self.generate_password(&timestamp);

        let (_, stk_url) = self.config.get_mpesa_urls();

        let stk_request = StkPushRequest {
            business_short_code: self.config.mpesa_short_code.clone(),
            password,
            timestamp,
            transaction_type: TRANSACTION_TYPE.to_string(),
            amount,
            party_a: params.phone_number.clone(),
            party_b: self.config.mpesa_short_code.clone(),
            phone_number: params.phone_number.clone(),
            callback_url: params.callback_url.clone(),
            account_reference: params.account_reference.clone(),
            transaction_desc: params.transaction_desc.clone(),
        };

        let response = self
            .client
            .post(&stk_url)
            .header(header::AUTHORIZATION, format!("Bearer {}", access_token))
            .header(header::CONTENT_TYPE, "application/json")
            .json(&stk_request)
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            self.invalidate_token().await;
            return Err(GatewayError::Auth("access token rejected".to_string()));
        }

        let body = response.text().await?;
        let ack = parse_stk_response(status, &body)?;

        if ack.is_accepted() {
            info!(
                "C2B initiated: {}",
                ack.checkout_request_id.as_deref().unwrap_or_default()
            );
        } else {
            warn!("C2B rejected: {} - {:?}", ack.response_code, ack.error_message);
        }
        Ok(ack)
    }
}

#[async_trait]
impl PaymentGateway for MpesaService {
    async fn initiate_payment(&self, params: &StkPushParams) -> Result<GatewayAck, GatewayError> {
        self.initiate_stk_push(params).await
    }
}

pub fn stk_password(short_code: &str, passkey: &str, timestamp: &str) -> String {
    base64.encode(format!("{}{}{}", short_code, passkey, timestamp))
}

/// Daraja only accepts whole shillings; anything else is refused rather than
/// rounded.
pub fn whole_units(amount: Decimal) -> Option<String> {
    if !amount.fract().is_zero() || amount < Decimal::ONE {
        return None;
    }
    Some(amount.normalize().to_string())
}

/// Maps an STK push HTTP response onto an acknowledgment. Daraja error bodies
/// become rejected acknowledgments; anything else that does not decode is an
/// error.
pub fn parse_stk_response(status: StatusCode, body: &str) -> Result<GatewayAck, GatewayError> {
    if status.is_success() {
        if let Ok(response) = serde_json::from_str::<StkPushResponse>(body) {
            return Ok(response.into());
        }
    }

    if let Ok(rejection) = serde_json::from_str::<DarajaErrorResponse>(body) {
        return Ok(rejection.into());
    }

    error!("C2B failed: {} - {}", status, body);
    Err(GatewayError::UnexpectedResponse {
        status: status.as_u16(),
        body: body.to_string(),
    })
}
