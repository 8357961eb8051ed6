// config.rs
use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::errors::{AppError, Result};

/// Which record store backs the payment flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Mongo,
    Memory,
}

impl FromStr for StoreBackend {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mongo" | "mongodb" => Ok(StoreBackend::Mongo),
            "memory" | "cache" => Ok(StoreBackend::Memory),
            other => Err(AppError::configuration(format!(
                "PAYMENT_STORE must be 'mongo' or 'memory', got '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub mpesa_consumer_key: String,
    pub mpesa_consumer_secret: String,
    pub mpesa_short_code: String,
    pub mpesa_passkey: String,
    pub mpesa_callback_url: String,
    pub mpesa_environment: String,
    pub store_backend: StoreBackend,
    pub database_url: Option<String>,
    pub database_name: String,
    pub pending_ttl: Duration,
    pub port: u16,
    pub host: String,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the config from an arbitrary key lookup so tests do not have to
    /// touch the process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &str| -> Result<String> {
            lookup(key)
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| AppError::configuration(format!("{} must be set", key)))
        };

        let store_backend = match lookup("PAYMENT_STORE") {
            Some(value) => value.parse()?,
            None => StoreBackend::Mongo,
        };

        let database_url = lookup("DATABASE_URL").filter(|v| !v.trim().is_empty());
        if store_backend == StoreBackend::Mongo && database_url.is_none() {
            return Err(AppError::configuration(
                "DATABASE_URL must be set when PAYMENT_STORE is mongo",
            ));
        }

        let pending_ttl_secs: u64 = lookup("PENDING_TTL_SECS")
            .unwrap_or_else(|| "300".to_string())
            .parse()
            .map_err(|_| AppError::configuration("PENDING_TTL_SECS must be a number"))?;
        // A zero TTL would expire every attempt before its callback arrives.
        if pending_ttl_secs == 0 {
            return Err(AppError::configuration(
                "PENDING_TTL_SECS must be greater than 0",
            ));
        }

        let port: u16 = lookup("PORT")
            .unwrap_or_else(|| "8000".to_string())
            .parse()
            .map_err(|_| AppError::configuration("PORT must be a number"))?;

        Ok(AppConfig {
            mpesa_consumer_key: required("MPESA_CONSUMER_KEY")?,
            mpesa_consumer_secret: required("MPESA_CONSUMER_SECRET")?,
            mpesa_short_code: required("MPESA_SHORT_CODE")?,
            mpesa_passkey: required("MPESA_PASSKEY")?,
            mpesa_callback_url: required("MPESA_CALLBACK_URL")?,
            mpesa_environment: lookup("MPESA_ENVIRONMENT")
                .unwrap_or_else(|| "sandbox".to_string()),
            store_backend,
            database_url,
            database_name: lookup("DATABASE_NAME").unwrap_or_else(|| "mpesa".to_string()),
            pending_ttl: Duration::from_secs(pending_ttl_secs),
            port,
            host: lookup("HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
        })
    }

    /// Returns `(auth_url, stk_url)` for the configured environment.
    pub fn get_mpesa_urls(&self) -> (String, String) {
        let base_url = if self.is_production() {
            "https://api.safaricom.co.ke"
        } else {
            "https://sandbox.safaricom.co.ke"
        };

        let auth_url = format!("{}/oauth/v1/generate?grant_type=client_credentials", base_url);
        let stk_url = format!("{}/mpesa/stkpush/v1/processrequest", base_url);

        (auth_url, stk_url)
    }

    pub fn is_production(&self) -> bool {
        self.mpesa_environment == "production"
    }

    pub fn get_config_info(&self) -> serde_json::Value {
        serde_json::json!({
            "environment": self.mpesa_environment,
            "is_production": self.is_production(),
            "business_shortcode": self.mpesa_short_code,
            "callback_url": self.mpesa_callback_url,
            "consumer_key_set": !self.mpesa_consumer_key.is_empty(),
            "consumer_secret_set": !self.mpesa_consumer_secret.is_empty(),
            "store": format!("{:?}", self.store_backend).to_lowercase(),
            "pending_ttl_secs": self.pending_ttl.as_secs(),
            "port": self.port,
            "host": self.host,
        })
    }
}
