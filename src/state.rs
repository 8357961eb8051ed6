use std::sync::Arc;

use crate::database::PaymentStore;
use crate::services::gateway::PaymentGateway;
use crate::services::payment_service::PaymentService;

#[derive(Clone)]
pub struct AppState {
    pub payments: PaymentService,
}

impl AppState {
    pub fn new(
        gateway: Arc<dyn PaymentGateway>,
        store: Arc<dyn PaymentStore>,
        callback_url: impl Into<String>,
    ) -> Self {
        AppState {
            payments: PaymentService::new(gateway, store, callback_url),
        }
    }
}
