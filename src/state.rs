//! Shared application state injected into every handler.

use std::sync::Arc;

use crate::finik::{FinikClient, WebhookValidator};
use crate::repositories::{TransactionRepository, UserRepository};
use crate::services::payment_service::PaymentSettings;

#[derive(Clone)]
pub struct AppState {
    pub transactions: Arc<dyn TransactionRepository>,
    pub users: Arc<dyn UserRepository>,
    pub finik: Arc<FinikClient>,
    pub validator: Arc<WebhookValidator>,
    pub payment_settings: Arc<PaymentSettings>,
    /// When false, a bad webhook signature is logged and the callback still processed.
    pub enforce_signatures: bool,
    /// HS256 secret for bearer tokens.
    pub jwt_secret: Arc<str>,
}
