//! Finik acquiring API integration.
//!
//! Outbound requests are signed and inbound callbacks are verified against
//! the same canonical request string:
//!
//! ```text
//! <method>\n<path>\n<host + x-api-* headers>\n[<query>\n]<sorted JSON body>
//! ```

pub mod client;
pub mod signer;
pub mod validator;

pub use client::{FinikClient, FinikError, PaymentCreated, PaymentRequest};
pub use signer::SigningError;
pub use validator::WebhookValidator;
