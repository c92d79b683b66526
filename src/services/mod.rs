//! Business logic services.
//!
//! Services contain core business logic separated from HTTP handlers.
//! They work against the repository traits, never a database pool directly.

pub mod account_service;
pub mod payment_service;
pub mod webhook_service;
