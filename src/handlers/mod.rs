//! HTTP request handlers (route handlers).
//!
//! Each handler is an async function that:
//! 1. Receives HTTP request data (JSON body, URL params, etc.)
//! 2. Delegates to a service
//! 3. Returns HTTP response (JSON, status code)

/// Liveness and database connectivity
pub mod health;

/// Payment creation, polling, and transaction history
pub mod payments;

/// Processor callbacks
pub mod webhooks;
