//! Data models representing database entities and API bodies.

/// Payment-route request and response bodies
pub mod payment;
/// Registration payload carried through a payment
pub mod registration;
/// Payment ledger
pub mod transaction;
/// User accounts
pub mod user;
/// Processor callback payload
pub mod webhook;
