//! Confirmation domain - public contract approval over SMS
//!
//! A confirmation session carries a long-lived link token and a short-lived
//! one-time code. Opening the link and submitting the code transitions the
//! owning contract from draft to approved, entirely outside any
//! authenticated session.
//!
//! Responsibilities:
//! - Session issuance, resend throttling, cancellation (manager)
//! - Token resolution and OTP verification (verifier)
//! - Append-only, hash-stamped audit trail
//! - Only hashes of tokens and codes are ever persisted

pub mod error;
pub mod manager;
pub mod models;
pub mod phone;
pub mod postgres;
pub mod repository;
pub mod sms;
pub mod testing;
pub mod token;
pub mod verifier;

pub use error::ConfirmationError;
pub use manager::ConfirmationManager;
pub use verifier::ConfirmationVerifier;
