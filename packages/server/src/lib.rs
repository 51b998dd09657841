// Contract Confirmation Service - API Core
//
// This crate implements the public contract confirmation workflow: a
// customer receives an SMS with a one-time link and a one-time code, and
// submitting the code approves the sales contract without any
// authenticated session.
//
// Domain logic lives in domains/confirmation; the HTTP surface in server/.

pub mod common;
pub mod config;
pub mod domains;
pub mod server;

pub use config::*;
