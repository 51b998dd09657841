// Shared types
pub mod request_meta;

pub use request_meta::*;
