// HTTP middleware
pub mod request_meta;

pub use request_meta::*;
