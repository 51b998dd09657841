// HTTP routes
pub mod confirm;
pub mod health;

pub use confirm::*;
pub use health::*;
