pub mod audit;
pub mod contract;
pub mod session;

pub use audit::*;
pub use contract::*;
pub use session::*;
