// Business domains
pub mod confirmation;
