pub mod metrics;
pub mod payment;
