pub mod claim;
pub mod conversation;
pub mod execution;
pub mod metrics;
pub mod underwriting;
