//! Utility modules: retry and caller deadlines.

pub mod deadline;
pub mod retry;

pub use deadline::CallContext;
pub use retry::RetryPolicy;
