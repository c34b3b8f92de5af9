//! Conduit Relay Library
//!
//! This library dispatches service operations to remote endpoints including:
//! - Remote invoker (route resolution, endpoint selection, pooled transport)
//! - Client filter chain
//! - Health recording guard

pub mod relay;

// Re-export commonly used types
pub use relay::{ClientFilter, HealthGuard, RemoteInvoker, TracingFilter};
