pub mod filter;
pub mod guard;
pub mod invoker;

pub use filter::{ClientFilter, TracingFilter};
pub use guard::HealthGuard;
pub use invoker::RemoteInvoker;
