//! Conduit Governance Library
//!
//! This library composes service governance around the remote invoker including:
//! - Cache-aside result caching with tenant isolation
//! - Try-Confirm-Cancel transaction coordination
//! - The invocation pipeline (cache -> transaction -> invoker)

pub mod caching;
pub mod pipeline;
pub mod tcc;

// Re-export commonly used types
pub use caching::{CacheLookup, CacheStats, CacheStore, CachingInterceptor, MemoryCacheStore};
pub use pipeline::InvocationPipeline;
pub use tcc::{
    TccCoordinator, TccParticipant, TransactionOutcome, TransactionReport, TransactionScope,
    TransactionStatus,
};
