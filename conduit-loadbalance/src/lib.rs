//! Conduit Load Balance Library
//!
//! This library provides endpoint selection for the Conduit RPC client including:
//! - Endpoint selection strategies (random, round robin, consistent hash, weighted)
//! - Pinned endpoint override
//! - Per operation and endpoint health ledger

pub mod loadbalance;

// Re-export commonly used types
pub use loadbalance::{
    select_pinned, ConsistentHashSelector, EndpointSelector, HealthLedger, HealthSnapshot,
    RandomSelector, RoundRobinSelector, SelectContext, SelectorRegistry, WeightedSelector,
};
