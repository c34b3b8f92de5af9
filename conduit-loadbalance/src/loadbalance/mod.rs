pub mod consistent_hash;
pub mod ledger;
pub mod registry;
pub mod selector;

pub use consistent_hash::ConsistentHashSelector;
pub use ledger::{HealthLedger, HealthSnapshot};
pub use registry::SelectorRegistry;
pub use selector::{
    select_pinned, EndpointSelector, RandomSelector, RoundRobinSelector, SelectContext,
    WeightedSelector,
};
