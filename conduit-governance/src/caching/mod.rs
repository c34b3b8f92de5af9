pub mod interceptor;
pub mod memory;
pub mod store;

pub use interceptor::CachingInterceptor;
pub use memory::{CacheStats, MemoryCacheStore};
pub use store::{CacheLookup, CacheStore};
