//! Conduit Core Library
//!
//! This library provides core functionality for the Conduit RPC client including:
//! - Configuration management
//! - Routing types (endpoints, routes, service operations)
//! - Invocation context and error taxonomy
//! - Transport client abstractions and pooling

pub mod config;
pub mod context;
pub mod error;
pub mod operation;
pub mod route;
pub mod serializer;
pub mod transport;
pub mod types;

// Re-export commonly used types
pub use config::model::{Config, GlobalSettings, OperationConfig, ServiceConfig};
pub use context::{attachment_keys, InvocationContext};
pub use error::{RpcError, TransportError};
pub use operation::{
    CacheRule, CachingMethod, CompiledCacheRule, GovernanceOptions, KeyTemplate,
    ServiceOperation, ServiceOperationBuilder, ShuntStrategy,
};
pub use route::{RouteCache, RouteProvider};
pub use serializer::{JsonSerializer, Serializer};
pub use transport::{TransportClient, TransportClientFactory, TransportConnector};
pub use types::{
    Endpoint, RemoteInvokeMessage, RemoteResultMessage, Route, ServiceProtocol, StatusCode,
};
