pub mod factory;
pub mod traits;

pub use factory::TransportClientFactory;
pub use traits::{TransportClient, TransportConnector};
