use crate::error::TransportError;
use crate::types::{Endpoint, RemoteInvokeMessage, RemoteResultMessage};
use async_trait::async_trait;
use std::sync::Arc;

/// 面向单个端点的传输客户端
///
/// 同一个客户端会被并发调用共享，实现需要自行保证线程安全。
#[async_trait]
pub trait TransportClient: Send + Sync {
    async fn send(
        &self,
        message: RemoteInvokeMessage,
    ) -> Result<RemoteResultMessage, TransportError>;

    /// 客户端连接的端点描述（`protocol://host:port`）
    fn endpoint(&self) -> &str;
}

/// 传输连接器，按协议注册到客户端工厂
#[async_trait]
pub trait TransportConnector: Send + Sync {
    async fn connect(
        &self,
        endpoint: &Endpoint,
    ) -> Result<Arc<dyn TransportClient>, TransportError>;
}
