use super::traits::{TransportClient, TransportConnector};
use crate::error::TransportError;
use crate::types::{Endpoint, ServiceProtocol};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::OnceCell;

type ClientSlot = Arc<OnceCell<Arc<dyn TransportClient>>>;

/// 传输客户端工厂
///
/// 每个端点身份（`protocol://host:port`）只持有一个客户端，由所有并发调用共享。
/// 连接器按协议注册，新的传输实现只需要注册对应的连接器。
///
/// 连接在端点自己的槽位上建立，池的映射锁只在查找槽位时短暂持有，
/// 一个端点连接缓慢不会阻塞其他端点的调用。
pub struct TransportClientFactory {
    connectors: RwLock<HashMap<ServiceProtocol, Arc<dyn TransportConnector>>>,
    slots: Mutex<HashMap<String, ClientSlot>>,
}

impl TransportClientFactory {
    pub fn new() -> Self {
        Self {
            connectors: RwLock::new(HashMap::new()),
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// 使用同一个连接器处理所有协议
    pub fn with_connector(connector: Arc<dyn TransportConnector>) -> Self {
        let factory = Self::new();
        for protocol in [ServiceProtocol::Tcp, ServiceProtocol::Http, ServiceProtocol::Ws] {
            factory.register_connector(protocol, connector.clone());
        }
        factory
    }

    /// 注册协议对应的连接器
    pub fn register_connector(
        &self,
        protocol: ServiceProtocol,
        connector: Arc<dyn TransportConnector>,
    ) {
        tracing::info!("Registered transport connector for protocol: {}", protocol);
        self.connectors.write().insert(protocol, connector);
    }

    pub fn supports_protocol(&self, protocol: ServiceProtocol) -> bool {
        self.connectors.read().contains_key(&protocol)
    }

    /// 获取端点对应的客户端，不存在时建立连接并放入池中
    ///
    /// 同一端点的并发调用只会触发一次连接；连接失败时槽位保持为空，下次调用重试。
    pub async fn get_client(
        &self,
        endpoint: &Endpoint,
    ) -> Result<Arc<dyn TransportClient>, TransportError> {
        let key = endpoint.descriptor();
        let slot = self.slot(&key);
        if let Some(client) = slot.get() {
            return Ok(client.clone());
        }

        let connector = self
            .connectors
            .read()
            .get(&endpoint.protocol)
            .cloned()
            .ok_or_else(|| TransportError::Connect {
                address: key.clone(),
                message: format!("no connector registered for protocol {}", endpoint.protocol),
            })?;

        let client = slot
            .get_or_try_init(|| async {
                tracing::debug!("Creating transport client for {}", key);
                connector.connect(endpoint).await
            })
            .await?;
        Ok(client.clone())
    }

    fn slot(&self, key: &str) -> ClientSlot {
        self.slots
            .lock()
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone()
    }

    /// 移除端点的客户端，下次调用时重新连接
    pub async fn evict(&self, endpoint: &Endpoint) -> bool {
        let key = endpoint.descriptor();
        let removed = {
            let mut slots = self.slots.lock();
            match slots.get(&key) {
                Some(slot) if slot.initialized() => slots.remove(&key).is_some(),
                _ => false,
            }
        };
        if removed {
            tracing::warn!("Evicted transport client for {}", key);
        }
        removed
    }

    /// 已建立连接的客户端数量
    pub async fn pooled_count(&self) -> usize {
        self.slots
            .lock()
            .values()
            .filter(|slot| slot.initialized())
            .count()
    }

    pub async fn clear(&self) {
        self.slots.lock().clear();
    }
}

impl Default for TransportClientFactory {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{RemoteInvokeMessage, RemoteResultMessage};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct EchoClient {
        endpoint: String,
    }

    #[async_trait]
    impl TransportClient for EchoClient {
        async fn send(
            &self,
            message: RemoteInvokeMessage,
        ) -> Result<RemoteResultMessage, TransportError> {
            Ok(RemoteResultMessage::success(json!(message.operation_id)))
        }

        fn endpoint(&self) -> &str {
            &self.endpoint
        }
    }

    #[derive(Default)]
    struct CountingConnector {
        connects: AtomicUsize,
    }

    #[async_trait]
    impl TransportConnector for CountingConnector {
        async fn connect(
            &self,
            endpoint: &Endpoint,
        ) -> Result<Arc<dyn TransportClient>, TransportError> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(EchoClient {
                endpoint: endpoint.descriptor(),
            }))
        }
    }

    #[tokio::test]
    async fn test_client_is_reused_per_endpoint() {
        let connector = Arc::new(CountingConnector::default());
        let factory = Arc::new(TransportClientFactory::with_connector(connector.clone()));
        let endpoint = Endpoint::tcp("10.0.0.1", 2200);

        let mut handles = Vec::new();
        for _ in 0..16 {
            let factory = factory.clone();
            let endpoint = endpoint.clone();
            handles.push(tokio::spawn(async move {
                factory.get_client(&endpoint).await.map(|c| c.endpoint().to_string())
            }));
        }
        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), "tcp://10.0.0.1:2200");
        }

        assert_eq!(connector.connects.load(Ordering::SeqCst), 1);
        assert_eq!(factory.pooled_count().await, 1);

        factory.get_client(&Endpoint::tcp("10.0.0.2", 2200)).await.unwrap();
        assert_eq!(connector.connects.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_evict_forces_reconnect() {
        let connector = Arc::new(CountingConnector::default());
        let factory = TransportClientFactory::with_connector(connector.clone());
        let endpoint = Endpoint::tcp("10.0.0.1", 2200);

        factory.get_client(&endpoint).await.unwrap();
        assert!(factory.evict(&endpoint).await);
        assert!(!factory.evict(&endpoint).await);
        factory.get_client(&endpoint).await.unwrap();
        assert_eq!(connector.connects.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_missing_connector() {
        let factory = TransportClientFactory::new();
        factory.register_connector(ServiceProtocol::Http, Arc::new(CountingConnector::default()));
        assert!(factory.supports_protocol(ServiceProtocol::Http));

        let err = factory.get_client(&Endpoint::tcp("10.0.0.1", 2200)).await.err();
        assert!(matches!(err, Some(TransportError::Connect { .. })));
    }

    /// 指定主机的连接永远不会完成
    struct StallingConnector {
        stalled_host: &'static str,
    }

    #[async_trait]
    impl TransportConnector for StallingConnector {
        async fn connect(
            &self,
            endpoint: &Endpoint,
        ) -> Result<Arc<dyn TransportClient>, TransportError> {
            if endpoint.host == self.stalled_host {
                tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
            }
            Ok(Arc::new(EchoClient {
                endpoint: endpoint.descriptor(),
            }))
        }
    }

    #[tokio::test]
    async fn test_slow_connect_does_not_block_other_endpoints() {
        use std::time::Duration;

        let factory = Arc::new(TransportClientFactory::with_connector(Arc::new(
            StallingConnector {
                stalled_host: "10.0.0.10",
            },
        )));
        let pooled = Endpoint::tcp("10.0.0.2", 2200);
        factory.get_client(&pooled).await.unwrap();

        let stalled = {
            let factory = factory.clone();
            tokio::spawn(async move {
                factory.get_client(&Endpoint::tcp("10.0.0.10", 2200)).await
            })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        let client = tokio::time::timeout(Duration::from_millis(500), factory.get_client(&pooled))
            .await
            .expect("pooled endpoint must not wait for another endpoint's connect")
            .unwrap();
        assert_eq!(client.endpoint(), "tcp://10.0.0.2:2200");

        let fresh = Endpoint::tcp("10.0.0.3", 2200);
        tokio::time::timeout(Duration::from_millis(500), factory.get_client(&fresh))
            .await
            .expect("new endpoint must connect while another connect is pending")
            .unwrap();

        // 未完成的连接不计入池
        assert_eq!(factory.pooled_count().await, 2);
        stalled.abort();
    }

    #[tokio::test]
    async fn test_failed_connect_is_retried() {
        struct FlakyConnector {
            attempts: AtomicUsize,
        }

        #[async_trait]
        impl TransportConnector for FlakyConnector {
            async fn connect(
                &self,
                endpoint: &Endpoint,
            ) -> Result<Arc<dyn TransportClient>, TransportError> {
                if self.attempts.fetch_add(1, Ordering::SeqCst) == 0 {
                    return Err(TransportError::Connect {
                        address: endpoint.address(),
                        message: "connection refused".to_string(),
                    });
                }
                Ok(Arc::new(EchoClient {
                    endpoint: endpoint.descriptor(),
                }))
            }
        }

        let factory = TransportClientFactory::with_connector(Arc::new(FlakyConnector {
            attempts: AtomicUsize::new(0),
        }));
        let endpoint = Endpoint::tcp("10.0.0.1", 2200);

        assert!(factory.get_client(&endpoint).await.is_err());
        assert_eq!(factory.pooled_count().await, 0);
        assert!(factory.get_client(&endpoint).await.is_ok());
        assert_eq!(factory.pooled_count().await, 1);
    }
}
