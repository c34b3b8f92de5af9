use async_trait::async_trait;
use conduit_core::RpcError;
use futures::future::BoxFuture;
use serde_json::Value;

/// `get_or_add` 的结果：命中缓存或由工厂加载
#[derive(Debug, Clone, PartialEq)]
pub enum CacheLookup {
    Hit(Value),
    Loaded(Value),
}

impl CacheLookup {
    pub fn is_hit(&self) -> bool {
        matches!(self, CacheLookup::Hit(_))
    }

    pub fn into_value(self) -> Value {
        match self {
            CacheLookup::Hit(value) | CacheLookup::Loaded(value) => value,
        }
    }
}

/// 缓存存储
///
/// 每个操作都显式传入缓存名称，不同缓存之间的键互不影响。
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, cache_name: &str, key: &str) -> Result<Option<Value>, RpcError>;

    async fn set(&self, cache_name: &str, key: &str, value: Value) -> Result<(), RpcError>;

    async fn remove(&self, cache_name: &str, key: &str) -> Result<bool, RpcError>;

    /// 删除所有以 `prefix` 开头的键，返回删除数量
    async fn remove_by_prefix(&self, cache_name: &str, prefix: &str) -> Result<usize, RpcError>;

    /// 读取缓存，未命中时执行工厂并写入结果
    ///
    /// 工厂失败时不写入缓存。工厂成功后写入失败只记录日志，仍返回加载的结果。
    async fn get_or_add(
        &self,
        cache_name: &str,
        key: &str,
        factory: BoxFuture<'_, Result<Value, RpcError>>,
    ) -> Result<CacheLookup, RpcError> {
        if let Some(value) = self.get(cache_name, key).await? {
            return Ok(CacheLookup::Hit(value));
        }

        let value = factory.await?;
        if let Err(e) = self.set(cache_name, key, value.clone()).await {
            tracing::error!(
                "Failed to populate cache '{}' key {} after load: {}",
                cache_name,
                key,
                e
            );
        }
        Ok(CacheLookup::Loaded(value))
    }
}
