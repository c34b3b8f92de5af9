use super::consistent_hash::{ConsistentHashSelector, DEFAULT_VIRTUAL_NODES};
use super::selector::{
    select_pinned, EndpointSelector, RandomSelector, RoundRobinSelector, SelectContext,
    WeightedSelector,
};
use conduit_core::{Endpoint, Route, RpcError, ShuntStrategy};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// 选择策略注册表
///
/// 按名称保存选择策略，构造时注册默认策略，运行时可以注册自定义策略或覆盖默认策略。
pub struct SelectorRegistry {
    selectors: RwLock<HashMap<String, Arc<dyn EndpointSelector>>>,
}

impl SelectorRegistry {
    /// 创建新的注册表并注册默认策略
    pub fn new() -> Self {
        Self::with_virtual_nodes(DEFAULT_VIRTUAL_NODES)
    }

    pub fn with_virtual_nodes(virtual_nodes: usize) -> Self {
        let registry = Self {
            selectors: RwLock::new(HashMap::new()),
        };
        registry.register_default_selectors(virtual_nodes);
        registry
    }

    fn register_default_selectors(&self, virtual_nodes: usize) {
        let round_robin: Arc<dyn EndpointSelector> = Arc::new(RoundRobinSelector::new());
        let consistent_hash: Arc<dyn EndpointSelector> =
            Arc::new(ConsistentHashSelector::new(virtual_nodes));

        self.register(ShuntStrategy::Random.name(), Arc::new(RandomSelector));
        self.register(ShuntStrategy::RoundRobin.name(), round_robin.clone());
        self.register("polling", round_robin);
        self.register(ShuntStrategy::ConsistentHash.name(), consistent_hash.clone());
        self.register("hash_algorithm", consistent_hash);
        self.register(ShuntStrategy::Weighted.name(), Arc::new(WeightedSelector));
    }

    /// 注册选择策略，同名策略会被替换
    pub fn register(&self, name: &str, selector: Arc<dyn EndpointSelector>) {
        tracing::info!("Registered endpoint selector '{}' ({})", name, selector.name());
        self.selectors.write().insert(name.to_string(), selector);
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn EndpointSelector>, RpcError> {
        self.selectors
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| RpcError::UnknownStrategy(name.to_string()))
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.selectors.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// 为一次调用选择端点
    ///
    /// 存在指定端点时直接返回该端点，否则用名为 `selector` 的策略在路由的启用端点中选择。
    /// `selector` 可以是默认策略名，也可以是通过 [`register`](Self::register) 注册的自定义名称。
    pub fn select_for_route<'a>(
        &self,
        route: &'a Route,
        operation_id: &'a str,
        selector: &str,
        hash_key: Option<&'a str>,
        pinned: Option<&str>,
    ) -> Result<&'a Endpoint, RpcError> {
        if let Some(address) = pinned {
            tracing::debug!(
                "Operation '{}' pinned to endpoint {}",
                operation_id,
                address
            );
            return select_pinned(route, address);
        }

        let selector = self.get(selector)?;
        let context = SelectContext::for_route(operation_id, route).with_hash_key(hash_key);
        selector.select(&context)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.selectors.read().contains_key(name)
    }
}

impl Default for SelectorRegistry {
    fn default() -> Self {
        Self::new()
    }
}
