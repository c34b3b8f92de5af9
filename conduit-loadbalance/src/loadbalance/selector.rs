use conduit_core::{Endpoint, Route, RpcError};
use parking_lot::RwLock;
use rand::distr::weighted::WeightedIndex;
use rand::distr::Distribution;
use rand::Rng;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// 一次端点选择的输入
#[derive(Debug, Clone, Copy)]
pub struct SelectContext<'a> {
    pub operation_id: &'a str,
    pub endpoints: &'a [Endpoint],
    pub hash_key: Option<&'a str>,
}

impl<'a> SelectContext<'a> {
    pub fn new(operation_id: &'a str, endpoints: &'a [Endpoint]) -> Self {
        Self {
            operation_id,
            endpoints,
            hash_key: None,
        }
    }

    pub fn for_route(operation_id: &'a str, route: &'a Route) -> Self {
        Self::new(operation_id, &route.endpoints)
    }

    pub fn with_hash_key(mut self, hash_key: Option<&'a str>) -> Self {
        self.hash_key = hash_key;
        self
    }
}

/// 端点选择策略
///
/// 实现只需要在非空的已启用端点中做选择，禁用端点的过滤由 `select` 统一完成。
pub trait EndpointSelector: Send + Sync {
    fn name(&self) -> &str;

    fn choose<'a>(
        &self,
        context: &SelectContext<'a>,
        candidates: &[&'a Endpoint],
    ) -> Result<&'a Endpoint, RpcError>;

    fn select<'a>(&self, context: &SelectContext<'a>) -> Result<&'a Endpoint, RpcError> {
        let candidates: Vec<&'a Endpoint> =
            context.endpoints.iter().filter(|e| e.enabled).collect();

        if candidates.is_empty() {
            tracing::warn!(
                "No enabled endpoint left for operation '{}' ({} configured)",
                context.operation_id,
                context.endpoints.len()
            );
            return Err(RpcError::NoRouteAvailable {
                operation_id: context.operation_id.to_string(),
            });
        }

        self.choose(context, &candidates)
    }
}

/// 按地址选择指定端点，端点不存在或被禁用时不会回退到其他端点
pub fn select_pinned<'a>(route: &'a Route, address: &str) -> Result<&'a Endpoint, RpcError> {
    route
        .find_enabled(address)
        .ok_or_else(|| RpcError::PinnedEndpointUnavailable {
            service_id: route.service_id.clone(),
            address: address.to_string(),
        })
}

/// 随机选择
#[derive(Debug, Default)]
pub struct RandomSelector;

impl RandomSelector {
    pub(crate) fn pick<'a>(candidates: &[&'a Endpoint]) -> &'a Endpoint {
        let mut rng = rand::rng();
        candidates[rng.random_range(0..candidates.len())]
    }
}

impl EndpointSelector for RandomSelector {
    fn name(&self) -> &str {
        "random"
    }

    fn choose<'a>(
        &self,
        _context: &SelectContext<'a>,
        candidates: &[&'a Endpoint],
    ) -> Result<&'a Endpoint, RpcError> {
        Ok(Self::pick(candidates))
    }
}

/// 轮询选择，每个操作独立计数
#[derive(Debug, Default)]
pub struct RoundRobinSelector {
    counters: RwLock<HashMap<String, Arc<AtomicUsize>>>,
}

impl RoundRobinSelector {
    pub fn new() -> Self {
        Self::default()
    }

    fn counter(&self, operation_id: &str) -> Arc<AtomicUsize> {
        if let Some(counter) = self.counters.read().get(operation_id) {
            return counter.clone();
        }
        self.counters
            .write()
            .entry(operation_id.to_string())
            .or_default()
            .clone()
    }
}

impl EndpointSelector for RoundRobinSelector {
    fn name(&self) -> &str {
        "round_robin"
    }

    fn choose<'a>(
        &self,
        context: &SelectContext<'a>,
        candidates: &[&'a Endpoint],
    ) -> Result<&'a Endpoint, RpcError> {
        let index =
            self.counter(context.operation_id).fetch_add(1, Ordering::Relaxed) % candidates.len();
        Ok(candidates[index])
    }
}

/// 按权重随机选择，只考虑权重为正的端点
#[derive(Debug, Default)]
pub struct WeightedSelector;

impl EndpointSelector for WeightedSelector {
    fn name(&self) -> &str {
        "weighted"
    }

    fn choose<'a>(
        &self,
        context: &SelectContext<'a>,
        candidates: &[&'a Endpoint],
    ) -> Result<&'a Endpoint, RpcError> {
        let weighted: Vec<&'a Endpoint> = candidates
            .iter()
            .copied()
            .filter(|e| e.weight.is_finite() && e.weight > 0.0)
            .collect();

        let no_route = || RpcError::NoRouteAvailable {
            operation_id: context.operation_id.to_string(),
        };

        if weighted.is_empty() {
            tracing::warn!(
                "No endpoint with positive weight for operation '{}'",
                context.operation_id
            );
            return Err(no_route());
        }

        let weights: Vec<f64> = weighted.iter().map(|e| e.weight).collect();
        let dist = WeightedIndex::new(&weights).map_err(|e| {
            tracing::error!(
                "Invalid endpoint weights for operation '{}': {}",
                context.operation_id,
                e
            );
            no_route()
        })?;
        let mut rng = rand::rng();
        Ok(weighted[dist.sample(&mut rng)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn create_test_endpoints() -> Vec<Endpoint> {
        vec![
            Endpoint::tcp("10.0.0.1", 2200),
            Endpoint::tcp("10.0.0.2", 2200),
            Endpoint::tcp("10.0.0.3", 2200),
        ]
    }

    #[test]
    fn test_round_robin_cycles_in_order() {
        let endpoints = create_test_endpoints();
        let selector = RoundRobinSelector::new();
        let context = SelectContext::new("order.create", &endpoints);

        let picked: Vec<String> = (0..6)
            .map(|_| selector.select(&context).unwrap().host.clone())
            .collect();
        assert_eq!(
            picked,
            vec!["10.0.0.1", "10.0.0.2", "10.0.0.3", "10.0.0.1", "10.0.0.2", "10.0.0.3"]
        );

        // 不同操作的计数互不影响
        let other = SelectContext::new("order.cancel", &endpoints);
        assert_eq!(selector.select(&other).unwrap().host, "10.0.0.1");
    }

    #[test]
    fn test_disabled_endpoints_are_skipped() {
        let mut endpoints = create_test_endpoints();
        endpoints[1] = endpoints[1].clone().disabled();
        let context = SelectContext::new("op", &endpoints);

        for _ in 0..50 {
            assert_ne!(RandomSelector.select(&context).unwrap().host, "10.0.0.2");
        }
    }

    #[test]
    fn test_all_disabled_fails() {
        let endpoints: Vec<Endpoint> = create_test_endpoints()
            .into_iter()
            .map(Endpoint::disabled)
            .collect();
        let context = SelectContext::new("op", &endpoints);

        for selector in [
            Box::new(RandomSelector) as Box<dyn EndpointSelector>,
            Box::new(RoundRobinSelector::new()),
            Box::new(WeightedSelector),
        ] {
            let err = selector.select(&context).unwrap_err();
            assert!(matches!(err, RpcError::NoRouteAvailable { .. }));
        }
    }

    #[test]
    fn test_weighted_distribution_bias() {
        let endpoints = vec![
            Endpoint::tcp("10.0.0.1", 2200).with_weight(0.8),
            Endpoint::tcp("10.0.0.2", 2200).with_weight(0.2),
            Endpoint::tcp("10.0.0.3", 2200).with_weight(0.0),
        ];
        let context = SelectContext::new("op", &endpoints);

        let mut selections: HashMap<String, u32> = HashMap::new();
        for _ in 0..2000 {
            let endpoint = WeightedSelector.select(&context).unwrap();
            *selections.entry(endpoint.host.clone()).or_insert(0) += 1;
        }

        let heavy = selections.get("10.0.0.1").copied().unwrap_or(0);
        let light = selections.get("10.0.0.2").copied().unwrap_or(0);
        assert!(heavy > light * 2, "heavy={heavy} light={light}");
        assert!(!selections.contains_key("10.0.0.3"));
    }

    #[test]
    fn test_weighted_without_positive_weight_fails() {
        let endpoints = vec![Endpoint::tcp("10.0.0.1", 2200).with_weight(0.0)];
        let context = SelectContext::new("op", &endpoints);
        let err = WeightedSelector.select(&context).unwrap_err();
        assert!(matches!(err, RpcError::NoRouteAvailable { .. }));
    }

    #[test]
    fn test_pinned_selection_is_exact() {
        let mut endpoints = create_test_endpoints();
        endpoints[2] = endpoints[2].clone().disabled();
        let route = Route::new("order", endpoints);

        for _ in 0..10 {
            assert_eq!(
                select_pinned(&route, "10.0.0.2:2200").unwrap().host,
                "10.0.0.2"
            );
        }

        let err = select_pinned(&route, "10.0.0.3:2200").unwrap_err();
        assert!(matches!(err, RpcError::PinnedEndpointUnavailable { .. }));
        let err = select_pinned(&route, "10.0.0.9:2200").unwrap_err();
        assert!(matches!(err, RpcError::PinnedEndpointUnavailable { .. }));
    }
}
