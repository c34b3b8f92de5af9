use crate::types::{Endpoint, Route};
use chrono::Utc;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// 路由提供者
///
/// 调用核心只通过该接口读取路由，路由表由外部的服务发现或健康监控维护。
pub trait RouteProvider: Send + Sync {
    fn get_route(&self, service_id: &str) -> Option<Arc<Route>>;
}

/// 路由缓存
///
/// 读取方拿到的是 `Arc<Route>` 快照，更新时整体替换路由，不会阻塞正在进行的调用。
#[derive(Default)]
pub struct RouteCache {
    routes: RwLock<HashMap<String, Arc<Route>>>,
}

impl RouteCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_routes(routes: impl IntoIterator<Item = Route>) -> Self {
        let cache = Self::new();
        for route in routes {
            cache.update_route(route);
        }
        cache
    }

    /// 写入或替换服务路由
    pub fn update_route(&self, route: Route) {
        tracing::debug!(
            "Updating route for service {} with {} endpoints",
            route.service_id,
            route.endpoints.len()
        );
        self.routes
            .write()
            .insert(route.service_id.clone(), Arc::new(route));
    }

    pub fn remove_route(&self, service_id: &str) -> Option<Arc<Route>> {
        let removed = self.routes.write().remove(service_id);
        if removed.is_some() {
            tracing::info!("Removed route for service {}", service_id);
        }
        removed
    }

    /// 更新端点的启用状态，返回是否找到该端点
    pub fn set_endpoint_enabled(&self, service_id: &str, address: &str, enabled: bool) -> bool {
        let mut routes = self.routes.write();
        let Some(current) = routes.get(service_id) else {
            return false;
        };

        let mut route = Route::clone(current);
        let Some(endpoint) = route
            .endpoints
            .iter_mut()
            .find(|e| e.matches_address(address))
        else {
            return false;
        };

        if endpoint.enabled != enabled {
            endpoint.enabled = enabled;
            if !enabled {
                endpoint.last_disabled_at = Some(Utc::now());
                tracing::warn!("Endpoint {} of service {} disabled", address, service_id);
            } else {
                tracing::info!("Endpoint {} of service {} enabled", address, service_id);
            }
        }

        routes.insert(service_id.to_string(), Arc::new(route));
        true
    }

    /// 向路由追加端点（已存在时替换）
    pub fn upsert_endpoint(&self, service_id: &str, endpoint: Endpoint) {
        let mut routes = self.routes.write();
        let mut route = routes
            .get(service_id)
            .map(|r| Route::clone(r))
            .unwrap_or_else(|| Route::new(service_id, Vec::new()));

        match route.endpoints.iter_mut().find(|e| **e == endpoint) {
            Some(existing) => *existing = endpoint,
            None => route.endpoints.push(endpoint),
        }
        routes.insert(service_id.to_string(), Arc::new(route));
    }

    pub fn service_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.routes.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.routes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.read().is_empty()
    }
}

impl RouteProvider for RouteCache {
    fn get_route(&self, service_id: &str) -> Option<Arc<Route>> {
        self.routes.read().get(service_id).cloned()
    }
}
