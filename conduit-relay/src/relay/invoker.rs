use super::filter::ClientFilter;
use super::guard::HealthGuard;
use conduit_core::{
    Endpoint, InvocationContext, JsonSerializer, RemoteInvokeMessage, Route, RouteProvider,
    RpcError, Serializer, ServiceOperation, TransportClientFactory,
};
use conduit_loadbalance::{HealthLedger, SelectorRegistry};
use serde_json::Value;
use std::sync::Arc;

/// 远程调用器
///
/// 负责一次远程调用的完整流程：解析路由、选择端点、获取连接、执行过滤器、发送请求并记录端点健康。
/// 调用器内部不做重试。
pub struct RemoteInvoker {
    routes: Arc<dyn RouteProvider>,
    selectors: Arc<SelectorRegistry>,
    ledger: Arc<HealthLedger>,
    clients: Arc<TransportClientFactory>,
    serializer: Arc<dyn Serializer>,
    filters: Vec<Arc<dyn ClientFilter>>,
}

impl RemoteInvoker {
    pub fn new(
        routes: Arc<dyn RouteProvider>,
        selectors: Arc<SelectorRegistry>,
        ledger: Arc<HealthLedger>,
        clients: Arc<TransportClientFactory>,
    ) -> Self {
        Self {
            routes,
            selectors,
            ledger,
            clients,
            serializer: Arc::new(JsonSerializer),
            filters: Vec::new(),
        }
    }

    pub fn with_serializer(mut self, serializer: Arc<dyn Serializer>) -> Self {
        self.serializer = serializer;
        self
    }

    /// 添加过滤器，过滤器按 `order` 升序执行
    pub fn with_filter(mut self, filter: Arc<dyn ClientFilter>) -> Self {
        self.filters.push(filter);
        self.filters.sort_by_key(|f| f.order());
        self
    }

    pub fn ledger(&self) -> &Arc<HealthLedger> {
        &self.ledger
    }

    pub fn clients(&self) -> &Arc<TransportClientFactory> {
        &self.clients
    }

    /// 执行一次远程调用
    pub async fn invoke(
        &self,
        operation: &ServiceOperation,
        args: Vec<Value>,
        context: &InvocationContext,
    ) -> Result<Value, RpcError> {
        let route = self.resolve_route(operation)?;

        let hash_key = operation.hash_key(&args);
        let endpoint = self
            .selectors
            .select_for_route(
                &route,
                operation.id(),
                operation.governance().selector_name(),
                hash_key.as_deref(),
                context.pinned_endpoint(),
            )?
            .clone();

        self.log_selection(operation, &route, &endpoint);

        let guard = HealthGuard::start(self.ledger.clone(), operation.id(), &endpoint);
        let result = self.dispatch(operation, args, context, &endpoint).await;

        match &result {
            Ok(_) => guard.success(),
            Err(e) => {
                tracing::warn!(
                    "Invocation of {} on {} failed after {}ms: {}",
                    operation.id(),
                    endpoint,
                    guard.elapsed().as_millis(),
                    e
                );
                guard.failure();
            }
        }

        result
    }

    fn resolve_route(&self, operation: &ServiceOperation) -> Result<Arc<Route>, RpcError> {
        let route = self
            .routes
            .get_route(operation.service_id())
            .ok_or_else(|| {
                tracing::error!(
                    "Service route could not be found for service '{}'",
                    operation.service_id()
                );
                RpcError::RouteNotFound {
                    service_id: operation.service_id().to_string(),
                    operation_id: operation.id().to_string(),
                }
            })?;

        if !route.is_routable() {
            tracing::warn!(
                "Service '{}' has no enabled endpoint, operation '{}' rejected",
                operation.service_id(),
                operation.id()
            );
            return Err(RpcError::NoHealthyEndpoint {
                service_id: operation.service_id().to_string(),
                operation_id: operation.id().to_string(),
            });
        }

        Ok(route)
    }

    fn log_selection(&self, operation: &ServiceOperation, route: &Route, endpoint: &Endpoint) {
        if !tracing::enabled!(tracing::Level::DEBUG) {
            return;
        }

        let enabled: Vec<Value> = route
            .enabled_endpoints()
            .iter()
            .map(|e| Value::String(e.address()))
            .collect();
        let candidates = self
            .serializer
            .serialize(&Value::Array(enabled))
            .unwrap_or_else(|e| format!("<unserializable: {e}>"));

        tracing::debug!(
            "Selected endpoint {} for {} using {} from {}",
            endpoint,
            operation.id(),
            operation.governance().selector_name(),
            candidates
        );
    }

    async fn dispatch(
        &self,
        operation: &ServiceOperation,
        args: Vec<Value>,
        context: &InvocationContext,
        endpoint: &Endpoint,
    ) -> Result<Value, RpcError> {
        let client = self.clients.get_client(endpoint).await?;

        let mut message = RemoteInvokeMessage::new(
            operation.service_id(),
            operation.id(),
            args,
            context.to_attachments(),
        );
        for filter in &self.filters {
            filter.on_executing(context, &mut message);
        }

        let result = match client.send(message).await {
            Ok(result) => result,
            Err(e) => {
                self.clients.evict(endpoint).await;
                return Err(e.into());
            }
        };

        for filter in &self.filters {
            filter.on_executed(context, &result);
        }

        if !result.is_success() {
            return Err(RpcError::RemoteExecutionFailure {
                status: result.status_code,
                message: result.exception_message.unwrap_or_default(),
            });
        }

        Ok(result.result)
    }
}
