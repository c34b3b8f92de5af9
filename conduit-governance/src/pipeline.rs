use crate::caching::{CacheStore, CachingInterceptor, MemoryCacheStore};
use crate::tcc::{TccCoordinator, TccParticipant, TransactionScope};
use conduit_core::{
    Config, InvocationContext, RouteCache, RpcError, ServiceOperation, TransportClientFactory,
    TransportConnector,
};
use conduit_loadbalance::{HealthLedger, SelectorRegistry};
use conduit_relay::{RemoteInvoker, TracingFilter};
use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// 本地进行中的事务，按事务ID索引
#[derive(Default)]
struct ActiveTransactions {
    scopes: RwLock<HashMap<String, Arc<TransactionScope>>>,
}

impl ActiveTransactions {
    fn get(&self, transaction_id: &str) -> Option<Arc<TransactionScope>> {
        self.scopes.read().get(transaction_id).cloned()
    }

    fn enter(&self, scope: Arc<TransactionScope>) -> ActiveTransaction<'_> {
        let transaction_id = scope.transaction_id().to_string();
        self.scopes.write().insert(transaction_id.clone(), scope);
        ActiveTransaction {
            table: self,
            transaction_id,
        }
    }
}

/// 发起方执行期间事务保持登记，结束（或被取消）时移除
struct ActiveTransaction<'a> {
    table: &'a ActiveTransactions,
    transaction_id: String,
}

impl Drop for ActiveTransaction<'_> {
    fn drop(&mut self) {
        self.table.scopes.write().remove(&self.transaction_id);
    }
}

/// 调用管线：缓存拦截 -> 事务协调 -> 远程调用
///
/// 事务操作在本地进行中的事务里调用时登记为该事务的参与者，
/// 否则以自身为唯一参与者发起新事务。参与者的 Confirm/Cancel 调用操作声明的确认/取消操作。
pub struct InvocationPipeline {
    operations: RwLock<HashMap<String, Arc<ServiceOperation>>>,
    invoker: Arc<RemoteInvoker>,
    interceptor: CachingInterceptor,
    coordinator: TccCoordinator,
    transactions: ActiveTransactions,
}

impl InvocationPipeline {
    pub fn new(invoker: Arc<RemoteInvoker>, store: Arc<dyn CacheStore>) -> Self {
        Self {
            operations: RwLock::new(HashMap::new()),
            invoker,
            interceptor: CachingInterceptor::new(store),
            coordinator: TccCoordinator::new(),
            transactions: ActiveTransactions::default(),
        }
    }

    /// 根据配置组装管线，并用配置中的服务端点填充路由缓存
    pub fn from_config(
        config: &Config,
        routes: Arc<RouteCache>,
        connector: Arc<dyn TransportConnector>,
    ) -> anyhow::Result<Self> {
        let selectors = Arc::new(SelectorRegistry::with_virtual_nodes(
            config.settings.consistent_hash_virtual_nodes,
        ));
        Self::from_config_with_selectors(config, routes, connector, selectors)
    }

    /// 与 [`from_config`](Self::from_config) 相同，但使用已注册自定义策略的选择器注册表
    pub fn from_config_with_selectors(
        config: &Config,
        routes: Arc<RouteCache>,
        connector: Arc<dyn TransportConnector>,
        selectors: Arc<SelectorRegistry>,
    ) -> anyhow::Result<Self> {
        config.validate()?;

        let operations = config.build_operations()?;
        for operation in &operations {
            let selector = operation.governance().selector_name();
            if !selectors.contains(selector) {
                anyhow::bail!(
                    "Operation '{}' uses unregistered selector '{}'",
                    operation.id(),
                    selector
                );
            }
        }

        for route in config.build_routes() {
            routes.update_route(route);
        }

        let invoker = RemoteInvoker::new(
            routes,
            selectors,
            Arc::new(HealthLedger::new()),
            Arc::new(TransportClientFactory::with_connector(connector)),
        )
        .with_filter(Arc::new(TracingFilter));

        let store = Arc::new(MemoryCacheStore::new(
            Duration::from_secs(config.settings.cache_ttl_seconds),
            config.settings.cache_max_entries,
        ));

        let pipeline = Self::new(Arc::new(invoker), store);
        for operation in operations {
            pipeline.register(operation);
        }

        tracing::info!(
            "Invocation pipeline ready with {} operations",
            pipeline.operations.read().len()
        );
        Ok(pipeline)
    }

    /// 注册服务操作，同名操作会被替换
    pub fn register(&self, operation: ServiceOperation) {
        tracing::debug!(
            "Registered operation '{}' for service '{}'",
            operation.id(),
            operation.service_id()
        );
        self.operations
            .write()
            .insert(operation.id().to_string(), Arc::new(operation));
    }

    pub fn operation(&self, operation_id: &str) -> Option<Arc<ServiceOperation>> {
        self.operations.read().get(operation_id).cloned()
    }

    pub fn invoker(&self) -> &Arc<RemoteInvoker> {
        &self.invoker
    }

    pub fn cache_store(&self) -> &Arc<dyn CacheStore> {
        self.interceptor.store()
    }

    pub async fn call(
        &self,
        operation_id: &str,
        args: Vec<Value>,
        context: &InvocationContext,
    ) -> Result<Value, RpcError> {
        let operation = self
            .operation(operation_id)
            .ok_or_else(|| RpcError::OperationNotFound(operation_id.to_string()))?;

        self.interceptor
            .intercept(&operation, &args, context, || {
                self.execute(operation.clone(), args.clone(), context)
            })
            .await
    }

    /// 在一个事务中执行多次调用
    ///
    /// `body` 收到带事务ID的上下文，用它调用的事务操作都登记到同一个事务。
    /// 上下文所属事务已在本地进行中时直接加入该事务。
    pub async fn transaction<F, Fut, T>(
        &self,
        context: &InvocationContext,
        body: F,
    ) -> Result<T, RpcError>
    where
        F: FnOnce(InvocationContext) -> Fut,
        Fut: Future<Output = Result<T, RpcError>>,
    {
        if let Some(scope) = self.active_scope(context) {
            tracing::debug!("Joining active transaction {}", scope.transaction_id());
            return body(context.clone()).await;
        }

        self.coordinator
            .run_as_transaction(context, |scope| async move {
                let _active = self.transactions.enter(scope.clone());
                body(scope.context().clone()).await
            })
            .await
    }

    fn active_scope(&self, context: &InvocationContext) -> Option<Arc<TransactionScope>> {
        context
            .transaction_id()
            .and_then(|transaction_id| self.transactions.get(transaction_id))
    }

    async fn execute(
        &self,
        operation: Arc<ServiceOperation>,
        args: Vec<Value>,
        context: &InvocationContext,
    ) -> Result<Value, RpcError> {
        if !operation.is_transaction() {
            return self.invoker.invoke(&operation, args, context).await;
        }

        let participant = self.participant(&operation, args)?;
        match self.active_scope(context) {
            Some(scope) => scope.participate(participant).await,
            None => {
                self.coordinator
                    .run_as_transaction(context, |scope| async move {
                        scope.participate(participant).await
                    })
                    .await
            }
        }
    }

    /// 把事务操作包装为参与者：Try 调用操作本身，Confirm/Cancel 以相同参数调用声明的操作
    fn participant(
        &self,
        operation: &Arc<ServiceOperation>,
        args: Vec<Value>,
    ) -> Result<TccParticipant, RpcError> {
        let confirm = self.settlement_operation(operation.confirm_operation())?;
        let cancel = self.settlement_operation(operation.cancel_operation())?;

        let mut participant = TccParticipant::new(
            operation.id(),
            self.invoke_action(operation.clone(), args.clone()),
        );
        if let Some(confirm) = confirm {
            let action = self.invoke_action(confirm, args.clone());
            participant =
                participant.on_confirm(move |context| action(context).map(|r| r.map(drop)));
        }
        if let Some(cancel) = cancel {
            let action = self.invoke_action(cancel, args);
            participant =
                participant.on_cancel(move |context| action(context).map(|r| r.map(drop)));
        }
        Ok(participant)
    }

    fn settlement_operation(
        &self,
        operation_id: Option<&str>,
    ) -> Result<Option<Arc<ServiceOperation>>, RpcError> {
        operation_id
            .map(|id| {
                self.operation(id)
                    .ok_or_else(|| RpcError::OperationNotFound(id.to_string()))
            })
            .transpose()
    }

    fn invoke_action(
        &self,
        operation: Arc<ServiceOperation>,
        args: Vec<Value>,
    ) -> impl Fn(InvocationContext) -> BoxFuture<'static, Result<Value, RpcError>> + Send + Sync {
        let invoker = self.invoker.clone();
        move |context: InvocationContext| {
            let invoker = invoker.clone();
            let operation = operation.clone();
            let args = args.clone();
            async move { invoker.invoke(&operation, args, &context).await }.boxed()
        }
    }
}
