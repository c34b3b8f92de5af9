use super::store::{CacheLookup, CacheStore};
use conduit_core::{CachingMethod, CompiledCacheRule, InvocationContext, RpcError, ServiceOperation};
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;

/// 调用的执行状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ProceedState {
    Unproceeded,
    /// 结果来自缓存，真实调用未执行
    ProceededForCache,
    /// 真实调用已执行
    ProceededForExec,
}

/// 一次被拦截的调用，保证真实调用最多执行一次
struct Proceeding<F> {
    proceed: Option<F>,
    state: ProceedState,
    value: Option<Value>,
}

impl<F, Fut> Proceeding<F>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<Value, RpcError>>,
{
    fn new(proceed: F) -> Self {
        Self {
            proceed: Some(proceed),
            state: ProceedState::Unproceeded,
            value: None,
        }
    }

    fn take_proceed(&mut self) -> Result<F, RpcError> {
        self.proceed
            .take()
            .ok_or_else(|| RpcError::Cache("invocation has already been consumed".to_string()))
    }

    fn complete(&mut self, state: ProceedState, value: Value) -> Value {
        self.state = state;
        self.value = Some(value.clone());
        value
    }

    /// 取得调用结果，尚未执行时执行一次
    async fn ensure(&mut self) -> Result<Value, RpcError> {
        if let Some(value) = &self.value {
            return Ok(value.clone());
        }
        let proceed = self.take_proceed()?;
        let value = proceed().await?;
        Ok(self.complete(ProceedState::ProceededForExec, value))
    }
}

/// 缓存拦截器
///
/// - Get：无事务时读缓存，未命中才执行调用并写入；事务中直接执行调用
/// - Update：确保调用结果可用（命中缓存时不重复执行），写入每个更新键
/// - Remove：只在真实调用成功执行后按声明顺序删除缓存
pub struct CachingInterceptor {
    store: Arc<dyn CacheStore>,
}

impl CachingInterceptor {
    pub fn new(store: Arc<dyn CacheStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn CacheStore> {
        &self.store
    }

    pub async fn intercept<'a, F, Fut>(
        &'a self,
        operation: &'a ServiceOperation,
        args: &'a [Value],
        context: &'a InvocationContext,
        proceed: F,
    ) -> Result<Value, RpcError>
    where
        F: FnOnce() -> Fut + Send + 'a,
        Fut: Future<Output = Result<Value, RpcError>> + Send + 'a,
    {
        if !operation.governance().enable_caching || operation.cache_rules().is_empty() {
            return proceed().await;
        }

        let tenant_id = context.tenant_id();
        let mut invocation = Proceeding::new(proceed);

        let rules = operation.cache_rules();
        if let Some(rule) = rules.iter().find(|r| r.method() == CachingMethod::Get) {
            if context.is_in_transaction() || operation.is_transaction() {
                tracing::debug!(
                    "Operation '{}' runs inside a transaction, bypassing cache '{}'",
                    operation.id(),
                    rule.cache_name()
                );
                invocation.ensure().await?;
            } else {
                let key = rule.render_key(args, tenant_id);
                let proceed = invocation.take_proceed()?;
                let lookup = self
                    .store
                    .get_or_add(rule.cache_name(), &key, Box::pin(async move { proceed().await }))
                    .await?;

                match lookup {
                    CacheLookup::Hit(value) => {
                        tracing::debug!("Cache hit for {} in '{}'", key, rule.cache_name());
                        invocation.complete(ProceedState::ProceededForCache, value);
                    }
                    CacheLookup::Loaded(value) => {
                        invocation.complete(ProceedState::ProceededForExec, value);
                    }
                }
            }
        }

        for rule in rules.iter().filter(|r| r.method() == CachingMethod::Update) {
            let value = invocation.ensure().await?;
            let key = rule.render_key(args, tenant_id);
            if let Err(e) = self.store.set(rule.cache_name(), &key, value).await {
                tracing::error!(
                    "Failed to update cache '{}' key {} for operation '{}': {}",
                    rule.cache_name(),
                    key,
                    operation.id(),
                    e
                );
            }
        }

        let remove_rules: Vec<&CompiledCacheRule> = rules
            .iter()
            .filter(|r| r.method() == CachingMethod::Remove)
            .collect();
        if !remove_rules.is_empty() {
            invocation.ensure().await?;
            if invocation.state == ProceedState::ProceededForExec {
                for rule in remove_rules {
                    self.remove(operation, rule, args, tenant_id).await;
                }
            }
        }

        invocation.ensure().await
    }

    async fn remove(
        &self,
        operation: &ServiceOperation,
        rule: &CompiledCacheRule,
        args: &[Value],
        tenant_id: Option<&str>,
    ) {
        let key = rule.render_key(args, tenant_id);
        let outcome = if rule.match_by_prefix() {
            self.store
                .remove_by_prefix(rule.cache_name(), &key)
                .await
                .map(|n| n > 0)
        } else {
            self.store.remove(rule.cache_name(), &key).await
        };

        match outcome {
            Ok(removed) => tracing::debug!(
                "Cache removal for '{}' key {} (prefix: {}) removed entries: {}",
                rule.cache_name(),
                key,
                rule.match_by_prefix(),
                removed
            ),
            Err(e) => tracing::error!(
                "Failed to remove cache '{}' key {} for operation '{}': {}",
                rule.cache_name(),
                key,
                operation.id(),
                e
            ),
        }
    }
}
