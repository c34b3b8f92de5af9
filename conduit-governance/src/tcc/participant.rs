use conduit_core::{InvocationContext, RpcError};
use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

type Action<T> =
    Arc<dyn Fn(InvocationContext) -> BoxFuture<'static, Result<T, RpcError>> + Send + Sync>;
type TryAction = Action<Value>;
type SettleAction = Action<()>;

/// TCC 事务参与者
///
/// 每个动作都接收带有事务ID的调用上下文。未设置 Confirm/Cancel 时对应阶段不做任何事。
#[derive(Clone)]
pub struct TccParticipant {
    name: String,
    try_action: TryAction,
    confirm_action: SettleAction,
    cancel_action: SettleAction,
}

impl TccParticipant {
    pub fn new<F, Fut>(name: impl Into<String>, try_action: F) -> Self
    where
        F: Fn(InvocationContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, RpcError>> + Send + 'static,
    {
        Self {
            name: name.into(),
            try_action: Arc::new(move |context: InvocationContext| try_action(context).boxed()),
            confirm_action: noop_action(),
            cancel_action: noop_action(),
        }
    }

    pub fn on_confirm<F, Fut>(mut self, confirm: F) -> Self
    where
        F: Fn(InvocationContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), RpcError>> + Send + 'static,
    {
        self.confirm_action = Arc::new(move |context: InvocationContext| confirm(context).boxed());
        self
    }

    pub fn on_cancel<F, Fut>(mut self, cancel: F) -> Self
    where
        F: Fn(InvocationContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), RpcError>> + Send + 'static,
    {
        self.cancel_action = Arc::new(move |context: InvocationContext| cancel(context).boxed());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) async fn try_phase(&self, context: InvocationContext) -> Result<Value, RpcError> {
        (self.try_action)(context).await
    }

    pub(crate) async fn confirm(&self, context: InvocationContext) -> Result<(), RpcError> {
        (self.confirm_action)(context).await
    }

    pub(crate) async fn cancel(&self, context: InvocationContext) -> Result<(), RpcError> {
        (self.cancel_action)(context).await
    }
}

fn noop_action() -> SettleAction {
    Arc::new(|_: InvocationContext| async { Ok::<(), RpcError>(()) }.boxed())
}

impl fmt::Debug for TccParticipant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TccParticipant")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}
