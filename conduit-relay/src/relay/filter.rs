use conduit_core::{attachment_keys, InvocationContext, RemoteInvokeMessage, RemoteResultMessage};

/// 客户端调用过滤器
///
/// 发送前按 `order` 升序执行 `on_executing`，收到结果后按同样顺序执行 `on_executed`。
pub trait ClientFilter: Send + Sync {
    fn order(&self) -> i32 {
        0
    }

    fn on_executing(&self, context: &InvocationContext, message: &mut RemoteInvokeMessage);

    fn on_executed(&self, _context: &InvocationContext, _result: &RemoteResultMessage) {}
}

/// 保证每个请求都带有追踪ID，并输出请求和结果日志
#[derive(Debug, Default)]
pub struct TracingFilter;

impl ClientFilter for TracingFilter {
    fn order(&self) -> i32 {
        i32::MIN
    }

    fn on_executing(&self, _context: &InvocationContext, message: &mut RemoteInvokeMessage) {
        let trace_id = message
            .attachments
            .entry(attachment_keys::TRACE_ID.to_string())
            .or_insert_with(|| uuid::Uuid::new_v4().to_string());

        tracing::debug!(
            trace_id = %trace_id,
            "Invoking {} on service {} with {} parameters",
            message.operation_id,
            message.service_id,
            message.parameters.len()
        );
    }

    fn on_executed(&self, context: &InvocationContext, result: &RemoteResultMessage) {
        if result.is_success() {
            tracing::debug!(
                trace_id = context.trace_id().unwrap_or_default(),
                "Remote call completed with {}",
                result.status_code
            );
        } else {
            tracing::warn!(
                trace_id = context.trace_id().unwrap_or_default(),
                "Remote call returned {}: {}",
                result.status_code,
                result.exception_message.as_deref().unwrap_or_default()
            );
        }
    }
}
