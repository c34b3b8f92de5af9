use std::collections::HashMap;
use uuid::Uuid;

/// 调用上下文附件的约定键名
pub mod attachment_keys {
    pub const SELECTED_SERVER_ENDPOINT: &str = "selectedServerEndpoint";
    pub const TENANT_ID: &str = "tenantId";
    pub const TRANSACTION_ID: &str = "transactionId";
    pub const TRACE_ID: &str = "traceId";
}

/// 单次逻辑调用的上下文
///
/// 在调用入口创建，作为参数显式传递给每个参与该调用的组件，调用结束时丢弃。
/// 不同调用之间不共享上下文。
#[derive(Debug, Clone, Default)]
pub struct InvocationContext {
    pinned_endpoint: Option<String>,
    tenant_id: Option<String>,
    transaction_id: Option<String>,
    trace_id: Option<String>,
    attachments: HashMap<String, String>,
}

impl InvocationContext {
    /// 创建新的调用上下文，并生成追踪ID
    pub fn new() -> Self {
        Self {
            trace_id: Some(Uuid::new_v4().to_string()),
            ..Default::default()
        }
    }

    /// 从远端传入的附件还原上下文
    pub fn from_attachments(attachments: HashMap<String, String>) -> Self {
        let mut context = Self::default();
        for (key, value) in attachments {
            context.set_attachment(key, value);
        }
        context
    }

    pub fn with_pinned_endpoint(mut self, address: impl Into<String>) -> Self {
        self.pinned_endpoint = Some(address.into());
        self
    }

    pub fn with_tenant_id(mut self, tenant_id: impl Into<String>) -> Self {
        self.tenant_id = Some(tenant_id.into());
        self
    }

    pub fn with_transaction_id(mut self, transaction_id: impl Into<String>) -> Self {
        self.transaction_id = Some(transaction_id.into());
        self
    }

    pub fn with_trace_id(mut self, trace_id: impl Into<String>) -> Self {
        self.trace_id = Some(trace_id.into());
        self
    }

    pub fn with_attachment(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_attachment(key, value);
        self
    }

    /// 设置附件，约定键名会写入对应的强类型字段
    pub fn set_attachment(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match key.as_str() {
            attachment_keys::SELECTED_SERVER_ENDPOINT => self.pinned_endpoint = Some(value),
            attachment_keys::TENANT_ID => self.tenant_id = Some(value),
            attachment_keys::TRANSACTION_ID => self.transaction_id = Some(value),
            attachment_keys::TRACE_ID => self.trace_id = Some(value),
            _ => {
                self.attachments.insert(key, value);
            }
        }
    }

    pub fn attachment(&self, key: &str) -> Option<&str> {
        match key {
            attachment_keys::SELECTED_SERVER_ENDPOINT => self.pinned_endpoint.as_deref(),
            attachment_keys::TENANT_ID => self.tenant_id.as_deref(),
            attachment_keys::TRANSACTION_ID => self.transaction_id.as_deref(),
            attachment_keys::TRACE_ID => self.trace_id.as_deref(),
            _ => self.attachments.get(key).map(String::as_str),
        }
    }

    pub fn pinned_endpoint(&self) -> Option<&str> {
        self.pinned_endpoint.as_deref()
    }

    pub fn tenant_id(&self) -> Option<&str> {
        self.tenant_id.as_deref()
    }

    pub fn transaction_id(&self) -> Option<&str> {
        self.transaction_id.as_deref()
    }

    pub fn trace_id(&self) -> Option<&str> {
        self.trace_id.as_deref()
    }

    pub fn is_in_transaction(&self) -> bool {
        self.transaction_id.is_some()
    }

    /// 转换为随请求发送的附件
    ///
    /// 指定端点只在本地选择时生效，不会传递给远端。
    pub fn to_attachments(&self) -> HashMap<String, String> {
        let mut attachments = self.attachments.clone();
        if let Some(tenant_id) = &self.tenant_id {
            attachments.insert(attachment_keys::TENANT_ID.to_string(), tenant_id.clone());
        }
        if let Some(transaction_id) = &self.transaction_id {
            attachments.insert(
                attachment_keys::TRANSACTION_ID.to_string(),
                transaction_id.clone(),
            );
        }
        if let Some(trace_id) = &self.trace_id {
            attachments.insert(attachment_keys::TRACE_ID.to_string(), trace_id.clone());
        }
        attachments
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_context_has_trace_id() {
        let first = InvocationContext::new();
        let second = InvocationContext::new();
        assert!(first.trace_id().is_some());
        assert_ne!(first.trace_id(), second.trace_id());
        assert!(!first.is_in_transaction());
    }

    #[test]
    fn test_well_known_attachments_map_to_fields() {
        let context = InvocationContext::default()
            .with_attachment(attachment_keys::TENANT_ID, "acme")
            .with_attachment(attachment_keys::SELECTED_SERVER_ENDPOINT, "10.0.0.1:2200")
            .with_attachment("region", "eu");

        assert_eq!(context.tenant_id(), Some("acme"));
        assert_eq!(context.pinned_endpoint(), Some("10.0.0.1:2200"));
        assert_eq!(context.attachment("region"), Some("eu"));
    }

    #[test]
    fn test_outgoing_attachments_exclude_pinned_endpoint() {
        let context = InvocationContext::new()
            .with_tenant_id("acme")
            .with_transaction_id("tx-1")
            .with_pinned_endpoint("10.0.0.1:2200");

        let attachments = context.to_attachments();
        assert_eq!(attachments.get(attachment_keys::TENANT_ID).map(String::as_str), Some("acme"));
        assert_eq!(
            attachments.get(attachment_keys::TRANSACTION_ID).map(String::as_str),
            Some("tx-1")
        );
        assert!(attachments.contains_key(attachment_keys::TRACE_ID));
        assert!(!attachments.contains_key(attachment_keys::SELECTED_SERVER_ENDPOINT));

        let restored = InvocationContext::from_attachments(attachments);
        assert_eq!(restored.transaction_id(), Some("tx-1"));
        assert_eq!(restored.trace_id(), context.trace_id());
    }
}
