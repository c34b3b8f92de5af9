use crate::error::RpcError;
use serde_json::Value;

/// 诊断用的序列化接口，调用核心只用它生成日志内容
pub trait Serializer: Send + Sync {
    fn serialize(&self, value: &Value) -> Result<String, RpcError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSerializer;

impl Serializer for JsonSerializer {
    fn serialize(&self, value: &Value) -> Result<String, RpcError> {
        Ok(serde_json::to_string(value)?)
    }
}
