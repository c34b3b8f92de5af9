use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;

/// 服务协议
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ServiceProtocol {
    #[default]
    Tcp,
    Http,
    Ws,
}

impl fmt::Display for ServiceProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceProtocol::Tcp => write!(f, "tcp"),
            ServiceProtocol::Http => write!(f, "http"),
            ServiceProtocol::Ws => write!(f, "ws"),
        }
    }
}

/// 服务端点
///
/// 端点的身份由 `protocol://host:port` 决定，`host:port` 形式的地址用于指定端点调用。
/// 核心只读取和过滤端点，启用状态由外部健康监控通过路由缓存更新。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub protocol: ServiceProtocol,
    #[serde(default = "default_weight")]
    pub weight: f64,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub last_disabled_at: Option<DateTime<Utc>>,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16, protocol: ServiceProtocol) -> Self {
        Self {
            host: host.into(),
            port,
            protocol,
            weight: default_weight(),
            enabled: true,
            last_disabled_at: None,
        }
    }

    pub fn tcp(host: impl Into<String>, port: u16) -> Self {
        Self::new(host, port, ServiceProtocol::Tcp)
    }

    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self.last_disabled_at = Some(Utc::now());
        self
    }

    /// `host:port` 形式的地址
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// 端点身份标识，用于连接池和健康统计
    pub fn descriptor(&self) -> String {
        format!("{}://{}:{}", self.protocol, self.host, self.port)
    }

    /// 检查地址是否指向该端点（支持 `host:port` 和 `protocol://host:port` 两种形式）
    pub fn matches_address(&self, address: &str) -> bool {
        self.address() == address || self.descriptor() == address
    }
}

impl PartialEq for Endpoint {
    fn eq(&self, other: &Self) -> bool {
        self.host == other.host && self.port == other.port && self.protocol == other.protocol
    }
}

impl Eq for Endpoint {}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.descriptor())
    }
}

/// 服务路由：一个逻辑服务当前可用的端点集合
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Route {
    pub service_id: String,
    #[serde(default)]
    pub endpoints: Vec<Endpoint>,
}

impl Route {
    pub fn new(service_id: impl Into<String>, endpoints: Vec<Endpoint>) -> Self {
        Self {
            service_id: service_id.into(),
            endpoints,
        }
    }

    pub fn enabled_endpoints(&self) -> Vec<&Endpoint> {
        self.endpoints.iter().filter(|e| e.enabled).collect()
    }

    /// 没有任何启用端点的路由是不可路由的
    pub fn is_routable(&self) -> bool {
        self.endpoints.iter().any(|e| e.enabled)
    }

    pub fn find_enabled(&self, address: &str) -> Option<&Endpoint> {
        self.endpoints
            .iter()
            .find(|e| e.enabled && e.matches_address(address))
    }
}

/// 远程调用状态码
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StatusCode {
    #[default]
    Success,
    RouteNotFound,
    NoHealthyEndpoint,
    PinnedEndpointUnavailable,
    TransportError,
    BusinessError,
    ValidationError,
    Unauthorized,
    Timeout,
    ServerError,
    CacheError,
    TransactionError,
}

impl StatusCode {
    pub fn is_success(&self) -> bool {
        matches!(self, StatusCode::Success)
    }

    pub fn code(&self) -> u16 {
        match self {
            StatusCode::Success => 200,
            StatusCode::RouteNotFound => 404,
            StatusCode::NoHealthyEndpoint => 503,
            StatusCode::PinnedEndpointUnavailable => 502,
            StatusCode::TransportError => 504,
            StatusCode::BusinessError => 1000,
            StatusCode::ValidationError => 1001,
            StatusCode::Unauthorized => 401,
            StatusCode::Timeout => 408,
            StatusCode::ServerError => 500,
            StatusCode::CacheError => 1002,
            StatusCode::TransactionError => 1003,
        }
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}({})", self, self.code())
    }
}

/// 远程调用请求消息
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteInvokeMessage {
    pub service_id: String,
    pub operation_id: String,
    #[serde(default)]
    pub parameters: Vec<Value>,
    #[serde(default)]
    pub attachments: HashMap<String, String>,
}

impl RemoteInvokeMessage {
    pub fn new(
        service_id: impl Into<String>,
        operation_id: impl Into<String>,
        parameters: Vec<Value>,
        attachments: HashMap<String, String>,
    ) -> Self {
        Self {
            service_id: service_id.into(),
            operation_id: operation_id.into(),
            parameters,
            attachments,
        }
    }
}

/// 远程调用结果消息
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteResultMessage {
    #[serde(default)]
    pub status_code: StatusCode,
    #[serde(default)]
    pub result: Value,
    #[serde(default)]
    pub exception_message: Option<String>,
}

impl RemoteResultMessage {
    pub fn success(result: Value) -> Self {
        Self {
            status_code: StatusCode::Success,
            result,
            exception_message: None,
        }
    }

    pub fn failure(status_code: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status_code,
            result: Value::Null,
            exception_message: Some(message.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status_code.is_success()
    }
}

fn default_true() -> bool {
    true
}

fn default_weight() -> f64 {
    1.0
}
