use crate::types::StatusCode;
use thiserror::Error;

/// 传输层错误
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    #[error("failed to connect to {address}: {message}")]
    Connect { address: String, message: String },
    #[error("failed to send request to {address}: {message}")]
    Send { address: String, message: String },
    #[error("failed to receive response from {address}: {message}")]
    Receive { address: String, message: String },
    #[error("connection to {address} is closed")]
    Closed { address: String },
}

/// 调用核心的错误分类
///
/// 每个失败的调用都会得到一个可以按类别区分的错误，而不是笼统的异常。
#[derive(Debug, Error)]
pub enum RpcError {
    #[error("service route could not be found for service '{service_id}' (operation '{operation_id}')")]
    RouteNotFound {
        service_id: String,
        operation_id: String,
    },

    #[error("no enabled endpoint can be found for service '{service_id}' (operation '{operation_id}')")]
    NoHealthyEndpoint {
        service_id: String,
        operation_id: String,
    },

    #[error("no endpoint available for operation '{operation_id}' after filtering disabled endpoints")]
    NoRouteAvailable { operation_id: String },

    #[error("service '{service_id}' does not have an enabled endpoint '{address}'")]
    PinnedEndpointUnavailable { service_id: String, address: String },

    #[error("remote execution failed with {status}: {message}")]
    RemoteExecutionFailure { status: StatusCode, message: String },

    #[error("transport failure: {0}")]
    TransportFailure(#[from] TransportError),

    #[error("invalid cache key template '{template}': {reason}")]
    InvalidCacheTemplate { template: String, reason: String },

    #[error("tcc participant '{participant}' failed during try: {source}")]
    TccParticipantFailure {
        participant: String,
        #[source]
        source: Box<RpcError>,
    },

    #[error("operation '{operation_id}' is invalid: {reason}")]
    InvalidOperation {
        operation_id: String,
        reason: String,
    },

    #[error("operation '{0}' is not registered")]
    OperationNotFound(String),

    #[error("no endpoint selector registered under '{0}'")]
    UnknownStrategy(String),

    #[error("cache store error: {0}")]
    Cache(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl RpcError {
    /// 映射到远程兼容的状态码
    pub fn status_code(&self) -> StatusCode {
        match self {
            RpcError::RouteNotFound { .. } | RpcError::OperationNotFound(_) => {
                StatusCode::RouteNotFound
            }
            RpcError::NoHealthyEndpoint { .. } | RpcError::NoRouteAvailable { .. } => {
                StatusCode::NoHealthyEndpoint
            }
            RpcError::PinnedEndpointUnavailable { .. } => StatusCode::PinnedEndpointUnavailable,
            RpcError::RemoteExecutionFailure { status, .. } => *status,
            RpcError::TransportFailure(_) => StatusCode::TransportError,
            RpcError::InvalidCacheTemplate { .. } | RpcError::Cache(_) => StatusCode::CacheError,
            RpcError::InvalidOperation { .. } => StatusCode::ValidationError,
            RpcError::TccParticipantFailure { .. } => StatusCode::TransactionError,
            RpcError::UnknownStrategy(_) | RpcError::Serialization(_) => StatusCode::ServerError,
        }
    }

    pub fn is_transport_failure(&self) -> bool {
        matches!(self, RpcError::TransportFailure(_))
    }

    pub(crate) fn invalid_operation(operation_id: &str, reason: impl Into<String>) -> Self {
        RpcError::InvalidOperation {
            operation_id: operation_id.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn invalid_template(template: &str, reason: impl Into<String>) -> Self {
        RpcError::InvalidCacheTemplate {
            template: template.to_string(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_code_mapping() {
        let err = RpcError::RemoteExecutionFailure {
            status: StatusCode::BusinessError,
            message: "balance too low".to_string(),
        };
        assert_eq!(err.status_code(), StatusCode::BusinessError);
        assert_eq!(
            err.to_string(),
            "remote execution failed with BusinessError(1000): balance too low"
        );

        let err = RpcError::from(TransportError::Closed {
            address: "10.0.0.1:2200".to_string(),
        });
        assert!(err.is_transport_failure());
        assert_eq!(err.status_code(), StatusCode::TransportError);
    }

    #[test]
    fn test_participant_failure_keeps_source() {
        use std::error::Error;

        let err = RpcError::TccParticipantFailure {
            participant: "inventory".to_string(),
            source: Box::new(RpcError::RemoteExecutionFailure {
                status: StatusCode::BusinessError,
                message: "out of stock".to_string(),
            }),
        };
        assert_eq!(err.status_code(), StatusCode::TransactionError);
        let source = err.source().map(|s| s.to_string()).unwrap_or_default();
        assert!(source.contains("out of stock"));
    }
}
