use async_trait::async_trait;
use conduit_core::config::loader::parse_config;
use conduit_core::{
    attachment_keys, Endpoint, InvocationContext, RemoteInvokeMessage, RemoteResultMessage,
    RouteCache, RpcError, StatusCode, TransportClient, TransportConnector, TransportError,
};
use conduit_governance::{CacheStore, InvocationPipeline};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::Arc;

const CONFIG: &str = r#"
[settings]
default_strategy = "round_robin"

[services.user]
[[services.user.endpoints]]
host = "10.0.0.1"
port = 2200

[[services.user.endpoints]]
host = "10.0.0.2"
port = 2200

[services.order]
[[services.order.endpoints]]
host = "10.0.1.1"
port = 2200

[operations."user.get"]
service = "user"
parameters = ["id"]

[[operations."user.get".cache_rules]]
method = "get"
key_template = "user:{id}"
cache_name = "users"

[operations."user.rename"]
service = "user"
parameters = ["id", "name"]

[[operations."user.rename".cache_rules]]
method = "remove"
key_template = "user:{id}"
cache_name = "users"

[operations."order.place"]
service = "order"
parameters = ["order"]
strategy = "hash_algorithm"
hash_key = "order"
transaction = true
confirm = "order.confirm"
cancel = "order.cancel"

[[operations."order.place".cache_rules]]
method = "get"
key_template = "order:{order.id}"
cache_name = "orders"

[operations."order.confirm"]
service = "order"
parameters = ["order"]

[operations."order.cancel"]
service = "order"
parameters = ["order"]

[operations."stock.reserve"]
service = "order"
parameters = ["sku"]
transaction = true
confirm = "stock.confirm"
cancel = "stock.cancel"

[operations."stock.confirm"]
service = "order"
parameters = ["sku"]

[operations."stock.cancel"]
service = "order"
parameters = ["sku"]
"#;

/// 记录所有请求的模拟传输
#[derive(Default)]
struct RecordingConnector {
    sent: Arc<Mutex<Vec<(String, RemoteInvokeMessage)>>>,
}

impl RecordingConnector {
    fn messages(&self) -> Vec<(String, RemoteInvokeMessage)> {
        self.sent.lock().clone()
    }
}

struct RecordingClient {
    endpoint: String,
    sent: Arc<Mutex<Vec<(String, RemoteInvokeMessage)>>>,
}

#[async_trait]
impl TransportClient for RecordingClient {
    async fn send(
        &self,
        message: RemoteInvokeMessage,
    ) -> Result<RemoteResultMessage, TransportError> {
        self.sent.lock().push((self.endpoint.clone(), message.clone()));

        if message.parameters.first() == Some(&json!("forbidden")) {
            return Ok(RemoteResultMessage::failure(StatusCode::Unauthorized, "forbidden"));
        }

        Ok(RemoteResultMessage::success(json!({
            "operation": message.operation_id,
            "endpoint": self.endpoint,
            "call": self.sent.lock().len(),
        })))
    }

    fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl TransportConnector for RecordingConnector {
    async fn connect(
        &self,
        endpoint: &Endpoint,
    ) -> Result<Arc<dyn TransportClient>, TransportError> {
        Ok(Arc::new(RecordingClient {
            endpoint: endpoint.address(),
            sent: self.sent.clone(),
        }))
    }
}

fn create_pipeline() -> (InvocationPipeline, Arc<RouteCache>, Arc<RecordingConnector>) {
    let config = parse_config(CONFIG).unwrap();
    let routes = Arc::new(RouteCache::new());
    let connector = Arc::new(RecordingConnector::default());
    let pipeline =
        InvocationPipeline::from_config(&config, routes.clone(), connector.clone()).unwrap();
    (pipeline, routes, connector)
}

#[tokio::test]
async fn test_cached_get_hits_remote_once() {
    let (pipeline, _, connector) = create_pipeline();
    let context = InvocationContext::new().with_tenant_id("acme");

    let first = pipeline.call("user.get", vec![json!(7)], &context).await.unwrap();
    let second = pipeline.call("user.get", vec![json!(7)], &context).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(connector.messages().len(), 1);
    assert!(pipeline
        .cache_store()
        .get("users", "acme:user:7")
        .await
        .unwrap()
        .is_some());
}

#[tokio::test]
async fn test_remove_rule_invalidates_cached_get() {
    let (pipeline, _, connector) = create_pipeline();
    let context = InvocationContext::new();

    pipeline.call("user.get", vec![json!(7)], &context).await.unwrap();
    pipeline
        .call("user.rename", vec![json!(7), json!("carol")], &context)
        .await
        .unwrap();
    pipeline.call("user.get", vec![json!(7)], &context).await.unwrap();

    let operations: Vec<String> = connector
        .messages()
        .into_iter()
        .map(|(_, m)| m.operation_id)
        .collect();
    assert_eq!(operations, vec!["user.get", "user.rename", "user.get"]);
}

#[tokio::test]
async fn test_failed_remove_operation_keeps_cache() {
    let (pipeline, _, _) = create_pipeline();
    let context = InvocationContext::new();

    pipeline.call("user.get", vec![json!(7)], &context).await.unwrap();
    let err = pipeline
        .call("user.rename", vec![json!("forbidden"), json!("x")], &context)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        RpcError::RemoteExecutionFailure { status: StatusCode::Unauthorized, .. }
    ));
    assert!(pipeline.cache_store().get("users", "user:7").await.unwrap().is_some());
}

fn transaction_id(message: &RemoteInvokeMessage) -> Option<&String> {
    message.attachments.get(attachment_keys::TRANSACTION_ID)
}

fn operations_sent(connector: &RecordingConnector) -> Vec<String> {
    connector
        .messages()
        .into_iter()
        .map(|(_, m)| m.operation_id)
        .collect()
}

#[tokio::test]
async fn test_transactional_operation_confirms_itself() {
    let (pipeline, _, connector) = create_pipeline();
    let context = InvocationContext::new();
    let order = json!({"id": "o-1", "items": 3});

    for _ in 0..2 {
        pipeline
            .call("order.place", vec![order.clone()], &context)
            .await
            .unwrap();
    }

    // 事务中的 Get 规则不读缓存，每次调用都 Try 后 Confirm
    let messages = connector.messages();
    assert_eq!(
        operations_sent(&connector),
        vec!["order.place", "order.confirm", "order.place", "order.confirm"]
    );
    for (endpoint, message) in &messages {
        assert_eq!(endpoint, "10.0.1.1:2200");
        assert_eq!(message.parameters, vec![order.clone()]);
        assert!(transaction_id(message).is_some());
    }
    assert_eq!(transaction_id(&messages[0].1), transaction_id(&messages[1].1));
    assert_ne!(transaction_id(&messages[0].1), transaction_id(&messages[2].1));
}

#[tokio::test]
async fn test_transaction_confirms_participants_in_order() {
    let (pipeline, _, connector) = create_pipeline();
    let pipeline = &pipeline;

    let value = pipeline
        .transaction(&InvocationContext::new(), |tx| async move {
            pipeline
                .call("order.place", vec![json!({"id": "o-3"})], &tx)
                .await?;
            pipeline.call("stock.reserve", vec![json!("sku-1")], &tx).await
        })
        .await
        .unwrap();
    assert_eq!(value["operation"], json!("stock.reserve"));

    assert_eq!(
        operations_sent(&connector),
        vec!["order.place", "stock.reserve", "order.confirm", "stock.confirm"]
    );
    let messages = connector.messages();
    let first = transaction_id(&messages[0].1).cloned();
    assert!(first.is_some());
    assert!(messages.iter().all(|(_, m)| transaction_id(m).cloned() == first));
}

#[tokio::test]
async fn test_failed_try_cancels_completed_participants() {
    let (pipeline, _, connector) = create_pipeline();
    let pipeline = &pipeline;

    let err = pipeline
        .transaction(&InvocationContext::new(), |tx| async move {
            pipeline
                .call("order.place", vec![json!({"id": "o-4"})], &tx)
                .await?;
            pipeline
                .call("stock.reserve", vec![json!("forbidden")], &tx)
                .await
        })
        .await
        .unwrap_err();

    match err {
        RpcError::TccParticipantFailure { participant, .. } => {
            assert_eq!(participant, "stock.reserve")
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(
        operations_sent(&connector),
        vec!["order.place", "stock.reserve", "order.cancel"]
    );
}

#[tokio::test]
async fn test_round_robin_and_pinning_through_pipeline() {
    let (pipeline, _, connector) = create_pipeline();

    for i in 0..4 {
        pipeline
            .call("user.rename", vec![json!(i), json!("n")], &InvocationContext::new())
            .await
            .unwrap();
    }
    let pinned = InvocationContext::new().with_pinned_endpoint("10.0.0.2:2200");
    pipeline
        .call("user.rename", vec![json!(9), json!("n")], &pinned)
        .await
        .unwrap();

    let endpoints: Vec<String> = connector.messages().into_iter().map(|(e, _)| e).collect();
    assert_eq!(
        endpoints,
        vec![
            "10.0.0.1:2200",
            "10.0.0.2:2200",
            "10.0.0.1:2200",
            "10.0.0.2:2200",
            "10.0.0.2:2200"
        ]
    );
}

#[tokio::test]
async fn test_disabled_service_fails_fast() {
    let (pipeline, routes, connector) = create_pipeline();
    assert!(routes.set_endpoint_enabled("order", "10.0.1.1:2200", false));

    let err = pipeline
        .call("order.place", vec![json!({"id": "o-2"})], &InvocationContext::new())
        .await
        .unwrap_err();
    match err {
        RpcError::TccParticipantFailure { source, .. } => {
            assert!(matches!(*source, RpcError::NoHealthyEndpoint { .. }))
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(connector.messages().is_empty());
    assert_eq!(pipeline.invoker().ledger().total_requests(), 0);
}

#[tokio::test]
async fn test_unknown_operation() {
    let (pipeline, _, _) = create_pipeline();
    let err = pipeline
        .call("user.delete", Vec::<Value>::new(), &InvocationContext::new())
        .await
        .unwrap_err();
    assert!(matches!(err, RpcError::OperationNotFound(_)));
}

#[tokio::test]
async fn test_unregistered_selector_rejected() {
    let mut config = parse_config(CONFIG).unwrap();
    if let Some(operation) = config.operations.get_mut("user.get") {
        operation.selector = Some("least_loaded".to_string());
    }

    let result = InvocationPipeline::from_config(
        &config,
        Arc::new(RouteCache::new()),
        Arc::new(RecordingConnector::default()),
    );
    let err = result.err().map(|e| e.to_string()).unwrap_or_default();
    assert!(err.contains("least_loaded"));
}
