use super::participant::TccParticipant;
use conduit_core::{InvocationContext, RpcError, StatusCode};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use uuid::Uuid;

/// 第一个失败的 Try
#[derive(Debug, Clone)]
struct TryFailure {
    participant: String,
    status: StatusCode,
    message: String,
}

/// 事务范围，发起方通过它登记参与者
pub struct TransactionScope {
    transaction_id: String,
    context: InvocationContext,
    journal: Mutex<Vec<TccParticipant>>,
    try_failure: Mutex<Option<TryFailure>>,
}

impl TransactionScope {
    fn new(transaction_id: String, context: InvocationContext) -> Self {
        Self {
            transaction_id,
            context,
            journal: Mutex::new(Vec::new()),
            try_failure: Mutex::new(None),
        }
    }

    pub fn transaction_id(&self) -> &str {
        &self.transaction_id
    }

    /// 带有事务ID的调用上下文
    pub fn context(&self) -> &InvocationContext {
        &self.context
    }

    /// 执行参与者的 Try，成功后登记到事务日志
    ///
    /// Try 失败会记录在事务范围内，即使发起方忽略了返回的错误，事务也会被取消。
    pub async fn participate(&self, participant: TccParticipant) -> Result<Value, RpcError> {
        tracing::debug!(
            "Transaction {} trying participant '{}'",
            self.transaction_id,
            participant.name()
        );

        match participant.try_phase(self.context.clone()).await {
            Ok(value) => {
                self.journal.lock().push(participant);
                Ok(value)
            }
            Err(e) => {
                tracing::warn!(
                    "Transaction {} participant '{}' failed during try: {}",
                    self.transaction_id,
                    participant.name(),
                    e
                );
                self.try_failure.lock().get_or_insert_with(|| TryFailure {
                    participant: participant.name().to_string(),
                    status: e.status_code(),
                    message: e.to_string(),
                });
                Err(RpcError::TccParticipantFailure {
                    participant: participant.name().to_string(),
                    source: Box::new(e),
                })
            }
        }
    }

    pub fn participants(&self) -> Vec<String> {
        self.journal
            .lock()
            .iter()
            .map(|p| p.name().to_string())
            .collect()
    }

    /// 是否有参与者的 Try 失败
    pub fn has_failed(&self) -> bool {
        self.try_failure.lock().is_some()
    }

    fn recorded_failure(&self) -> Option<RpcError> {
        self.try_failure
            .lock()
            .clone()
            .map(|failure| RpcError::TccParticipantFailure {
                participant: failure.participant,
                source: Box::new(RpcError::RemoteExecutionFailure {
                    status: failure.status,
                    message: failure.message,
                }),
            })
    }

    /// 取出下一个待 Confirm 的参与者（登记顺序）
    fn next_to_confirm(&self) -> Option<TccParticipant> {
        let mut journal = self.journal.lock();
        if journal.is_empty() {
            None
        } else {
            Some(journal.remove(0))
        }
    }

    /// 取出下一个待 Cancel 的参与者（登记的逆序）
    fn next_to_cancel(&self) -> Option<TccParticipant> {
        self.journal.lock().pop()
    }
}

/// 结算守卫
///
/// 事务在结算完成前被丢弃（调用方取消）时，仍留在日志中的参与者既没有 Confirm 也没有 Cancel，
/// 守卫会逐个记录下来以便人工对账。
struct SettlementGuard {
    scope: Arc<TransactionScope>,
}

impl Drop for SettlementGuard {
    fn drop(&mut self) {
        let stranded = self.scope.participants();
        if stranded.is_empty() {
            return;
        }
        tracing::error!(
            "Transaction {} was dropped before settlement, {} participants left unsettled",
            self.scope.transaction_id(),
            stranded.len()
        );
        for name in stranded {
            tracing::warn!(
                "Participant '{}' of transaction {} requires manual reconciliation",
                name,
                self.scope.transaction_id()
            );
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Confirmed,
    Cancelled,
}

/// 事务执行报告
#[derive(Debug, Clone, Serialize)]
pub struct TransactionReport {
    pub transaction_id: String,
    pub status: TransactionStatus,
    /// 成功完成 Confirm/Cancel 的参与者，按执行顺序
    pub settled: Vec<String>,
    /// Confirm/Cancel 失败的参与者及错误信息，需要外部对账
    pub failures: Vec<(String, String)>,
}

impl TransactionReport {
    fn new(transaction_id: &str, status: TransactionStatus) -> Self {
        Self {
            transaction_id: transaction_id.to_string(),
            status,
            settled: Vec::new(),
            failures: Vec::new(),
        }
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

#[derive(Debug)]
pub struct TransactionOutcome<T> {
    pub result: Result<T, RpcError>,
    pub report: TransactionReport,
}

/// TCC 事务协调器
#[derive(Debug, Default, Clone)]
pub struct TccCoordinator;

impl TccCoordinator {
    pub fn new() -> Self {
        Self
    }

    /// 以事务方式执行发起方，返回发起方结果和事务报告
    ///
    /// 发起方成功且没有参与者 Try 失败时按登记顺序 Confirm，否则按逆序 Cancel。
    /// 上下文已处于事务中时沿用其事务ID，由本次调用协调自己登记的参与者。
    pub async fn execute<F, Fut, T>(
        &self,
        context: &InvocationContext,
        starter: F,
    ) -> TransactionOutcome<T>
    where
        F: FnOnce(Arc<TransactionScope>) -> Fut,
        Fut: Future<Output = Result<T, RpcError>>,
    {
        let transaction_id = context
            .transaction_id()
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let scope = Arc::new(TransactionScope::new(
            transaction_id.clone(),
            context.clone().with_transaction_id(transaction_id.clone()),
        ));
        let _guard = SettlementGuard {
            scope: scope.clone(),
        };

        tracing::info!("Transaction {} started", transaction_id);
        let mut result = starter(scope.clone()).await;
        if result.is_ok() {
            if let Some(failure) = scope.recorded_failure() {
                tracing::warn!(
                    "Transaction {} starter ignored a failed try, cancelling",
                    transaction_id
                );
                result = Err(failure);
            }
        }

        let report = match &result {
            Ok(_) => self.confirm_all(&scope).await,
            Err(e) => {
                tracing::warn!(
                    "Transaction {} failed, cancelling {} participants: {}",
                    transaction_id,
                    scope.participants().len(),
                    e
                );
                self.cancel_all(&scope).await
            }
        };

        TransactionOutcome { result, report }
    }

    pub async fn run_as_transaction<F, Fut, T>(
        &self,
        context: &InvocationContext,
        starter: F,
    ) -> Result<T, RpcError>
    where
        F: FnOnce(Arc<TransactionScope>) -> Fut,
        Fut: Future<Output = Result<T, RpcError>>,
    {
        self.execute(context, starter).await.result
    }

    /// 依次执行参与者的 Try 作为发起方，返回所有 Try 结果组成的数组
    pub async fn run_with_participants(
        &self,
        context: &InvocationContext,
        participants: Vec<TccParticipant>,
    ) -> Result<Value, RpcError> {
        self.run_as_transaction(context, |scope| async move {
            let mut results = Vec::with_capacity(participants.len());
            for participant in participants {
                results.push(scope.participate(participant).await?);
            }
            Ok(Value::Array(results))
        })
        .await
    }

    async fn confirm_all(&self, scope: &TransactionScope) -> TransactionReport {
        let mut report =
            TransactionReport::new(scope.transaction_id(), TransactionStatus::Confirmed);

        while let Some(participant) = scope.next_to_confirm() {
            match participant.confirm(scope.context().clone()).await {
                Ok(()) => report.settled.push(participant.name().to_string()),
                Err(e) => {
                    tracing::error!(
                        "Transaction {} failed to confirm participant '{}': {}",
                        scope.transaction_id(),
                        participant.name(),
                        e
                    );
                    report
                        .failures
                        .push((participant.name().to_string(), e.to_string()));
                }
            }
        }

        tracing::info!(
            "Transaction {} confirmed ({} participants, {} failures)",
            scope.transaction_id(),
            report.settled.len() + report.failures.len(),
            report.failures.len()
        );
        report
    }

    async fn cancel_all(&self, scope: &TransactionScope) -> TransactionReport {
        let mut report =
            TransactionReport::new(scope.transaction_id(), TransactionStatus::Cancelled);

        while let Some(participant) = scope.next_to_cancel() {
            match participant.cancel(scope.context().clone()).await {
                Ok(()) => report.settled.push(participant.name().to_string()),
                Err(e) => {
                    tracing::error!(
                        "Transaction {} failed to cancel participant '{}': {}",
                        scope.transaction_id(),
                        participant.name(),
                        e
                    );
                    tracing::warn!(
                        "Participant '{}' of transaction {} requires manual reconciliation",
                        participant.name(),
                        scope.transaction_id()
                    );
                    report
                        .failures
                        .push((participant.name().to_string(), e.to_string()));
                }
            }
        }

        report
    }
}
