use conduit_core::Endpoint;
use conduit_loadbalance::HealthLedger;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// 调用结果的健康记录守卫
///
/// 创建时登记在途调用，`success`/`failure` 记录一次结果。
/// 若调用在记录前被取消（future 被丢弃），`Drop` 会记录一次失败。
pub struct HealthGuard {
    ledger: Arc<HealthLedger>,
    operation_id: String,
    endpoint: Endpoint,
    started: Instant,
    recorded: bool,
}

impl HealthGuard {
    pub fn start(ledger: Arc<HealthLedger>, operation_id: &str, endpoint: &Endpoint) -> Self {
        ledger.monitor(operation_id, endpoint);
        Self {
            ledger,
            operation_id: operation_id.to_string(),
            endpoint: endpoint.clone(),
            started: Instant::now(),
            recorded: false,
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn success(mut self) {
        self.recorded = true;
        self.ledger
            .record_success(&self.operation_id, &self.endpoint, self.started.elapsed());
    }

    pub fn failure(mut self) {
        self.recorded = true;
        self.ledger
            .record_failure(&self.operation_id, &self.endpoint, self.started.elapsed());
    }
}

impl Drop for HealthGuard {
    fn drop(&mut self) {
        if self.recorded {
            return;
        }
        tracing::warn!(
            "Invocation of {} on {} was cancelled after {}ms",
            self.operation_id,
            self.endpoint,
            self.started.elapsed().as_millis()
        );
        self.ledger
            .record_failure(&self.operation_id, &self.endpoint, self.started.elapsed());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guard_records_once() {
        let ledger = Arc::new(HealthLedger::new());
        let endpoint = Endpoint::tcp("10.0.0.1", 2200);

        HealthGuard::start(ledger.clone(), "op", &endpoint).success();
        HealthGuard::start(ledger.clone(), "op", &endpoint).failure();

        let snapshot = ledger.snapshot("op", &endpoint).unwrap();
        assert_eq!(snapshot.successes, 1);
        assert_eq!(snapshot.failures, 1);
        assert_eq!(snapshot.in_flight, 0);
    }

    #[test]
    fn test_dropped_guard_records_failure() {
        let ledger = Arc::new(HealthLedger::new());
        let endpoint = Endpoint::tcp("10.0.0.1", 2200);

        {
            let guard = HealthGuard::start(ledger.clone(), "op", &endpoint);
            assert_eq!(ledger.snapshot("op", &endpoint).unwrap().in_flight, 1);
            let _ = guard.elapsed();
        }

        let snapshot = ledger.snapshot("op", &endpoint).unwrap();
        assert_eq!(snapshot.failures, 1);
        assert_eq!(snapshot.successes, 0);
        assert_eq!(snapshot.in_flight, 0);
    }
}
