use chrono::{DateTime, Utc};
use conduit_core::Endpoint;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// 单个（操作, 端点）的计数器
#[derive(Debug, Default)]
struct HealthCounters {
    successes: AtomicU64,
    failures: AtomicU64,
    total_latency_ms: AtomicU64,
    in_flight: AtomicU64,
    max_concurrent: AtomicU64,
    last_failure_at: Mutex<Option<DateTime<Utc>>>,
}

impl HealthCounters {
    fn finish(&self) {
        // 没有经过 monitor 的记录不会让在途数下溢
        let _ = self
            .in_flight
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
    }
}

/// 健康统计快照，供外部健康监控和报表读取
#[derive(Debug, Clone, Serialize)]
pub struct HealthSnapshot {
    pub operation_id: String,
    pub endpoint: String,
    pub successes: u64,
    pub failures: u64,
    pub total_latency_ms: u64,
    pub in_flight: u64,
    pub max_concurrent: u64,
    pub last_failure_at: Option<DateTime<Utc>>,
}

impl HealthSnapshot {
    pub fn total(&self) -> u64 {
        self.successes + self.failures
    }

    pub fn average_latency(&self) -> Option<Duration> {
        match self.total() {
            0 => None,
            n => Some(Duration::from_millis(self.total_latency_ms / n)),
        }
    }

    pub fn failure_ratio(&self) -> f64 {
        match self.total() {
            0 => 0.0,
            n => self.failures as f64 / n as f64,
        }
    }
}

/// 端点健康账本
///
/// 每次完成的调用恰好记录一次成功或失败。计数器是原子量，并发调用不会丢失计数。
/// 账本只负责记录，不会自动禁用端点。
#[derive(Debug, Default)]
pub struct HealthLedger {
    entries: RwLock<HashMap<(String, String), Arc<HealthCounters>>>,
    total_requests: AtomicU64,
    successful_requests: AtomicU64,
}

impl HealthLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn counters(&self, operation_id: &str, endpoint: &Endpoint) -> Arc<HealthCounters> {
        let key = (operation_id.to_string(), endpoint.descriptor());
        if let Some(counters) = self.entries.read().get(&key) {
            return counters.clone();
        }
        self.entries.write().entry(key).or_default().clone()
    }

    /// 调用开始：在途数加一并更新最大并发
    pub fn monitor(&self, operation_id: &str, endpoint: &Endpoint) {
        let counters = self.counters(operation_id, endpoint);
        let current = counters.in_flight.fetch_add(1, Ordering::AcqRel) + 1;
        counters.max_concurrent.fetch_max(current, Ordering::AcqRel);
    }

    pub fn record_success(&self, operation_id: &str, endpoint: &Endpoint, elapsed: Duration) {
        let counters = self.counters(operation_id, endpoint);
        counters.successes.fetch_add(1, Ordering::Relaxed);
        counters
            .total_latency_ms
            .fetch_add(elapsed.as_millis() as u64, Ordering::Relaxed);
        counters.finish();

        self.total_requests.fetch_add(1, Ordering::Relaxed);
        self.successful_requests.fetch_add(1, Ordering::Relaxed);

        tracing::trace!(
            "Recorded success for {} on {} ({}ms)",
            operation_id,
            endpoint,
            elapsed.as_millis()
        );
    }

    pub fn record_failure(&self, operation_id: &str, endpoint: &Endpoint, elapsed: Duration) {
        let counters = self.counters(operation_id, endpoint);
        counters.failures.fetch_add(1, Ordering::Relaxed);
        counters
            .total_latency_ms
            .fetch_add(elapsed.as_millis() as u64, Ordering::Relaxed);
        *counters.last_failure_at.lock() = Some(Utc::now());
        counters.finish();

        self.total_requests.fetch_add(1, Ordering::Relaxed);

        tracing::debug!(
            "Recorded failure for {} on {} ({}ms)",
            operation_id,
            endpoint,
            elapsed.as_millis()
        );
    }

    pub fn snapshot(&self, operation_id: &str, endpoint: &Endpoint) -> Option<HealthSnapshot> {
        let key = (operation_id.to_string(), endpoint.descriptor());
        self.entries
            .read()
            .get(&key)
            .map(|counters| Self::to_snapshot(&key, counters))
    }

    pub fn snapshot_all(&self) -> Vec<HealthSnapshot> {
        let mut snapshots: Vec<HealthSnapshot> = self
            .entries
            .read()
            .iter()
            .map(|(key, counters)| Self::to_snapshot(key, counters))
            .collect();
        snapshots.sort_by(|a, b| {
            a.operation_id
                .cmp(&b.operation_id)
                .then_with(|| a.endpoint.cmp(&b.endpoint))
        });
        snapshots
    }

    fn to_snapshot(key: &(String, String), counters: &HealthCounters) -> HealthSnapshot {
        HealthSnapshot {
            operation_id: key.0.clone(),
            endpoint: key.1.clone(),
            successes: counters.successes.load(Ordering::Relaxed),
            failures: counters.failures.load(Ordering::Relaxed),
            total_latency_ms: counters.total_latency_ms.load(Ordering::Relaxed),
            in_flight: counters.in_flight.load(Ordering::Relaxed),
            max_concurrent: counters.max_concurrent.load(Ordering::Relaxed),
            last_failure_at: *counters.last_failure_at.lock(),
        }
    }

    pub fn total_requests(&self) -> u64 {
        self.total_requests.load(Ordering::Relaxed)
    }

    pub fn successful_requests(&self) -> u64 {
        self.successful_requests.load(Ordering::Relaxed)
    }

    pub fn success_rate(&self) -> f64 {
        match self.total_requests() {
            0 => 0.0,
            total => self.successful_requests() as f64 / total as f64,
        }
    }

    pub fn reset(&self) {
        self.entries.write().clear();
        self.total_requests.store(0, Ordering::Relaxed);
        self.successful_requests.store(0, Ordering::Relaxed);
    }
}
