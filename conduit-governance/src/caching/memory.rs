use super::store::CacheStore;
use async_trait::async_trait;
use conduit_core::RpcError;
use once_cell::sync::Lazy;
use rand::Rng;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, trace};

static INSTANT_EPOCH: Lazy<Instant> = Lazy::new(Instant::now);

fn now_nanos() -> u64 {
    Instant::now().duration_since(*INSTANT_EPOCH).as_nanos() as u64
}

/// 缓存条目
#[derive(Debug)]
struct CacheEntry {
    value: Value,
    created_at: Instant,
    hit_count: AtomicU64,
    last_access: AtomicU64,
}

impl CacheEntry {
    fn new(value: Value) -> Self {
        Self {
            value,
            created_at: Instant::now(),
            hit_count: AtomicU64::new(0),
            last_access: AtomicU64::new(now_nanos()),
        }
    }

    fn is_expired(&self, ttl: Duration) -> bool {
        self.created_at.elapsed() > ttl
    }

    fn touch(&self) {
        self.last_access.store(now_nanos(), Ordering::Relaxed);
        self.hit_count.fetch_add(1, Ordering::Relaxed);
    }
}

type Bucket = HashMap<String, CacheEntry>;

/// 进程内缓存存储
///
/// 条目按 TTL 过期，每个缓存名称最多保存 `max_entries` 个条目，超出时随机采样淘汰最久未访问的条目。
pub struct MemoryCacheStore {
    caches: RwLock<HashMap<String, Bucket>>,
    ttl: Duration,
    max_entries: usize,
    // 统计信息
    total_requests: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    evictions: AtomicU64,
}

impl Default for MemoryCacheStore {
    fn default() -> Self {
        Self::new(Duration::from_secs(300), 10_000)
    }
}

impl MemoryCacheStore {
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            caches: RwLock::new(HashMap::new()),
            ttl,
            max_entries: max_entries.max(1),
            total_requests: AtomicU64::new(0),
            cache_hits: AtomicU64::new(0),
            cache_misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    fn cleanup_expired_entries(&self, bucket: &mut Bucket) {
        let ttl = self.ttl;
        let before = bucket.len();
        bucket.retain(|_, entry| !entry.is_expired(ttl));
        let removed = before - bucket.len();
        if removed > 0 {
            debug!("Removed {} expired cache entries", removed);
        }
    }

    /// 驱逐最少使用的条目 (随机采样)
    fn evict_lru_entry(&self, bucket: &mut Bucket) {
        const SAMPLE_SIZE: usize = 5;

        let keys: Vec<&String> = bucket.keys().collect();
        if keys.is_empty() {
            return;
        }

        let mut rng = rand::rng();
        let lru_key = (0..SAMPLE_SIZE)
            .map(|_| keys[rng.random_range(0..keys.len())])
            .filter_map(|key| {
                bucket
                    .get(key)
                    .map(|entry| (key, entry.last_access.load(Ordering::Relaxed)))
            })
            .min_by_key(|&(_, last_access)| last_access)
            .map(|(key, _)| key.clone());

        if let Some(key) = lru_key {
            bucket.remove(&key);
            self.evictions.fetch_add(1, Ordering::Relaxed);
            debug!("Evicted LRU cache entry: {}", key);
        }
    }

    pub async fn clear(&self) {
        self.caches.write().await.clear();
        debug!("Cache cleared");
    }

    /// 获取某个缓存中的条目数量（包含尚未清理的过期条目）
    pub async fn size(&self, cache_name: &str) -> usize {
        self.caches
            .read()
            .await
            .get(cache_name)
            .map(HashMap::len)
            .unwrap_or(0)
    }

    pub fn get_stats(&self) -> CacheStats {
        let total = self.total_requests.load(Ordering::Relaxed);
        let hits = self.cache_hits.load(Ordering::Relaxed);
        let misses = self.cache_misses.load(Ordering::Relaxed);
        let evictions = self.evictions.load(Ordering::Relaxed);

        let hit_rate = if total > 0 {
            (hits as f64 / total as f64) * 100.0
        } else {
            0.0
        };

        CacheStats {
            total_requests: total,
            cache_hits: hits,
            cache_misses: misses,
            hit_rate,
            evictions,
        }
    }

    pub fn reset_stats(&self) {
        self.total_requests.store(0, Ordering::Relaxed);
        self.cache_hits.store(0, Ordering::Relaxed);
        self.cache_misses.store(0, Ordering::Relaxed);
        self.evictions.store(0, Ordering::Relaxed);
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn get(&self, cache_name: &str, key: &str) -> Result<Option<Value>, RpcError> {
        self.total_requests.fetch_add(1, Ordering::Relaxed);

        let caches = self.caches.read().await;
        if let Some(entry) = caches.get(cache_name).and_then(|bucket| bucket.get(key)) {
            if !entry.is_expired(self.ttl) {
                entry.touch();
                self.cache_hits.fetch_add(1, Ordering::Relaxed);
                trace!(
                    "Cache hit for {}/{}, hit_count: {}",
                    cache_name,
                    key,
                    entry.hit_count.load(Ordering::Relaxed)
                );
                return Ok(Some(entry.value.clone()));
            }
            debug!("Cache entry expired for {}/{}", cache_name, key);
        }

        self.cache_misses.fetch_add(1, Ordering::Relaxed);
        trace!("Cache miss for {}/{}", cache_name, key);
        Ok(None)
    }

    async fn set(&self, cache_name: &str, key: &str, value: Value) -> Result<(), RpcError> {
        let mut caches = self.caches.write().await;
        let bucket = caches.entry(cache_name.to_string()).or_default();

        self.cleanup_expired_entries(bucket);
        if !bucket.contains_key(key) && bucket.len() >= self.max_entries {
            self.evict_lru_entry(bucket);
        }

        bucket.insert(key.to_string(), CacheEntry::new(value));
        debug!("Cached value for {}/{}", cache_name, key);
        Ok(())
    }

    async fn remove(&self, cache_name: &str, key: &str) -> Result<bool, RpcError> {
        let mut caches = self.caches.write().await;
        let removed = caches
            .get_mut(cache_name)
            .and_then(|bucket| bucket.remove(key))
            .is_some();
        if removed {
            debug!("Removed cache entry {}/{}", cache_name, key);
        }
        Ok(removed)
    }

    async fn remove_by_prefix(&self, cache_name: &str, prefix: &str) -> Result<usize, RpcError> {
        let mut caches = self.caches.write().await;
        let Some(bucket) = caches.get_mut(cache_name) else {
            return Ok(0);
        };

        let before = bucket.len();
        bucket.retain(|key, _| !key.starts_with(prefix));
        let removed = before - bucket.len();
        debug!(
            "Removed {} cache entries with prefix {}/{}",
            removed, cache_name, prefix
        );
        Ok(removed)
    }
}

/// 缓存统计信息
#[derive(Debug, Clone)]
pub struct CacheStats {
    pub total_requests: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub hit_rate: f64,
    pub evictions: u64,
}

impl std::fmt::Display for CacheStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Cache Stats: {} requests, {} hits ({:.1}%), {} misses, {} evictions",
            self.total_requests, self.cache_hits, self.hit_rate, self.cache_misses, self.evictions
        )
    }
}
