//! 一致性哈希选择
//!
//! 每个端点在环上放置若干虚拟节点，哈希键顺时针找到的第一个节点决定目标端点。
//! 哈希环按操作缓存，只有在启用端点集合变化时才会重建。

use super::selector::{EndpointSelector, RandomSelector, SelectContext};
use conduit_core::{Endpoint, RpcError};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::Arc;

pub const DEFAULT_VIRTUAL_NODES: usize = 160;

#[derive(Debug)]
struct HashRing {
    members: Vec<String>,
    nodes: BTreeMap<u64, String>,
}

impl HashRing {
    fn build(members: Vec<String>, virtual_nodes: usize) -> Self {
        let mut nodes = BTreeMap::new();
        for member in &members {
            for replica in 0..virtual_nodes {
                nodes.insert(hash_of(&(member.as_str(), replica)), member.clone());
            }
        }
        Self { members, nodes }
    }

    fn locate(&self, key: &str) -> Option<&str> {
        let hash = hash_of(&key);
        self.nodes
            .range(hash..)
            .next()
            .or_else(|| self.nodes.iter().next())
            .map(|(_, member)| member.as_str())
    }
}

fn hash_of<T: Hash + ?Sized>(value: &T) -> u64 {
    let mut hasher = DefaultHasher::new();
    value.hash(&mut hasher);
    hasher.finish()
}

#[derive(Debug)]
pub struct ConsistentHashSelector {
    virtual_nodes: usize,
    rings: RwLock<HashMap<String, Arc<HashRing>>>,
}

impl ConsistentHashSelector {
    pub fn new(virtual_nodes: usize) -> Self {
        Self {
            virtual_nodes: virtual_nodes.max(1),
            rings: RwLock::new(HashMap::new()),
        }
    }

    pub fn virtual_nodes(&self) -> usize {
        self.virtual_nodes
    }

    fn ring(&self, operation_id: &str, candidates: &[&Endpoint]) -> Arc<HashRing> {
        let mut members: Vec<String> = candidates.iter().map(|e| e.descriptor()).collect();
        members.sort();

        if let Some(ring) = self.rings.read().get(operation_id) {
            if ring.members == members {
                return ring.clone();
            }
        }

        tracing::debug!(
            "Rebuilding hash ring for operation '{}' with {} endpoints",
            operation_id,
            members.len()
        );
        let ring = Arc::new(HashRing::build(members, self.virtual_nodes));
        self.rings
            .write()
            .insert(operation_id.to_string(), ring.clone());
        ring
    }
}

impl Default for ConsistentHashSelector {
    fn default() -> Self {
        Self::new(DEFAULT_VIRTUAL_NODES)
    }
}

impl EndpointSelector for ConsistentHashSelector {
    fn name(&self) -> &str {
        "consistent_hash"
    }

    fn choose<'a>(
        &self,
        context: &SelectContext<'a>,
        candidates: &[&'a Endpoint],
    ) -> Result<&'a Endpoint, RpcError> {
        let Some(hash_key) = context.hash_key else {
            tracing::debug!(
                "No hash key for operation '{}', falling back to random selection",
                context.operation_id
            );
            return Ok(RandomSelector::pick(candidates));
        };

        let ring = self.ring(context.operation_id, candidates);
        ring.locate(hash_key)
            .and_then(|descriptor| {
                candidates
                    .iter()
                    .copied()
                    .find(|e| e.descriptor() == descriptor)
            })
            .ok_or_else(|| RpcError::NoRouteAvailable {
                operation_id: context.operation_id.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoints(count: u8) -> Vec<Endpoint> {
        (1..=count)
            .map(|i| Endpoint::tcp(format!("10.0.0.{i}"), 2200))
            .collect()
    }

    #[test]
    fn test_same_key_same_endpoint() {
        let endpoints = endpoints(4);
        let selector = ConsistentHashSelector::default();

        for key in ["user-1", "user-2", "user-3", "order-42"] {
            let context = SelectContext::new("op", &endpoints).with_hash_key(Some(key));
            let first = selector.select(&context).unwrap().clone();
            for _ in 0..20 {
                assert_eq!(selector.select(&context).unwrap(), &first);
            }
        }
    }

    #[test]
    fn test_keys_spread_across_endpoints() {
        let endpoints = endpoints(4);
        let selector = ConsistentHashSelector::default();

        let mut used = std::collections::HashSet::new();
        for i in 0..200 {
            let key = format!("user-{i}");
            let context = SelectContext::new("op", &endpoints).with_hash_key(Some(&key));
            used.insert(selector.select(&context).unwrap().host.clone());
        }
        assert_eq!(used.len(), 4);
    }

    #[test]
    fn test_disabling_endpoint_only_moves_its_keys() {
        let mut endpoints = endpoints(4);
        let selector = ConsistentHashSelector::default();

        let keys: Vec<String> = (0..100).map(|i| format!("key-{i}")).collect();
        let before: Vec<String> = keys
            .iter()
            .map(|k| {
                let context = SelectContext::new("op", &endpoints).with_hash_key(Some(k));
                selector.select(&context).unwrap().host.clone()
            })
            .collect();

        endpoints[0] = endpoints[0].clone().disabled();
        for (key, previous) in keys.iter().zip(&before) {
            let context = SelectContext::new("op", &endpoints).with_hash_key(Some(key));
            let now = selector.select(&context).unwrap().host.clone();
            assert_ne!(now, "10.0.0.1");
            if previous != "10.0.0.1" {
                assert_eq!(&now, previous);
            }
        }
    }

    #[test]
    fn test_missing_hash_key_falls_back() {
        let endpoints = endpoints(2);
        let selector = ConsistentHashSelector::new(8);
        let context = SelectContext::new("op", &endpoints);
        assert!(selector.select(&context).is_ok());
        assert_eq!(selector.virtual_nodes(), 8);
    }
}
