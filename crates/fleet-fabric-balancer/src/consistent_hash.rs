//! Consistent hashing with virtual nodes and ring-signature caching (spec
//! §4.3.2). Grounded on `ConsistentHashRing`'s `BTreeMap<u64, Uuid>` ring and
//! lazy-rebuild-on-instance-set-change shape, re-scoped to SHA-1-truncated
//! hashing and the spec's cache-invalidation-by-signature rule.

use std::collections::BTreeMap;

use async_trait::async_trait;
use dashmap::DashMap;
use fleet_fabric_core::{InstanceStatus, ServiceInstance};
use parking_lot::RwLock;
use rand::RngCore;
use sha1::{Digest, Sha1};

use crate::LoadBalancer;

const DEFAULT_VIRTUAL_NODES: usize = 160;

fn hash_u32(input: &str) -> u32 {
    let digest = Sha1::digest(input.as_bytes());
    u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]])
}

/// Canonical join of `id:address:port:scheme:version` over `Up` instances,
/// sorted, so the cache can detect when the instance set actually changed.
fn signature_of(instances: &[&ServiceInstance]) -> String {
    let mut tuples: Vec<String> = instances.iter().map(|i| i.signature_tuple()).collect();
    tuples.sort();
    tuples.join(",")
}

struct RingState {
    signature: String,
    ring: BTreeMap<u32, ServiceInstance>,
}

impl RingState {
    fn empty() -> Self {
        Self {
            signature: String::new(),
            ring: BTreeMap::new(),
        }
    }
}

/// Consistent-hash selection, one [`RingState`] cached per `service_name`.
pub struct ConsistentHashBalancer {
    virtual_nodes: usize,
    rings: DashMap<String, RwLock<RingState>>,
}

impl ConsistentHashBalancer {
    pub fn new() -> Self {
        Self::with_virtual_nodes(DEFAULT_VIRTUAL_NODES)
    }

    pub fn with_virtual_nodes(virtual_nodes: usize) -> Self {
        Self {
            virtual_nodes,
            rings: DashMap::new(),
        }
    }

    fn rebuild(&self, instances: &[&ServiceInstance], signature: &str) -> RingState {
        let mut ring = BTreeMap::new();
        for instance in instances {
            for i in 0..self.virtual_nodes {
                let key = format!("{}:{}:{}:{}", instance.service_id, instance.address, instance.port, i);
                let mut hash = hash_u32(&key);
                // Linear probe on collision.
                while ring.contains_key(&hash) {
                    hash = hash.wrapping_add(1);
                }
                ring.insert(hash, (*instance).clone());
            }
        }
        RingState {
            signature: signature.to_string(),
            ring,
        }
    }
}

impl Default for ConsistentHashBalancer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LoadBalancer for ConsistentHashBalancer {
    async fn select(
        &self,
        service_name: &str,
        instances: &[ServiceInstance],
        affinity_key: Option<&str>,
    ) -> Option<ServiceInstance> {
        let up: Vec<&ServiceInstance> = instances.iter().filter(|i| i.status == InstanceStatus::Up).collect();
        if up.is_empty() {
            return None;
        }

        let signature = signature_of(&up);
        let state_entry = self.rings.entry(service_name.to_string()).or_insert_with(|| RwLock::new(RingState::empty()));

        {
            let needs_rebuild = state_entry.read().signature != signature;
            if needs_rebuild {
                let rebuilt = self.rebuild(&up, &signature);
                *state_entry.write() = rebuilt;
            }
        }

        let key = match affinity_key {
            Some(key) => key.to_string(),
            None => {
                let mut bytes = [0u8; 16];
                rand::thread_rng().fill_bytes(&mut bytes);
                hex::encode(bytes)
            }
        };
        let h = hash_u32(&key);

        let state = state_entry.read();
        let picked = state
            .ring
            .range(h..)
            .next()
            .or_else(|| state.ring.iter().next())
            .map(|(_, instance)| instance.clone());
        picked
    }

    async fn record_success(&self, _service_id: &str) {}

    async fn record_failure(&self, _service_id: &str) {}
}
