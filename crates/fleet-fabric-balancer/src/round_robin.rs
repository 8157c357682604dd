//! Round-robin with exponentially decayed health and a per-service circuit
//! breaker (spec §4.3.1). Grounded on `RoundRobinCounter` (per-name `AtomicUsize`
//! in a `DashMap`) and the decay/threshold shape of `CircuitBreaker`, re-scoped
//! to a failure-rate threshold instead of a raw failure count.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use fleet_fabric_core::{InstanceStatus, ServiceInstance};
use parking_lot::Mutex;

use crate::LoadBalancer;

const EVALUATION_WINDOW: Duration = Duration::from_secs(60);
const MINIMUM_SAMPLE_SIZE: f64 = 5.0;
const FAILURE_THRESHOLD: f64 = 0.5;
const OPEN_CIRCUIT_DURATION: Duration = Duration::from_secs(30);

struct HealthRecord {
    successes: f64,
    failures: f64,
    last_sample: Instant,
    circuit_open_until: Option<Instant>,
}

impl HealthRecord {
    fn new() -> Self {
        Self {
            successes: 0.0,
            failures: 0.0,
            last_sample: Instant::now(),
            circuit_open_until: None,
        }
    }

    fn decay(&mut self, now: Instant) {
        let dt = now.saturating_duration_since(self.last_sample).as_secs_f64();
        let factor = (-dt / EVALUATION_WINDOW.as_secs_f64()).exp();
        self.successes *= factor;
        self.failures *= factor;
        self.last_sample = now;
    }

    fn is_healthy(&self, now: Instant) -> bool {
        if let Some(until) = self.circuit_open_until {
            if now < until {
                return false;
            }
        }
        let total = self.successes + self.failures;
        !(total >= MINIMUM_SAMPLE_SIZE && self.failures / total > FAILURE_THRESHOLD)
    }
}

struct RoundRobinCounter {
    counter: AtomicUsize,
}

impl RoundRobinCounter {
    fn new() -> Self {
        Self {
            counter: AtomicUsize::new(0),
        }
    }

    /// Modulo-2^32 overflow of the counter itself is harmless: we only ever
    /// reduce it modulo the candidate count at selection time.
    fn next(&self, candidate_count: usize) -> usize {
        if candidate_count == 0 {
            0
        } else {
            self.counter.fetch_add(1, Ordering::Relaxed) % candidate_count
        }
    }
}

/// Round-robin selection with per-`service_name` rotation and per-`service_id`
/// health tracking, so two distinct fleets rotate independently.
pub struct RoundRobinBalancer {
    counters: DashMap<String, RoundRobinCounter>,
    health: DashMap<String, Mutex<HealthRecord>>,
}

impl RoundRobinBalancer {
    pub fn new() -> Self {
        Self {
            counters: DashMap::new(),
            health: DashMap::new(),
        }
    }
}

impl Default for RoundRobinBalancer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LoadBalancer for RoundRobinBalancer {
    async fn select(
        &self,
        service_name: &str,
        instances: &[ServiceInstance],
        _affinity_key: Option<&str>,
    ) -> Option<ServiceInstance> {
        let now = Instant::now();
        let up: Vec<&ServiceInstance> = instances.iter().filter(|i| i.status == InstanceStatus::Up).collect();
        if up.is_empty() {
            return None;
        }

        let healthy: Vec<&ServiceInstance> = up
            .iter()
            .copied()
            .filter(|i| {
                self.health
                    .get(&i.service_id)
                    .map(|r| r.lock().is_healthy(now))
                    .unwrap_or(true)
            })
            .collect();

        // Fail-open: if nothing is healthy, fall back to the full Up set.
        let candidates = if healthy.is_empty() { up } else { healthy };

        let counter = self
            .counters
            .entry(service_name.to_string())
            .or_insert_with(RoundRobinCounter::new);
        let index = counter.next(candidates.len());
        Some(candidates[index].clone())
    }

    async fn record_success(&self, service_id: &str) {
        let now = Instant::now();
        let mut record = self
            .health
            .entry(service_id.to_string())
            .or_insert_with(|| Mutex::new(HealthRecord::new()));
        let mut record = record.lock();
        record.decay(now);
        record.successes += 1.0;
        record.circuit_open_until = None;
    }

    async fn record_failure(&self, service_id: &str) {
        let now = Instant::now();
        let mut record = self
            .health
            .entry(service_id.to_string())
            .or_insert_with(|| Mutex::new(HealthRecord::new()));
        let mut record = record.lock();
        record.decay(now);
        record.failures += 1.0;

        let total = record.successes + record.failures;
        if total >= MINIMUM_SAMPLE_SIZE && record.failures / total > FAILURE_THRESHOLD {
            record.circuit_open_until = Some(now + OPEN_CIRCUIT_DURATION);
            tracing::warn!(service_id, "circuit opened after crossing failure threshold");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn instance(id: &str) -> ServiceInstance {
        ServiceInstance {
            service_id: id.to_string(),
            service_name: "GameServer".to_string(),
            address: "10.0.0.1".to_string(),
            port: 7000,
            scheme: fleet_fabric_core::Scheme::Http,
            version: "1.0".to_string(),
            metadata: HashMap::new(),
            status: InstanceStatus::Up,
            last_heartbeat: chrono::Utc::now(),
        }
    }

    #[tokio::test]
    async fn round_robin_rotates_fairly() {
        let lb = RoundRobinBalancer::new();
        let instances = vec![instance("a"), instance("b"), instance("c")];
        let mut seen = Vec::new();
        for _ in 0..6 {
            let picked = lb.select("GameServer", &instances, None).await.unwrap();
            seen.push(picked.service_id);
        }
        assert_eq!(seen, vec!["a", "b", "c", "a", "b", "c"]);
    }

    #[tokio::test]
    async fn two_names_rotate_independently() {
        let lb = RoundRobinBalancer::new();
        let instances = vec![instance("a"), instance("b")];
        let first = lb.select("Alpha", &instances, None).await.unwrap();
        let second = lb.select("Beta", &instances, None).await.unwrap();
        assert_eq!(first.service_id, "a");
        assert_eq!(second.service_id, "a");
    }

    #[tokio::test]
    async fn circuit_opens_after_failure_threshold() {
        let lb = RoundRobinBalancer::new();
        let instances = vec![instance("a"), instance("b")];

        for _ in 0..6 {
            lb.record_failure("a").await;
        }

        for _ in 0..10 {
            let picked = lb.select("GameServer", &instances, None).await.unwrap();
            assert_eq!(picked.service_id, "b");
        }
    }

    #[tokio::test]
    async fn success_clears_open_circuit() {
        let lb = RoundRobinBalancer::new();
        for _ in 0..6 {
            lb.record_failure("a").await;
        }
        lb.record_success("a").await;

        let instances = vec![instance("a")];
        let picked = lb.select("GameServer", &instances, None).await;
        assert!(picked.is_some());
    }

    #[tokio::test]
    async fn fail_open_when_all_candidates_unhealthy() {
        let lb = RoundRobinBalancer::new();
        let instances = vec![instance("a")];
        for _ in 0..6 {
            lb.record_failure("a").await;
        }
        // only candidate is unhealthy, but fail-open still returns it rather than None
        let picked = lb.select("GameServer", &instances, None).await;
        assert!(picked.is_some());
    }

    #[tokio::test]
    async fn no_up_instances_returns_none() {
        let lb = RoundRobinBalancer::new();
        let mut down = instance("a");
        down.status = InstanceStatus::Down;
        let picked = lb.select("GameServer", &[down], None).await;
        assert!(picked.is_none());
    }
}
