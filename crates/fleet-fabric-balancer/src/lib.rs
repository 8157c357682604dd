//! Strategy-polymorphic load balancer (spec §4.3): both strategies implement
//! [`LoadBalancer`] and receive the same success/failure feedback, so callers
//! are strategy-agnostic. Grounded on the `LoadBalancer` trait and per-name
//! `DashMap` state in the service-discovery load balancer.

pub mod consistent_hash;
pub mod round_robin;

use async_trait::async_trait;
use fleet_fabric_core::ServiceInstance;

pub use consistent_hash::ConsistentHashBalancer;
pub use round_robin::RoundRobinBalancer;

/// Common selection interface (spec §4.3). Returns `None` only if no candidate
/// survives filtering.
#[async_trait]
pub trait LoadBalancer: Send + Sync {
    async fn select(
        &self,
        service_name: &str,
        instances: &[ServiceInstance],
        affinity_key: Option<&str>,
    ) -> Option<ServiceInstance>;

    async fn record_success(&self, service_id: &str);

    async fn record_failure(&self, service_id: &str);
}
