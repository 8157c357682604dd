//! The abstract KV store spec §1 calls for: prefix scans and per-key TTL/leases.
//!
//! [`RegistryFacade`](crate::facade::RegistryFacade) owns the key schema (spec §6)
//! and only ever talks to a backend through this trait, so the two concrete
//! adapters ([`RedisRegistryBackend`](crate::backend::redis::RedisRegistryBackend),
//! [`EtcdRegistryBackend`](crate::backend::etcd::EtcdRegistryBackend)) only need to
//! get the KV mechanics right.

pub mod etcd;
pub mod redis;

use std::time::Duration;

use async_trait::async_trait;
use fleet_fabric_core::FabricError;

/// Raw KV operations a registry backend must provide.
///
/// `track_member`/`untrack_member` model Redis's companion `<prefix>/list/<name>`
/// set (spec §4.1/§6); backends without such an index (etcd) implement them as
/// no-ops and rely on `scan`'s prefix range instead.
#[async_trait]
pub trait RegistryBackend: Send + Sync {
    /// Writes every `(key, value)` pair under one shared TTL/lease, as atomically
    /// as the backend allows.
    async fn put_all(&self, entries: &[(String, String)], ttl: Duration) -> Result<(), FabricError>;

    async fn get(&self, key: &str) -> Result<Option<String>, FabricError>;

    /// Deletes every key. Missing keys are not an error.
    async fn delete_all(&self, keys: &[String]) -> Result<(), FabricError>;

    /// Values for every record under `prefix`. `set_key`, when given, names a
    /// maintained id-set the backend may use instead of a full prefix scan; stale
    /// members (set membership with no backing record) are pruned opportunistically.
    async fn scan(&self, prefix: &str, set_key: Option<&str>) -> Result<Vec<String>, FabricError>;

    async fn track_member(&self, set_key: &str, member: &str, ttl: Duration) -> Result<(), FabricError>;

    async fn untrack_member(&self, set_key: &str, member: &str) -> Result<(), FabricError>;
}
