//! etcd-flavored [`RegistryBackend`](super::RegistryBackend): one lease shared
//! across every key in a `put_all` call stands in for Redis's pipelined `SETEX`
//! group, and a prefix range stands in for the `<prefix>/list/<name>` set.
//!
//! Each `put_all`/`delete_all` call is keyed by the caller's first entry (the
//! record key, by convention `<prefix>/instances/<id>`), which doubles as the
//! lease-tracking id: the prior lease for that id is revoked before a fresh
//! one is granted, and `delete_all` revokes the lease outright rather than
//! leaving it to expire on its own TTL.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use etcd_client::{Client, GetOptions, PutOptions};
use fleet_fabric_core::FabricError;
use tokio::sync::Mutex;

use super::RegistryBackend;

pub struct EtcdRegistryBackend {
    client: Mutex<Client>,
    leases: Mutex<HashMap<String, i64>>,
}

impl EtcdRegistryBackend {
    pub async fn connect(endpoints: &[String]) -> Result<Self, FabricError> {
        let client = Client::connect(endpoints, None)
            .await
            .map_err(|e| FabricError::Backend {
                message: format!("etcd connect failed: {e}"),
            })?;
        Ok(Self {
            client: Mutex::new(client),
            leases: Mutex::new(HashMap::new()),
        })
    }

    /// Best-effort revoke; a lease that already expired or was never granted
    /// is not an error.
    async fn revoke(client: &mut Client, lease_id: i64) {
        if let Err(e) = client.lease_revoke(lease_id).await {
            tracing::debug!(lease_id, error = %e, "etcd lease revoke failed, letting it expire on TTL");
        }
    }
}

fn to_str(bytes: &[u8], what: &str) -> Result<String, FabricError> {
    std::str::from_utf8(bytes)
        .map(str::to_owned)
        .map_err(|e| FabricError::RegistryIo {
            message: format!("non-utf8 {what} from etcd: {e}"),
        })
}

#[async_trait]
impl RegistryBackend for EtcdRegistryBackend {
    async fn put_all(&self, entries: &[(String, String)], ttl: Duration) -> Result<(), FabricError> {
        let Some((tracking_key, _)) = entries.first() else {
            return Ok(());
        };
        let tracking_key = tracking_key.clone();

        let mut client = self.client.lock().await;

        let prior = self.leases.lock().await.remove(&tracking_key);
        if let Some(prior_lease) = prior {
            Self::revoke(&mut client, prior_lease).await;
        }

        let ttl_secs = ttl.as_secs().max(1) as i64;
        let lease = client
            .lease_grant(ttl_secs, None)
            .await
            .map_err(|e| FabricError::RegistryIo {
                message: format!("etcd lease grant failed: {e}"),
            })?;
        let opts = PutOptions::new().with_lease(lease.id());
        for (key, value) in entries {
            client
                .put(key.as_bytes(), value.as_bytes(), Some(opts.clone()))
                .await
                .map_err(|e| FabricError::RegistryIo {
                    message: format!("etcd put failed for '{key}': {e}"),
                })?;
        }

        self.leases.lock().await.insert(tracking_key, lease.id());
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, FabricError> {
        let mut client = self.client.lock().await;
        let resp = client
            .get(key.as_bytes(), None)
            .await
            .map_err(|e| FabricError::RegistryIo {
                message: format!("etcd get failed for '{key}': {e}"),
            })?;
        match resp.kvs().first() {
            Some(kv) => Ok(Some(to_str(kv.value(), "value")?)),
            None => Ok(None),
        }
    }

    async fn delete_all(&self, keys: &[String]) -> Result<(), FabricError> {
        let mut client = self.client.lock().await;
        for key in keys {
            client
                .delete(key.as_bytes(), None)
                .await
                .map_err(|e| FabricError::RegistryIo {
                    message: format!("etcd delete failed for '{key}': {e}"),
                })?;
        }

        if let Some(tracking_key) = keys.first() {
            if let Some(lease_id) = self.leases.lock().await.remove(tracking_key) {
                Self::revoke(&mut client, lease_id).await;
            }
        }
        Ok(())
    }

    async fn scan(&self, prefix: &str, _set_key: Option<&str>) -> Result<Vec<String>, FabricError> {
        let mut client = self.client.lock().await;
        let resp = client
            .get(prefix.as_bytes(), Some(GetOptions::new().with_prefix()))
            .await
            .map_err(|e| FabricError::RegistryIo {
                message: format!("etcd range scan failed for prefix '{prefix}': {e}"),
            })?;
        resp.kvs()
            .iter()
            .map(|kv| to_str(kv.value(), "value"))
            .collect()
    }

    async fn track_member(&self, _set_key: &str, _member: &str, _ttl: Duration) -> Result<(), FabricError> {
        Ok(())
    }

    async fn untrack_member(&self, _set_key: &str, _member: &str) -> Result<(), FabricError> {
        Ok(())
    }
}
