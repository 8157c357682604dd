//! Backend-agnostic registry operations (spec §4.1): `Register`, `Unregister`,
//! `Discover`, `Get`, `Refresh`. Owns the key schema (spec §6) so the Redis and
//! etcd backends only implement raw KV mechanics.

use std::time::Duration;

use chrono::Utc;
use fleet_fabric_core::{FabricError, ServiceInstance};

use crate::backend::RegistryBackend;

pub struct RegistryFacade<B: RegistryBackend> {
    backend: B,
    prefix: String,
}

impl<B: RegistryBackend> RegistryFacade<B> {
    pub fn new(backend: B, prefix: impl Into<String>) -> Self {
        Self {
            backend,
            prefix: prefix.into(),
        }
    }

    fn record_key(&self, name: &str, id: &str) -> String {
        format!("{}/service/{}/{}", self.prefix, name, id)
    }

    fn index_key(&self, id: &str) -> String {
        format!("{}/index/{}", self.prefix, id)
    }

    fn list_key(&self, name: &str) -> String {
        format!("{}/list/{}", self.prefix, name)
    }

    fn scan_prefix(&self, name: &str) -> String {
        format!("{}/service/{}/", self.prefix, name)
    }

    /// Writes the service record and reverse index under one shared TTL/lease,
    /// stamping `last_heartbeat` to now. Idempotent: re-registering the same id
    /// just extends its TTL and replaces the stored record.
    pub async fn register(&self, instance: &ServiceInstance, ttl: Duration) -> Result<(), FabricError> {
        let mut instance = instance.clone();
        instance.last_heartbeat = Utc::now();

        let value = serde_json::to_string(&instance).map_err(|e| FabricError::Serialization {
            message: e.to_string(),
        })?;
        let record_key = self.record_key(&instance.service_name, &instance.service_id);
        let index_key = self.index_key(&instance.service_id);

        self.backend
            .put_all(&[(record_key, value), (index_key, instance.service_name.clone())], ttl)
            .await?;

        let list_key = self.list_key(&instance.service_name);
        self.backend.track_member(&list_key, &instance.service_id, ttl).await?;

        tracing::info!(
            service_id = %instance.service_id,
            service_name = %instance.service_name,
            "registered service instance"
        );
        Ok(())
    }

    /// Removes the record and reverse index. A missing instance is not an error
    /// — unregistering twice is a no-op the second time.
    pub async fn unregister(&self, service_id: &str) -> Result<(), FabricError> {
        let index_key = self.index_key(service_id);
        let name = match self.backend.get(&index_key).await? {
            Some(name) => name,
            None => return Ok(()),
        };

        let record_key = self.record_key(&name, service_id);
        self.backend.delete_all(&[record_key, index_key]).await?;

        let list_key = self.list_key(&name);
        self.backend.untrack_member(&list_key, service_id).await?;

        tracing::info!(service_id, "unregistered service instance");
        Ok(())
    }

    /// All `Up` instances registered under `name`. Records that fail to
    /// deserialize are skipped and logged rather than failing the whole call —
    /// one corrupt entry must not take down discovery for the rest of the fleet.
    pub async fn discover(&self, name: &str) -> Result<Vec<ServiceInstance>, FabricError> {
        let list_key = self.list_key(name);
        let prefix = self.scan_prefix(name);
        let raw = self.backend.scan(&prefix, Some(&list_key)).await?;

        let mut instances = Vec::with_capacity(raw.len());
        for value in raw {
            match serde_json::from_str::<ServiceInstance>(&value) {
                Ok(instance) if instance.is_up() => instances.push(instance),
                Ok(_) => {}
                Err(e) => tracing::warn!(error = %e, "skipping undeserializable registry record"),
            }
        }
        Ok(instances)
    }

    /// One-hop lookup via the reverse index.
    pub async fn get(&self, service_id: &str) -> Result<Option<ServiceInstance>, FabricError> {
        let index_key = self.index_key(service_id);
        let name = match self.backend.get(&index_key).await? {
            Some(name) => name,
            None => return Ok(None),
        };
        let record_key = self.record_key(&name, service_id);
        match self.backend.get(&record_key).await? {
            Some(value) => {
                let instance = serde_json::from_str(&value).map_err(|e| FabricError::Serialization {
                    message: e.to_string(),
                })?;
                Ok(Some(instance))
            }
            None => Ok(None),
        }
    }

    /// Re-registers the existing record under a fresh TTL/lease.
    pub async fn refresh(&self, service_id: &str, ttl: Duration) -> Result<(), FabricError> {
        match self.get(service_id).await? {
            Some(instance) => self.register(&instance, ttl).await,
            None => Err(FabricError::Backend {
                message: format!("cannot refresh unknown instance '{service_id}'"),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    struct InMemoryBackend {
        kv: Mutex<HashMap<String, String>>,
        sets: Mutex<HashMap<String, Vec<String>>>,
    }

    #[async_trait]
    impl RegistryBackend for InMemoryBackend {
        async fn put_all(&self, entries: &[(String, String)], _ttl: Duration) -> Result<(), FabricError> {
            let mut kv = self.kv.lock().unwrap();
            for (k, v) in entries {
                kv.insert(k.clone(), v.clone());
            }
            Ok(())
        }

        async fn get(&self, key: &str) -> Result<Option<String>, FabricError> {
            Ok(self.kv.lock().unwrap().get(key).cloned())
        }

        async fn delete_all(&self, keys: &[String]) -> Result<(), FabricError> {
            let mut kv = self.kv.lock().unwrap();
            for k in keys {
                kv.remove(k);
            }
            Ok(())
        }

        async fn scan(&self, prefix: &str, _set_key: Option<&str>) -> Result<Vec<String>, FabricError> {
            let kv = self.kv.lock().unwrap();
            Ok(kv
                .iter()
                .filter(|(k, _)| k.starts_with(prefix))
                .map(|(_, v)| v.clone())
                .collect())
        }

        async fn track_member(&self, set_key: &str, member: &str, _ttl: Duration) -> Result<(), FabricError> {
            self.sets
                .lock()
                .unwrap()
                .entry(set_key.to_string())
                .or_default()
                .push(member.to_string());
            Ok(())
        }

        async fn untrack_member(&self, set_key: &str, member: &str) -> Result<(), FabricError> {
            if let Some(members) = self.sets.lock().unwrap().get_mut(set_key) {
                members.retain(|m| m != member);
            }
            Ok(())
        }
    }

    fn sample_instance(id: &str) -> ServiceInstance {
        ServiceInstance {
            service_id: id.to_string(),
            service_name: "GameServer".to_string(),
            address: "10.0.0.1".to_string(),
            port: 7000,
            scheme: fleet_fabric_core::Scheme::Http,
            version: "1.0".to_string(),
            metadata: HashMap::new(),
            status: fleet_fabric_core::InstanceStatus::Up,
            last_heartbeat: Utc::now(),
        }
    }

    #[tokio::test]
    async fn register_then_discover_roundtrips() {
        let facade = RegistryFacade::new(InMemoryBackend::default(), "fleet");
        facade
            .register(&sample_instance("srv-1"), Duration::from_secs(30))
            .await
            .unwrap();

        let found = facade.discover("GameServer").await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].service_id, "srv-1");
    }

    #[tokio::test]
    async fn re_register_is_idempotent() {
        let facade = RegistryFacade::new(InMemoryBackend::default(), "fleet");
        let instance = sample_instance("srv-1");
        facade.register(&instance, Duration::from_secs(30)).await.unwrap();
        facade.register(&instance, Duration::from_secs(30)).await.unwrap();

        let found = facade.discover("GameServer").await.unwrap();
        assert_eq!(found.len(), 1);
    }

    #[tokio::test]
    async fn unregister_removes_record_and_index() {
        let facade = RegistryFacade::new(InMemoryBackend::default(), "fleet");
        facade
            .register(&sample_instance("srv-1"), Duration::from_secs(30))
            .await
            .unwrap();

        facade.unregister("srv-1").await.unwrap();

        assert!(facade.get("srv-1").await.unwrap().is_none());
        assert!(facade.discover("GameServer").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unregister_missing_instance_is_not_an_error() {
        let facade = RegistryFacade::new(InMemoryBackend::default(), "fleet");
        facade.unregister("does-not-exist").await.unwrap();
    }

    #[tokio::test]
    async fn refresh_updates_last_heartbeat() {
        let facade = RegistryFacade::new(InMemoryBackend::default(), "fleet");
        let instance = sample_instance("srv-1");
        facade.register(&instance, Duration::from_secs(30)).await.unwrap();

        let before = facade.get("srv-1").await.unwrap().unwrap().last_heartbeat;
        tokio::time::sleep(Duration::from_millis(5)).await;
        facade.refresh("srv-1", Duration::from_secs(30)).await.unwrap();
        let after = facade.get("srv-1").await.unwrap().unwrap().last_heartbeat;

        assert!(after > before);
    }

    #[tokio::test]
    async fn refresh_unknown_instance_fails() {
        let facade = RegistryFacade::new(InMemoryBackend::default(), "fleet");
        let err = facade.refresh("ghost", Duration::from_secs(30)).await.unwrap_err();
        assert!(matches!(err, FabricError::Backend { .. }));
    }

    #[tokio::test]
    async fn discover_skips_down_instances() {
        let facade = RegistryFacade::new(InMemoryBackend::default(), "fleet");
        let mut down = sample_instance("srv-down");
        down.status = fleet_fabric_core::InstanceStatus::Down;
        facade.register(&down, Duration::from_secs(30)).await.unwrap();

        assert!(facade.discover("GameServer").await.unwrap().is_empty());
    }
}
