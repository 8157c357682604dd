//! Redis-flavored [`RegistryBackend`](super::RegistryBackend), grounded on the
//! `redis_client.get_async_connection()` / `AsyncCommands` idiom used for presence
//! persistence in the realtime-communication service.

use std::time::Duration;

use async_trait::async_trait;
use fleet_fabric_core::FabricError;
use redis::AsyncCommands;

use super::RegistryBackend;

pub struct RedisRegistryBackend {
    client: redis::Client,
}

impl RedisRegistryBackend {
    pub fn new(redis_url: &str) -> Result<Self, FabricError> {
        let client = redis::Client::open(redis_url).map_err(|e| FabricError::Backend {
            message: format!("invalid redis URL: {e}"),
        })?;
        Ok(Self { client })
    }

    async fn connection(&self) -> Result<redis::aio::Connection, FabricError> {
        self.client
            .get_async_connection()
            .await
            .map_err(|e| FabricError::RegistryIo {
                message: format!("redis connection failed: {e}"),
            })
    }
}

#[async_trait]
impl RegistryBackend for RedisRegistryBackend {
    async fn put_all(&self, entries: &[(String, String)], ttl: Duration) -> Result<(), FabricError> {
        let mut conn = self.connection().await?;
        let ttl_secs = ttl.as_secs().max(1);
        let mut pipe = redis::pipe();
        pipe.atomic();
        for (key, value) in entries {
            pipe.cmd("SETEX").arg(key).arg(ttl_secs).arg(value).ignore();
        }
        pipe.query_async(&mut conn)
            .await
            .map_err(|e| FabricError::RegistryIo {
                message: format!("redis pipelined SETEX failed: {e}"),
            })
    }

    async fn get(&self, key: &str) -> Result<Option<String>, FabricError> {
        let mut conn = self.connection().await?;
        conn.get(key).await.map_err(|e| FabricError::RegistryIo {
            message: format!("redis GET failed for '{key}': {e}"),
        })
    }

    async fn delete_all(&self, keys: &[String]) -> Result<(), FabricError> {
        if keys.is_empty() {
            return Ok(());
        }
        let mut conn = self.connection().await?;
        let _: i64 = conn.del(keys).await.map_err(|e| FabricError::RegistryIo {
            message: format!("redis DEL failed: {e}"),
        })?;
        Ok(())
    }

    async fn scan(&self, prefix: &str, set_key: Option<&str>) -> Result<Vec<String>, FabricError> {
        let mut conn = self.connection().await?;

        let ids: Vec<String> = match set_key {
            Some(set_key) => conn.smembers(set_key).await.map_err(|e| FabricError::RegistryIo {
                message: format!("redis SMEMBERS failed for '{set_key}': {e}"),
            })?,
            None => {
                let pattern = format!("{prefix}*");
                conn.keys(pattern).await.map_err(|e| FabricError::RegistryIo {
                    message: format!("redis KEYS failed for prefix '{prefix}': {e}"),
                })?
            }
        };

        let mut values = Vec::with_capacity(ids.len());
        let mut stale = Vec::new();
        for id in ids {
            let key = format!("{prefix}{id}");
            match conn.get::<_, Option<String>>(&key).await {
                Ok(Some(value)) => values.push(value),
                Ok(None) => stale.push(id),
                Err(e) => {
                    return Err(FabricError::RegistryIo {
                        message: format!("redis GET failed for '{key}': {e}"),
                    })
                }
            }
        }

        if let Some(set_key) = set_key {
            if !stale.is_empty() {
                let _: Result<i64, _> = conn.srem(set_key, &stale).await;
                tracing::debug!(set_key, stale = stale.len(), "pruned stale registry set members");
            }
        }

        Ok(values)
    }

    async fn track_member(&self, set_key: &str, member: &str, ttl: Duration) -> Result<(), FabricError> {
        let mut conn = self.connection().await?;
        let ttl_secs = ttl.as_secs().max(1);
        let mut pipe = redis::pipe();
        pipe.atomic();
        pipe.cmd("SADD").arg(set_key).arg(member).ignore();
        pipe.cmd("EXPIRE").arg(set_key).arg(ttl_secs).ignore();
        pipe.query_async(&mut conn)
            .await
            .map_err(|e| FabricError::RegistryIo {
                message: format!("redis SADD/EXPIRE failed for '{set_key}': {e}"),
            })
    }

    async fn untrack_member(&self, set_key: &str, member: &str) -> Result<(), FabricError> {
        let mut conn = self.connection().await?;
        let _: i64 = conn.srem(set_key, member).await.map_err(|e| FabricError::RegistryIo {
            message: format!("redis SREM failed for '{set_key}': {e}"),
        })?;
        Ok(())
    }
}
