//! Per-`service_id` connection pool (spec §4.4/§5): a FIFO of idle
//! [`ClientWrapper`]s plus a permit counter bounding concurrent in-flight
//! leases. Grounded on `ConnectionPool`'s `Semaphore` + `Mutex<VecDeque<_>>`
//! shape, re-scoped so the semaphore is only held while a wrapper is rented,
//! not while it sits idle.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use fleet_fabric_core::{Cancellation, FabricError, ServiceInstance};
use tokio::sync::{Mutex, OwnedSemaphorePermit, RwLock, Semaphore};

use crate::config::RpcClientConfig;
use crate::transport::RpcTransport;

struct IdleEntry<T> {
    client: T,
    last_used: Instant,
}

/// A rented transport channel plus the permit that reserves its slot. Must
/// reach exactly one terminal transition — [`ClientPool::return_wrapper`] or
/// [`ClientPool::discard`] — to release the permit back to the pool.
pub struct ClientWrapper<T> {
    pub client: T,
    last_used: Instant,
    _permit: OwnedSemaphorePermit,
}

/// Snapshot of a pool's occupancy, for the reconciler and any external
/// observability hook.
#[derive(Debug, Clone, Copy, Default)]
pub struct PoolMetrics {
    pub idle: usize,
    pub in_flight: usize,
    pub created_total: u64,
    pub discarded_total: u64,
}

struct Counters {
    created_total: u64,
    discarded_total: u64,
}

pub struct ClientPool<T: RpcTransport> {
    instance: RwLock<ServiceInstance>,
    config: RwLock<RpcClientConfig>,
    idle: Mutex<VecDeque<IdleEntry<T>>>,
    semaphore: Arc<Semaphore>,
    counters: Mutex<Counters>,
}

impl<T: RpcTransport> ClientPool<T> {
    pub fn new(instance: ServiceInstance, config: RpcClientConfig) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.max_connections_per_service));
        Self {
            instance: RwLock::new(instance),
            config: RwLock::new(config),
            idle: Mutex::new(VecDeque::new()),
            semaphore,
            counters: Mutex::new(Counters {
                created_total: 0,
                discarded_total: 0,
            }),
        }
    }

    /// Refreshes the pool's view of the instance/config without disturbing
    /// outstanding leases or the idle queue.
    pub async fn with_latest_config(&self, instance: ServiceInstance, config: RpcClientConfig) {
        *self.instance.write().await = instance;
        *self.config.write().await = config;
    }

    /// Waits for a permit (bounded by `MaxConnectionsPerService`), then reuses
    /// an idle, non-stale wrapper or dials a new one. Stale idle entries
    /// (older than `IdleTimeout`) are dropped rather than reused.
    pub async fn rent(&self, cancel: &Cancellation) -> Result<ClientWrapper<T>, FabricError> {
        let permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(FabricError::Cancelled),
            permit = Arc::clone(&self.semaphore).acquire_owned() => {
                permit.map_err(|_| FabricError::Cancelled)?
            }
        };

        let config = self.config.read().await.clone();
        {
            let mut idle = self.idle.lock().await;
            while let Some(entry) = idle.pop_front() {
                if entry.last_used.elapsed() < config.idle_timeout {
                    return Ok(ClientWrapper {
                        client: entry.client,
                        last_used: entry.last_used,
                        _permit: permit,
                    });
                }
                tracing::debug!("discarding stale idle connection");
            }
        }

        let instance = self.instance.read().await.clone();
        let uri = instance.uri();
        let client = tokio::time::timeout(
            config.connection_timeout,
            T::connect(&uri, config.enable_tls, config.connection_timeout),
        )
        .await
        .map_err(|_| FabricError::TransportRetryable {
            service_id: instance.service_id.clone(),
            status: fleet_fabric_core::TransportStatus::DeadlineExceeded,
            message: format!("connection to '{uri}' timed out"),
        })?
        .map_err(|e| FabricError::TransportRetryable {
            service_id: instance.service_id.clone(),
            status: fleet_fabric_core::TransportStatus::Unavailable,
            message: e.to_string(),
        })?;

        self.counters.lock().await.created_total += 1;

        Ok(ClientWrapper {
            client,
            last_used: Instant::now(),
            _permit: permit,
        })
    }

    /// Enqueues the wrapper as idle and releases its permit.
    pub async fn return_wrapper(&self, mut wrapper: ClientWrapper<T>) {
        wrapper.last_used = Instant::now();
        self.idle.lock().await.push_back(IdleEntry {
            client: wrapper.client,
            last_used: wrapper.last_used,
        });
        // `wrapper._permit` was already consumed above; dropping the IdleEntry
        // path means the permit inside `wrapper` drops here, releasing it.
    }

    /// Disposes the wrapper without returning it to the idle queue.
    pub async fn discard(&self, wrapper: ClientWrapper<T>) {
        drop(wrapper);
        self.counters.lock().await.discarded_total += 1;
    }

    pub async fn metrics(&self) -> PoolMetrics {
        let idle = self.idle.lock().await.len();
        let counters = self.counters.lock().await;
        let in_flight = self.config.read().await.max_connections_per_service - self.semaphore.available_permits();
        PoolMetrics {
            idle,
            in_flight,
            created_total: counters.created_total,
            discarded_total: counters.discarded_total,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeTransport {
        id: usize,
    }

    static NEXT_ID: AtomicUsize = AtomicUsize::new(0);

    #[async_trait]
    impl RpcTransport for FakeTransport {
        async fn connect(_uri: &str, _enable_tls: bool, _timeout: Duration) -> Result<Self, std::io::Error> {
            Ok(FakeTransport {
                id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
            })
        }

        fn status_of(&self, _error: &(dyn std::error::Error + Send + Sync + 'static)) -> fleet_fabric_core::TransportStatus {
            fleet_fabric_core::TransportStatus::Other
        }
    }

    fn instance() -> ServiceInstance {
        ServiceInstance {
            service_id: "srv-1".to_string(),
            service_name: "GameServer".to_string(),
            address: "10.0.0.1".to_string(),
            port: 7000,
            scheme: fleet_fabric_core::Scheme::Http,
            version: "1.0".to_string(),
            metadata: HashMap::new(),
            status: fleet_fabric_core::InstanceStatus::Up,
            last_heartbeat: chrono::Utc::now(),
        }
    }

    fn config() -> RpcClientConfig {
        RpcClientConfig {
            service_name: "GameServer".to_string(),
            max_retries: 3,
            max_connections_per_service: 2,
            connection_timeout: Duration::from_secs(1),
            operation_timeout: Duration::from_secs(1),
            idle_timeout: Duration::from_secs(60),
            enable_tls: false,
            retry_backoff: fleet_fabric_core::BackoffConfig::default(),
        }
    }

    #[tokio::test]
    async fn rent_then_return_reuses_the_wrapper() {
        let pool: ClientPool<FakeTransport> = ClientPool::new(instance(), config());
        let wrapper = pool.rent(&Cancellation::new()).await.unwrap();
        let id = wrapper.client.id;
        pool.return_wrapper(wrapper).await;

        let reused = pool.rent(&Cancellation::new()).await.unwrap();
        assert_eq!(reused.client.id, id);
    }

    #[tokio::test]
    async fn discard_does_not_return_to_idle_queue() {
        let pool: ClientPool<FakeTransport> = ClientPool::new(instance(), config());
        let wrapper = pool.rent(&Cancellation::new()).await.unwrap();
        let id = wrapper.client.id;
        pool.discard(wrapper).await;

        let fresh = pool.rent(&Cancellation::new()).await.unwrap();
        assert_ne!(fresh.client.id, id);
    }

    #[tokio::test]
    async fn permit_is_conserved_across_rent_and_discard() {
        let pool = Arc::new(ClientPool::<FakeTransport>::new(instance(), config()));
        let a = pool.rent(&Cancellation::new()).await.unwrap();
        let _b = pool.rent(&Cancellation::new()).await.unwrap();

        // Pool capacity is 2; a third rent should block until one is released.
        let pool_clone = Arc::clone(&pool);
        let third = tokio::spawn(async move { pool_clone.rent(&Cancellation::new()).await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!third.is_finished());

        pool.discard(a).await;
        let result = third.await.unwrap();
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn cancellation_aborts_rent_wait() {
        let pool: ClientPool<FakeTransport> = ClientPool::new(instance(), config());
        let _a = pool.rent(&Cancellation::new()).await.unwrap();
        let _b = pool.rent(&Cancellation::new()).await.unwrap();

        let cancel = Cancellation::new();
        cancel.cancel();
        let result = pool.rent(&cancel).await;
        assert!(matches!(result, Err(FabricError::Cancelled)));
    }

    #[tokio::test]
    async fn metrics_report_idle_and_in_flight() {
        let pool: ClientPool<FakeTransport> = ClientPool::new(instance(), config());
        let wrapper = pool.rent(&Cancellation::new()).await.unwrap();
        let metrics = pool.metrics().await;
        assert_eq!(metrics.in_flight, 1);
        assert_eq!(metrics.idle, 0);

        pool.return_wrapper(wrapper).await;
        let metrics = pool.metrics().await;
        assert_eq!(metrics.in_flight, 0);
        assert_eq!(metrics.idle, 1);
    }
}
