//! `RpcClientManager::execute` (spec §4.4): discover → select → lease →
//! invoke → record, with bounded exponential backoff retried on a whitelisted
//! set of transport errors, plus a background reconciler that drops pools for
//! services no longer in the registry.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use fleet_fabric_balancer::LoadBalancer;
use fleet_fabric_core::{Cancellation, FabricError, ServiceInstance, TransportStatus};
use fleet_fabric_registry::{RegistryBackend, RegistryFacade};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::config::RpcClientConfig;
use crate::pool::ClientPool;
use crate::transport::RpcTransport;

/// A transport-level failure from inside an `Execute` op closure, carrying
/// enough to classify it via [`RpcTransport::status_of`].
pub struct RpcCallError {
    pub source: Box<dyn std::error::Error + Send + Sync>,
}

impl RpcCallError {
    pub fn new(source: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self {
            source: Box::new(source),
        }
    }
}

pub struct RpcClientManager<B, L, T>
where
    B: RegistryBackend + 'static,
    L: LoadBalancer + 'static,
    T: RpcTransport,
{
    registry: Arc<RegistryFacade<B>>,
    balancer: Arc<L>,
    config: RpcClientConfig,
    pools: DashMap<String, Arc<ClientPool<T>>>,
    reconciler: tokio::sync::Mutex<Option<(oneshot::Sender<()>, JoinHandle<()>)>>,
}

impl<B, L, T> RpcClientManager<B, L, T>
where
    B: RegistryBackend + 'static,
    L: LoadBalancer + 'static,
    T: RpcTransport,
{
    pub fn new(registry: Arc<RegistryFacade<B>>, balancer: Arc<L>, config: RpcClientConfig) -> Self {
        Self {
            registry,
            balancer,
            config,
            pools: DashMap::new(),
            reconciler: tokio::sync::Mutex::new(None),
        }
    }

    async fn pool_for(&self, instance: &ServiceInstance) -> Arc<ClientPool<T>> {
        let existing = self.pools.get(&instance.service_id).map(|p| Arc::clone(&p));
        if let Some(pool) = existing {
            pool.with_latest_config(instance.clone(), self.config.clone()).await;
            return pool;
        }
        let pool = Arc::new(ClientPool::new(instance.clone(), self.config.clone()));
        self.pools.insert(instance.service_id.clone(), Arc::clone(&pool));
        pool
    }

    /// `Execute<R>(op, affinity_key?, max_retries?, cancel)` (spec §4.4). `op`
    /// receives the rented client and the cancellation handle so an in-flight
    /// transport call can inherit it.
    pub async fn execute<R, F, Fut>(
        &self,
        op: F,
        affinity_key: Option<&str>,
        max_retries: Option<u32>,
        cancel: &Cancellation,
    ) -> Result<R, FabricError>
    where
        F: Fn(&T, &Cancellation) -> Fut,
        Fut: Future<Output = Result<R, RpcCallError>>,
    {
        let max_retries = max_retries.unwrap_or(self.config.max_retries);
        let mut last_err: Option<FabricError> = None;

        for attempt in 0..=max_retries {
            if cancel.is_cancelled() {
                return Err(FabricError::Cancelled);
            }

            let instances = match self.registry.discover(&self.config.service_name).await {
                Ok(instances) => instances,
                Err(e) => {
                    if e.is_retryable() && attempt < max_retries {
                        tracing::warn!(attempt, error = %e, "discover failed, retrying");
                        tokio::time::sleep(self.config.retry_backoff.delay_for(attempt)).await;
                        last_err = Some(e);
                        continue;
                    }
                    return Err(e);
                }
            };

            let picked = match self.balancer.select(&self.config.service_name, &instances, affinity_key).await {
                Some(instance) => instance,
                None => {
                    return Err(FabricError::NoAvailableInstance {
                        service_name: self.config.service_name.clone(),
                    })
                }
            };

            let pool = self.pool_for(&picked).await;

            let wrapper = match pool.rent(cancel).await {
                Ok(wrapper) => wrapper,
                Err(FabricError::Cancelled) => return Err(FabricError::Cancelled),
                Err(e) => {
                    self.balancer.record_failure(&picked.service_id).await;
                    if e.is_retryable() && attempt < max_retries {
                        tracing::warn!(attempt, service_id = %picked.service_id, error = %e, "rent failed, retrying");
                        tokio::time::sleep(self.config.retry_backoff.delay_for(attempt)).await;
                        last_err = Some(e);
                        continue;
                    }
                    return Err(e);
                }
            };

            let outcome = tokio::time::timeout(self.config.operation_timeout, op(&wrapper.client, cancel)).await;

            match outcome {
                Ok(Ok(value)) => {
                    self.balancer.record_success(&picked.service_id).await;
                    pool.return_wrapper(wrapper).await;
                    return Ok(value);
                }
                Ok(Err(call_err)) => {
                    let status = wrapper.client.status_of(&*call_err.source);
                    let message = call_err.source.to_string();
                    pool.discard(wrapper).await;

                    let fabric_err = if status.is_retryable() {
                        self.balancer.record_failure(&picked.service_id).await;
                        FabricError::TransportRetryable {
                            service_id: picked.service_id.clone(),
                            status,
                            message,
                        }
                    } else {
                        FabricError::TransportTerminal {
                            service_id: picked.service_id.clone(),
                            status,
                            message,
                        }
                    };

                    if fabric_err.is_retryable() && attempt < max_retries {
                        tokio::time::sleep(self.config.retry_backoff.delay_for(attempt)).await;
                        last_err = Some(fabric_err);
                        continue;
                    }
                    return Err(fabric_err);
                }
                Err(_elapsed) => {
                    pool.discard(wrapper).await;
                    self.balancer.record_failure(&picked.service_id).await;
                    let fabric_err = FabricError::TransportRetryable {
                        service_id: picked.service_id.clone(),
                        status: TransportStatus::DeadlineExceeded,
                        message: "operation timed out".to_string(),
                    };
                    if attempt < max_retries {
                        tokio::time::sleep(self.config.retry_backoff.delay_for(attempt)).await;
                        last_err = Some(fabric_err);
                        continue;
                    }
                    return Err(fabric_err);
                }
            }
        }

        Err(last_err.unwrap_or(FabricError::NoAvailableInstance {
            service_name: self.config.service_name.clone(),
        }))
    }

    /// Starts the background reconciler: every `interval`, drops pools whose
    /// instance is no longer present in `Registry.Discover`.
    pub async fn start_reconciler(self: &Arc<Self>, interval: Duration) {
        let (tx, mut rx) = oneshot::channel();
        let manager = Arc::clone(self);

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = &mut rx => break,
                    _ = ticker.tick() => {
                        manager.reconcile_once().await;
                    }
                }
            }
        });

        *self.reconciler.lock().await = Some((tx, handle));
    }

    pub async fn stop_reconciler(&self) {
        if let Some((tx, handle)) = self.reconciler.lock().await.take() {
            let _ = tx.send(());
            let _ = handle.await;
        }
    }

    async fn reconcile_once(&self) {
        let live = match self.registry.discover(&self.config.service_name).await {
            Ok(instances) => instances,
            Err(e) => {
                tracing::warn!(error = %e, "reconciler discover failed, skipping this pass");
                return;
            }
        };
        let live_ids: std::collections::HashSet<&str> = live.iter().map(|i| i.service_id.as_str()).collect();

        let stale: Vec<String> = self
            .pools
            .iter()
            .filter(|entry| !live_ids.contains(entry.key().as_str()))
            .map(|entry| entry.key().clone())
            .collect();

        for service_id in stale {
            self.pools.remove(&service_id);
            tracing::info!(service_id, "reconciler dropped pool for instance no longer in registry");
        }
    }
}
