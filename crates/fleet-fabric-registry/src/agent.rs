//! Registration Agent (spec §4.2): keeps one process's presence in the registry
//! accurate for as long as it is serving. Grounded on the shutdown-signal /
//! background-task shape of `ServiceLifecycleManager`, scoped down to the single
//! register → heartbeat-loop → unregister lifecycle spec.md calls for.

use std::sync::Arc;
use std::time::Duration;

use fleet_fabric_core::{FabricError, InstanceStatus, Scheme, ServiceInstance};
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;

use crate::backend::RegistryBackend;
use crate::facade::RegistryFacade;

/// Inferred or supplied bind information a `RegistrationAgent` registers under.
#[derive(Debug, Clone)]
pub struct EndpointHint {
    pub address: Option<String>,
    pub port: Option<u16>,
    pub scheme: Option<String>,
}

/// Fills any gap in `hint` from the first bound listener address, never
/// overriding a value the hint already supplies (spec §4.2 "Endpoint inference").
pub fn infer_endpoint(hint: EndpointHint, bound_addr: std::net::SocketAddr) -> (String, u16, Scheme) {
    let address = hint.address.unwrap_or_else(|| bound_addr.ip().to_string());
    let port = hint.port.unwrap_or_else(|| bound_addr.port());
    let scheme = match hint.scheme.as_deref() {
        Some("https") => Scheme::Https,
        Some("http") => Scheme::Http,
        Some(other) => {
            tracing::warn!(scheme = other, "unrecognized scheme hint, defaulting to http");
            Scheme::Http
        }
        None => Scheme::Http,
    };
    (address, port, scheme)
}

pub struct RegistrationAgent<B: RegistryBackend> {
    facade: Arc<RegistryFacade<B>>,
    instance: ServiceInstance,
    heartbeat_interval: Duration,
    registration_ttl: Duration,
    shutdown: Mutex<Option<oneshot::Sender<()>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl<B: RegistryBackend + Send + Sync + 'static> RegistrationAgent<B> {
    pub fn new(
        facade: Arc<RegistryFacade<B>>,
        instance: ServiceInstance,
        heartbeat_interval: Duration,
        registration_ttl: Duration,
    ) -> Self {
        if heartbeat_interval >= registration_ttl / 2 {
            tracing::warn!(
                ?heartbeat_interval,
                ?registration_ttl,
                "HeartbeatInterval should be less than RegistrationTtl / 2"
            );
        }
        Self {
            facade,
            instance,
            heartbeat_interval,
            registration_ttl,
            shutdown: Mutex::new(None),
            handle: Mutex::new(None),
        }
    }

    pub fn service_id(&self) -> &str {
        &self.instance.service_id
    }

    /// Registers the instance and spawns the heartbeat loop.
    pub async fn start(&self) -> Result<(), FabricError> {
        let mut instance = self.instance.clone();
        instance.status = InstanceStatus::Up;
        self.facade.register(&instance, self.registration_ttl).await?;

        let (tx, mut rx) = oneshot::channel();
        *self.shutdown.lock().await = Some(tx);

        let facade = Arc::clone(&self.facade);
        let service_id = self.instance.service_id.clone();
        let heartbeat_interval = self.heartbeat_interval;
        let registration_ttl = self.registration_ttl;

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(heartbeat_interval);
            ticker.tick().await; // first tick fires immediately; discard it
            loop {
                tokio::select! {
                    _ = &mut rx => {
                        tracing::debug!(service_id, "registration agent heartbeat loop cancelled");
                        break;
                    }
                    _ = ticker.tick() => {
                        if let Err(e) = facade.refresh(&service_id, registration_ttl).await {
                            tracing::warn!(service_id, error = %e, "heartbeat refresh failed, will retry next tick");
                        }
                    }
                }
            }
        });

        *self.handle.lock().await = Some(task);
        Ok(())
    }

    /// Unregisters the instance and stops the heartbeat loop. Idempotent.
    pub async fn stop(&self) -> Result<(), FabricError> {
        if let Some(tx) = self.shutdown.lock().await.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.lock().await.take() {
            let _ = handle.await;
        }
        self.facade.unregister(&self.instance.service_id).await
    }
}
