//! Data model, error taxonomy and backoff policy shared by the fleet-fabric crates.
//!
//! This crate has no I/O of its own — it is the vocabulary the registry, balancer
//! and RPC crates build on.

pub mod backoff;
pub mod cancellation;
pub mod error;
pub mod model;

pub use backoff::BackoffConfig;
pub use cancellation::Cancellation;
pub use error::{FabricError, TransportStatus};
pub use model::{InstanceStatus, Scheme, ServiceInstance};
