//! Registry facade over Redis- and etcd-flavored backends, plus the
//! Registration Agent that keeps a process's own presence current.

pub mod agent;
pub mod backend;
pub mod config;
pub mod facade;

pub use agent::{infer_endpoint, EndpointHint, RegistrationAgent};
pub use backend::etcd::EtcdRegistryBackend;
pub use backend::redis::RedisRegistryBackend;
pub use backend::RegistryBackend;
pub use config::{RegistrationConfig, RegistryConfig, RegistryProvider};
pub use facade::RegistryFacade;
