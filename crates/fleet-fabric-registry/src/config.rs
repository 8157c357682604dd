//! Environment-sourced configuration for the registry and registration agent
//! (spec §6 "Configuration surface"), following the `McpConfig::from_env` /
//! `get_env_var_or_default` convention.

use std::collections::HashMap;
use std::env;
use std::time::Duration;

/// `ServiceRegistry.Provider`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryProvider {
    Redis,
    Etcd,
}

impl RegistryProvider {
    fn parse(raw: &str) -> Self {
        match raw.to_ascii_lowercase().as_str() {
            "etcd" => RegistryProvider::Etcd,
            _ => RegistryProvider::Redis,
        }
    }
}

/// `ServiceRegistry.*`.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    pub provider: RegistryProvider,
    pub key_prefix: String,
    pub redis_connection_string: String,
    pub etcd_endpoints: Vec<String>,
}

impl RegistryConfig {
    pub fn from_env() -> Self {
        Self {
            provider: RegistryProvider::parse(&env_or("SERVICE_REGISTRY_PROVIDER", "Redis")),
            key_prefix: env_or("SERVICE_REGISTRY_KEY_PREFIX", "sharpserver"),
            redis_connection_string: env_or(
                "SERVICE_REGISTRY_REDIS_CONNECTION_STRING",
                "redis://127.0.0.1:6379",
            ),
            etcd_endpoints: env_or("SERVICE_REGISTRY_ETCD_ENDPOINT", "http://127.0.0.1:2379")
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
        }
    }
}

/// `Server.*` plus `Registration.*` — what a Registration Agent needs to build
/// and maintain its own `ServiceInstance`.
#[derive(Debug, Clone)]
pub struct RegistrationConfig {
    pub service_name: String,
    pub address: Option<String>,
    pub port: Option<u16>,
    pub scheme: Option<String>,
    pub heartbeat_interval: Duration,
    pub registration_ttl: Duration,
    pub metadata: HashMap<String, String>,
}

impl RegistrationConfig {
    pub fn from_env() -> Self {
        let heartbeat_interval = Duration::from_secs(env_parse_or("REGISTRATION_HEARTBEAT_INTERVAL_SECONDS", 30));
        let registration_ttl = Duration::from_secs(env_parse_or("REGISTRATION_TTL_SECONDS", 120));

        if heartbeat_interval >= registration_ttl / 2 {
            tracing::warn!(
                heartbeat_interval_secs = heartbeat_interval.as_secs(),
                registration_ttl_secs = registration_ttl.as_secs(),
                "HeartbeatInterval should be less than RegistrationTtl / 2; a single missed refresh can expire the lease"
            );
        }

        Self {
            service_name: env_or("SERVER_SERVICE_NAME", "GameServer"),
            address: env::var("SERVER_ADDRESS").ok(),
            port: env::var("SERVER_PORT").ok().and_then(|v| v.parse().ok()),
            scheme: env::var("SERVER_SCHEME").ok(),
            heartbeat_interval,
            registration_ttl,
            metadata: HashMap::new(),
        }
    }
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}
