//! `RpcClient.*` configuration surface (spec §6), following the
//! `McpConfig::from_env` / `get_env_var_or_default` convention.

use std::env;
use std::time::Duration;

use fleet_fabric_core::BackoffConfig;

#[derive(Debug, Clone)]
pub struct RpcClientConfig {
    pub service_name: String,
    pub max_retries: u32,
    pub max_connections_per_service: usize,
    pub connection_timeout: Duration,
    pub operation_timeout: Duration,
    pub idle_timeout: Duration,
    pub enable_tls: bool,
    pub retry_backoff: BackoffConfig,
}

impl RpcClientConfig {
    pub fn from_env() -> Self {
        Self {
            service_name: env_or("RPC_CLIENT_SERVICE_NAME", "GameServer"),
            max_retries: env_parse_or("RPC_CLIENT_MAX_RETRIES", 3),
            max_connections_per_service: env_parse_or("RPC_CLIENT_MAX_CONNECTIONS_PER_SERVICE", 10),
            connection_timeout: Duration::from_millis(env_parse_or("RPC_CLIENT_CONNECTION_TIMEOUT_MS", 5_000)),
            operation_timeout: Duration::from_millis(env_parse_or("RPC_CLIENT_OPERATION_TIMEOUT_MS", 10_000)),
            idle_timeout: Duration::from_secs(env_parse_or("RPC_CLIENT_IDLE_TIMEOUT_SECONDS", 300)),
            enable_tls: env_parse_or("RPC_CLIENT_ENABLE_TLS", false),
            retry_backoff: BackoffConfig {
                base_ms: env_parse_or("RPC_CLIENT_RETRY_BACKOFF_BASE_MS", 100),
                multiplier: env_parse_or("RPC_CLIENT_RETRY_BACKOFF_MULTIPLIER", 2.0),
                max_exponent: env_parse_or("RPC_CLIENT_RETRY_BACKOFF_MAX_EXPONENT", 5),
                max_ms: env_parse_or("RPC_CLIENT_RETRY_BACKOFF_MAX_MS", 10_000),
            },
        }
    }
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}
