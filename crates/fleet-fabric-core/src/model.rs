//! The fabric's unit of registration and selection: [`ServiceInstance`].

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Transport scheme a [`ServiceInstance`] is reachable on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scheme {
    Http,
    Https,
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scheme::Http => write!(f, "http"),
            Scheme::Https => write!(f, "https"),
        }
    }
}

/// Lifecycle status of a registered instance. `Discover` only ever returns `Up`
/// instances (spec invariant).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InstanceStatus {
    Up,
    Down,
    Maintenance,
}

/// A registered, individually addressable back-end process.
///
/// `service_id` uniquely keys an instance across its lifetime; `service_name` is the
/// logical fleet it belongs to (e.g. `"GameServer"`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceInstance {
    pub service_id: String,
    pub service_name: String,
    pub address: String,
    pub port: u16,
    pub scheme: Scheme,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    pub status: InstanceStatus,
    pub last_heartbeat: DateTime<Utc>,
}

fn default_version() -> String {
    "1.0".to_string()
}

impl ServiceInstance {
    /// `scheme://address:port`, used both for transport dialing and for the
    /// consistent-hash ring signature.
    pub fn uri(&self) -> String {
        format!("{}://{}:{}", self.scheme, self.address, self.port)
    }

    /// Canonical tuple used when building a ring signature or a Redis/etcd key.
    pub fn signature_tuple(&self) -> String {
        format!(
            "{}:{}:{}:{}:{}",
            self.service_id, self.address, self.port, self.scheme, self.version
        )
    }

    pub fn is_up(&self) -> bool {
        matches!(self.status, InstanceStatus::Up)
    }
}
