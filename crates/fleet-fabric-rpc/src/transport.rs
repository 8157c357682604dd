//! The pluggable seam beneath [`ClientPool`](crate::pool::ClientPool) (spec §6
//! "Transport" — the wire codec is explicitly out of scope). Grounded on
//! `McpTransport` being the trait `McpConnection` is generic over.

use std::time::Duration;

use async_trait::async_trait;
use fleet_fabric_core::TransportStatus;

/// One underlying transport channel plus whatever typed client sits on top of
/// it. The manager is generic over this so the HTTP/2 codec lives entirely
/// outside the fabric.
#[async_trait]
pub trait RpcTransport: Send + Sync + Sized + 'static {
    async fn connect(uri: &str, enable_tls: bool, timeout: Duration) -> Result<Self, std::io::Error>;

    /// Classifies a transport-level failure into the whitelisted retry set
    /// (spec §4.4/§7). Implementations map their own error type's variants;
    /// anything not recognized should resolve to `TransportStatus::Other`.
    fn status_of(&self, error: &(dyn std::error::Error + Send + Sync + 'static)) -> TransportStatus;
}
