//! Port for per-identity user preferences.

use async_trait::async_trait;

use crate::shared_types::Identity;

/// Per-SIM preferences. Implementations return the documented default when
/// no value has been stored for the identity.
#[async_trait]
pub trait IdentitySettings: Send + Sync {
    /// Whether incoming MMS are fetched automatically. Default: true.
    async fn auto_download(&self, imsi: &Identity) -> bool;

    /// Whether read reports are sent for received messages. Default: false.
    async fn send_read_reports(&self, imsi: &Identity) -> bool;

    /// Transport send flags. Default: 0.
    async fn send_flags(&self, imsi: &Identity) -> u32;
}
