//! Overlay configuration.

use std::time::Duration;

use crate::{DEFAULT_ADVERTISE_TTL_SECS, DEFAULT_REPUBLISH_SECS, DEFAULT_RPC_TIMEOUT_SECS};

/// Tunable timing parameters of a node.
///
/// `advertise_ttl` must comfortably exceed `republish_period` so an entry
/// at the root survives until the publisher's next refresh.
#[derive(Debug, Clone)]
pub struct OverlayConfig {
    /// Interval between republish ticks.
    pub republish_period: Duration,
    /// Lifetime granted to an advertisement entry at the root.
    pub advertise_ttl: Duration,
    /// Deadline applied to every outbound RPC.
    pub rpc_timeout: Duration,
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            republish_period: Duration::from_secs(DEFAULT_REPUBLISH_SECS),
            advertise_ttl: Duration::from_secs(DEFAULT_ADVERTISE_TTL_SECS),
            rpc_timeout: Duration::from_secs(DEFAULT_RPC_TIMEOUT_SECS),
        }
    }
}

impl OverlayConfig {
    /// Compressed timing for in-process test networks: everything that is
    /// seconds in production becomes a few hundred milliseconds.
    pub fn fast() -> Self {
        Self {
            republish_period: Duration::from_millis(250),
            advertise_ttl: Duration::from_millis(700),
            rpc_timeout: Duration::from_secs(1),
        }
    }
}
