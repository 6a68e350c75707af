//! Gateway-level events emitted by the proxy engine.
//!
//! These represent connection lifecycle changes the rest of the
//! gateway cares about. They are broadcast via a
//! [`tokio::sync::broadcast`] channel owned by the manager; subscribe
//! through [`crate::manager::GatewayManager::subscribe`].

use serde::Serialize;

use bs_core::types::ConnectionId;

/// A lifecycle event for one proxy lane.
#[derive(Debug, Clone, Serialize)]
pub enum GatewayEvent {
    /// A bot client attached to its configured path.
    ClientConnected { connection_id: ConnectionId },

    /// The bot client went away; the lane is idle again.
    ClientDisconnected { connection_id: ConnectionId },

    /// A target link was established (initially or after reconnect).
    TargetConnected {
        connection_id: ConnectionId,
        target_index: usize,
    },

    /// A target link dropped.
    TargetDisconnected {
        connection_id: ConnectionId,
        target_index: usize,
    },

    /// A target's API call came back with a failure status.
    ApiCallFailed {
        connection_id: ConnectionId,
        target_index: usize,
        echo: String,
    },

    /// Target endpoints were swapped from a config reload.
    TargetsReloaded { connection_id: ConnectionId },
}
