//! Overlay error taxonomy.

use std::net::SocketAddr;

use thiserror::Error;
use weft_core::Id;
use weft_net::NetError;
use weft_proto::MessageType;

/// Errors surfaced by overlay operations.
#[derive(Debug, Error)]
pub enum OverlayError {
    /// A peer did not answer; it has been dropped from the local table.
    #[error("peer {addr} unreachable")]
    Unreachable {
        /// The dead endpoint.
        addr: SocketAddr,
    },

    /// Routing did not converge within the hop bound.
    #[error("no root found for {target}")]
    RootNotFound {
        /// The identifier being resolved.
        target: Id,
    },

    /// No live publisher could be reached for the key.
    #[error("key {0:?} unavailable")]
    KeyUnavailable(String),

    /// The node could not insert itself into the mesh.
    #[error("join failed: {0}")]
    JoinFailed(String),

    /// A peer answered with a payload the protocol does not allow here.
    #[error("unexpected {0:?} response")]
    Protocol(MessageType),

    /// Transport-level failure.
    #[error(transparent)]
    Net(#[from] NetError),
}
