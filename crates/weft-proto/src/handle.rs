//! Node descriptors.

use std::fmt;
use std::net::SocketAddr;

use bytes::{Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use weft_core::Id;

use crate::wire::{WireDecode, WireEncode, WireError};

/// An immutable reference to a node: identifier plus network endpoint.
///
/// Handles are the unit stored in routing tables, backpointer sets and
/// advertisement entries; every cross-node reference is reconstructable
/// from one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeHandle {
    /// Overlay identifier.
    pub id: Id,
    /// RPC endpoint.
    pub addr: SocketAddr,
}

impl NodeHandle {
    /// Creates a handle.
    pub fn new(id: Id, addr: SocketAddr) -> Self {
        Self { id, addr }
    }
}

impl fmt::Display for NodeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.id, self.addr)
    }
}

impl WireEncode for NodeHandle {
    fn encode(&self, buf: &mut BytesMut) {
        self.id.encode(buf);
        self.addr.encode(buf);
    }
}

impl WireDecode for NodeHandle {
    fn decode(buf: &mut Bytes) -> Result<Self, WireError> {
        Ok(Self {
            id: Id::decode(buf)?,
            addr: SocketAddr::decode(buf)?,
        })
    }
}
