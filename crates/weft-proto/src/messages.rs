//! RPC message types and envelope.
//!
//! Every overlay RPC is one acknowledged request/response pair carried in a
//! [`Message`] envelope. Payloads are tagged on the wire with their
//! [`MessageType`]; unknown tags decode to an error at the transport seam.

use bytes::{Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use weft_core::Id;

use crate::handle::NodeHandle;
use crate::wire::{WireDecode, WireEncode, WireError};

/// Request/response correlation identifier.
pub type RequestId = u64;

/// Wire tags for every payload variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum MessageType {
    /// Liveness and identity probe.
    Hello = 0,
    /// Next-hop query for an identifier.
    GetNextHop = 1,
    /// Routing-table insert.
    AddNode = 2,
    /// Routing-table removal.
    RemoveNode = 3,
    /// Slot heads of one table level.
    GetLevel = 4,
    /// Join entry point at the current root.
    Join = 5,
    /// Acknowledged-multicast fan-out step.
    Multicast = 6,
    /// Reverse links recorded at one level.
    GetBackpointers = 7,
    /// Record a reverse link.
    AddBackpointer = 8,
    /// Drop a reverse link.
    RemoveBackpointer = 9,
    /// Graceful-departure notification.
    NotifyLeave = 10,
    /// Surrogate handoff of advertisement entries.
    Transfer = 11,
    /// Advertise (or with zero TTL revoke) a key at its root.
    Advertise = 12,
    /// Read the advertisement set for a key.
    Lookup = 13,
    /// Fetch a blob from a publisher.
    Fetch = 14,

    /// Response to `Hello`.
    HelloResponse = 20,
    /// Response to `GetNextHop`.
    GetNextHopResponse = 21,
    /// Response to `AddNode`.
    AddNodeResponse = 22,
    /// Response to `RemoveNode`.
    RemoveNodeResponse = 23,
    /// Response to `GetLevel`.
    GetLevelResponse = 24,
    /// Response to `Join`.
    JoinResponse = 25,
    /// Response to `Multicast`.
    MulticastResponse = 26,
    /// Response to `GetBackpointers`.
    GetBackpointersResponse = 27,
    /// Generic acknowledgement.
    Ack = 28,
    /// Response to `Lookup`.
    LookupResponse = 29,
    /// Response to `Fetch`.
    FetchResponse = 30,

    /// Error response.
    Error = 255,
}

impl MessageType {
    /// Returns the wire tag.
    pub fn tag(&self) -> u32 {
        *self as u32
    }

    /// Looks a tag up.
    pub fn from_tag(tag: u32) -> Result<Self, WireError> {
        Ok(match tag {
            0 => MessageType::Hello,
            1 => MessageType::GetNextHop,
            2 => MessageType::AddNode,
            3 => MessageType::RemoveNode,
            4 => MessageType::GetLevel,
            5 => MessageType::Join,
            6 => MessageType::Multicast,
            7 => MessageType::GetBackpointers,
            8 => MessageType::AddBackpointer,
            9 => MessageType::RemoveBackpointer,
            10 => MessageType::NotifyLeave,
            11 => MessageType::Transfer,
            12 => MessageType::Advertise,
            13 => MessageType::Lookup,
            14 => MessageType::Fetch,
            20 => MessageType::HelloResponse,
            21 => MessageType::GetNextHopResponse,
            22 => MessageType::AddNodeResponse,
            23 => MessageType::RemoveNodeResponse,
            24 => MessageType::GetLevelResponse,
            25 => MessageType::JoinResponse,
            26 => MessageType::MulticastResponse,
            27 => MessageType::GetBackpointersResponse,
            28 => MessageType::Ack,
            29 => MessageType::LookupResponse,
            30 => MessageType::FetchResponse,
            255 => MessageType::Error,
            _ => return Err(WireError::InvalidTag(tag)),
        })
    }
}

/// Error codes carried in error responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u32)]
pub enum ErrorCode {
    /// Unclassified failure.
    Unknown = 0,
    /// The request was malformed or arrived out of protocol.
    InvalidRequest = 1,
    /// The named entity does not exist here.
    NotFound = 2,
}

impl ErrorCode {
    fn from_tag(tag: u32) -> Self {
        match tag {
            1 => ErrorCode::InvalidRequest,
            2 => ErrorCode::NotFound,
            _ => ErrorCode::Unknown,
        }
    }
}

/// One advertisement entry moved during surrogate handoff.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferEntry {
    /// Application key.
    pub key: String,
    /// Publishers currently advertising the key.
    pub publishers: Vec<NodeHandle>,
}

impl WireEncode for TransferEntry {
    fn encode(&self, buf: &mut BytesMut) {
        self.key.encode(buf);
        self.publishers.encode(buf);
    }
}

impl WireDecode for TransferEntry {
    fn decode(buf: &mut Bytes) -> Result<Self, WireError> {
        Ok(Self {
            key: String::decode(buf)?,
            publishers: Vec::<NodeHandle>::decode(buf)?,
        })
    }
}

/// Message envelope: correlation id, sender identity, payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Correlation identifier chosen by the requester.
    pub request_id: RequestId,
    /// Identifier of the sending node (diagnostic; the reply travels back
    /// on the same connection).
    pub sender: Id,
    /// The request or response body.
    pub payload: Payload,
}

impl Message {
    /// Creates an envelope.
    pub fn new(request_id: RequestId, sender: Id, payload: Payload) -> Self {
        Self {
            request_id,
            sender,
            payload,
        }
    }
}

impl WireEncode for Message {
    fn encode(&self, buf: &mut BytesMut) {
        self.request_id.encode(buf);
        self.sender.encode(buf);
        self.payload.encode(buf);
    }
}

impl WireDecode for Message {
    fn decode(buf: &mut Bytes) -> Result<Self, WireError> {
        Ok(Self {
            request_id: RequestId::decode(buf)?,
            sender: Id::decode(buf)?,
            payload: Payload::decode(buf)?,
        })
    }
}

/// Request and response bodies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Payload {
    /// Liveness and identity probe.
    Hello,
    /// Next-hop query.
    GetNextHop {
        /// Identifier being routed toward.
        target: Id,
    },
    /// Routing-table insert.
    AddNode {
        /// Node to insert.
        node: NodeHandle,
    },
    /// Routing-table removal by identifier.
    RemoveNode {
        /// Identifier to remove.
        id: Id,
    },
    /// Slot heads of one table level, local node excluded.
    GetLevel {
        /// Table level.
        level: u32,
    },
    /// Join entry point; the receiver runs the acknowledged multicast.
    Join {
        /// The joining node.
        node: NodeHandle,
    },
    /// One step of the acknowledged multicast.
    Multicast {
        /// The joining node.
        node: NodeHandle,
        /// Level the fan-out has reached.
        level: u32,
    },
    /// Reverse links recorded at one level.
    GetBackpointers {
        /// Backpointer level.
        level: u32,
    },
    /// Record that `node` lists the receiver at `level`.
    AddBackpointer {
        /// Backpointer level.
        level: u32,
        /// The node holding the reference.
        node: NodeHandle,
    },
    /// Drop a previously recorded reverse link.
    RemoveBackpointer {
        /// Backpointer level.
        level: u32,
        /// The node dropping the reference.
        node: NodeHandle,
    },
    /// Graceful departure of `leaver`; `replacement` may refill the slot.
    NotifyLeave {
        /// The departing node.
        leaver: NodeHandle,
        /// A substitute from the same level, if one exists.
        replacement: Option<NodeHandle>,
    },
    /// Surrogate handoff: advertisement entries the receiver now roots.
    Transfer {
        /// Entries being handed off.
        entries: Vec<TransferEntry>,
    },
    /// Advertise `key` at its root; `ttl_ms == 0` revokes instead.
    Advertise {
        /// Application key.
        key: String,
        /// The advertising publisher.
        publisher: NodeHandle,
        /// Entry lifetime in milliseconds; zero revokes.
        ttl_ms: u64,
    },
    /// Read the advertisement set for `key`.
    Lookup {
        /// Application key.
        key: String,
    },
    /// Fetch the blob stored under `key`.
    Fetch {
        /// Application key.
        key: String,
    },

    /// Identity of the responder.
    HelloResponse {
        /// Responder descriptor.
        node: NodeHandle,
    },
    /// Chosen next hop (the responder itself at a fixed point).
    GetNextHopResponse {
        /// Next hop toward the target.
        node: NodeHandle,
    },
    /// Outcome of a routing-table insert.
    AddNodeResponse {
        /// Whether the node was newly added.
        added: bool,
        /// Entry evicted to make room, if any.
        evicted: Option<NodeHandle>,
    },
    /// Outcome of a routing-table removal.
    RemoveNodeResponse {
        /// Whether an entry was removed.
        removed: bool,
    },
    /// Slot heads of the requested level.
    GetLevelResponse {
        /// First entry of each non-empty slot, ascending digit.
        nodes: Vec<NodeHandle>,
    },
    /// Initial neighbor set gathered by the multicast.
    JoinResponse {
        /// Every node reached by the fan-out.
        neighbors: Vec<NodeHandle>,
    },
    /// Nodes reached by one fan-out step.
    MulticastResponse {
        /// Deduplicated descendants.
        nodes: Vec<NodeHandle>,
    },
    /// Reverse links at the requested level.
    GetBackpointersResponse {
        /// Nodes listing the responder at that level.
        nodes: Vec<NodeHandle>,
    },
    /// Generic acknowledgement.
    Ack {
        /// Whether the operation took effect.
        ok: bool,
    },
    /// Advertisement set for a key.
    LookupResponse {
        /// Live publishers, possibly empty.
        publishers: Vec<NodeHandle>,
    },
    /// Blob bytes, if the responder holds the key.
    FetchResponse {
        /// The stored bytes.
        data: Option<Vec<u8>>,
    },

    /// Error response.
    Error {
        /// Machine-readable classification.
        code: ErrorCode,
        /// Human-readable detail.
        message: String,
    },
}

impl Payload {
    /// Returns the wire tag variant for this payload.
    pub fn message_type(&self) -> MessageType {
        match self {
            Payload::Hello => MessageType::Hello,
            Payload::GetNextHop { .. } => MessageType::GetNextHop,
            Payload::AddNode { .. } => MessageType::AddNode,
            Payload::RemoveNode { .. } => MessageType::RemoveNode,
            Payload::GetLevel { .. } => MessageType::GetLevel,
            Payload::Join { .. } => MessageType::Join,
            Payload::Multicast { .. } => MessageType::Multicast,
            Payload::GetBackpointers { .. } => MessageType::GetBackpointers,
            Payload::AddBackpointer { .. } => MessageType::AddBackpointer,
            Payload::RemoveBackpointer { .. } => MessageType::RemoveBackpointer,
            Payload::NotifyLeave { .. } => MessageType::NotifyLeave,
            Payload::Transfer { .. } => MessageType::Transfer,
            Payload::Advertise { .. } => MessageType::Advertise,
            Payload::Lookup { .. } => MessageType::Lookup,
            Payload::Fetch { .. } => MessageType::Fetch,
            Payload::HelloResponse { .. } => MessageType::HelloResponse,
            Payload::GetNextHopResponse { .. } => MessageType::GetNextHopResponse,
            Payload::AddNodeResponse { .. } => MessageType::AddNodeResponse,
            Payload::RemoveNodeResponse { .. } => MessageType::RemoveNodeResponse,
            Payload::GetLevelResponse { .. } => MessageType::GetLevelResponse,
            Payload::JoinResponse { .. } => MessageType::JoinResponse,
            Payload::MulticastResponse { .. } => MessageType::MulticastResponse,
            Payload::GetBackpointersResponse { .. } => MessageType::GetBackpointersResponse,
            Payload::Ack { .. } => MessageType::Ack,
            Payload::LookupResponse { .. } => MessageType::LookupResponse,
            Payload::FetchResponse { .. } => MessageType::FetchResponse,
            Payload::Error { .. } => MessageType::Error,
        }
    }

    /// True for request variants, false for responses.
    pub fn is_request(&self) -> bool {
        self.message_type().tag() < MessageType::HelloResponse.tag()
    }
}

impl WireEncode for Payload {
    fn encode(&self, buf: &mut BytesMut) {
        self.message_type().tag().encode(buf);
        match self {
            Payload::Hello => {}
            Payload::GetNextHop { target } => target.encode(buf),
            Payload::AddNode { node } => node.encode(buf),
            Payload::RemoveNode { id } => id.encode(buf),
            Payload::GetLevel { level } => level.encode(buf),
            Payload::Join { node } => node.encode(buf),
            Payload::Multicast { node, level } => {
                node.encode(buf);
                level.encode(buf);
            }
            Payload::GetBackpointers { level } => level.encode(buf),
            Payload::AddBackpointer { level, node } | Payload::RemoveBackpointer { level, node } => {
                level.encode(buf);
                node.encode(buf);
            }
            Payload::NotifyLeave {
                leaver,
                replacement,
            } => {
                leaver.encode(buf);
                replacement.encode(buf);
            }
            Payload::Transfer { entries } => entries.encode(buf),
            Payload::Advertise {
                key,
                publisher,
                ttl_ms,
            } => {
                key.encode(buf);
                publisher.encode(buf);
                ttl_ms.encode(buf);
            }
            Payload::Lookup { key } | Payload::Fetch { key } => key.encode(buf),
            Payload::HelloResponse { node } | Payload::GetNextHopResponse { node } => {
                node.encode(buf)
            }
            Payload::AddNodeResponse { added, evicted } => {
                added.encode(buf);
                evicted.encode(buf);
            }
            Payload::RemoveNodeResponse { removed } => removed.encode(buf),
            Payload::GetLevelResponse { nodes }
            | Payload::MulticastResponse { nodes }
            | Payload::GetBackpointersResponse { nodes } => nodes.encode(buf),
            Payload::JoinResponse { neighbors } => neighbors.encode(buf),
            Payload::Ack { ok } => ok.encode(buf),
            Payload::LookupResponse { publishers } => publishers.encode(buf),
            Payload::FetchResponse { data } => data.encode(buf),
            Payload::Error { code, message } => {
                (*code as u32).encode(buf);
                message.encode(buf);
            }
        }
    }
}

impl WireDecode for Payload {
    fn decode(buf: &mut Bytes) -> Result<Self, WireError> {
        let tag = u32::decode(buf)?;
        Ok(match MessageType::from_tag(tag)? {
            MessageType::Hello => Payload::Hello,
            MessageType::GetNextHop => Payload::GetNextHop {
                target: Id::decode(buf)?,
            },
            MessageType::AddNode => Payload::AddNode {
                node: NodeHandle::decode(buf)?,
            },
            MessageType::RemoveNode => Payload::RemoveNode {
                id: Id::decode(buf)?,
            },
            MessageType::GetLevel => Payload::GetLevel {
                level: u32::decode(buf)?,
            },
            MessageType::Join => Payload::Join {
                node: NodeHandle::decode(buf)?,
            },
            MessageType::Multicast => Payload::Multicast {
                node: NodeHandle::decode(buf)?,
                level: u32::decode(buf)?,
            },
            MessageType::GetBackpointers => Payload::GetBackpointers {
                level: u32::decode(buf)?,
            },
            MessageType::AddBackpointer => Payload::AddBackpointer {
                level: u32::decode(buf)?,
                node: NodeHandle::decode(buf)?,
            },
            MessageType::RemoveBackpointer => Payload::RemoveBackpointer {
                level: u32::decode(buf)?,
                node: NodeHandle::decode(buf)?,
            },
            MessageType::NotifyLeave => Payload::NotifyLeave {
                leaver: NodeHandle::decode(buf)?,
                replacement: Option::<NodeHandle>::decode(buf)?,
            },
            MessageType::Transfer => Payload::Transfer {
                entries: Vec::<TransferEntry>::decode(buf)?,
            },
            MessageType::Advertise => Payload::Advertise {
                key: String::decode(buf)?,
                publisher: NodeHandle::decode(buf)?,
                ttl_ms: u64::decode(buf)?,
            },
            MessageType::Lookup => Payload::Lookup {
                key: String::decode(buf)?,
            },
            MessageType::Fetch => Payload::Fetch {
                key: String::decode(buf)?,
            },
            MessageType::HelloResponse => Payload::HelloResponse {
                node: NodeHandle::decode(buf)?,
            },
            MessageType::GetNextHopResponse => Payload::GetNextHopResponse {
                node: NodeHandle::decode(buf)?,
            },
            MessageType::AddNodeResponse => Payload::AddNodeResponse {
                added: bool::decode(buf)?,
                evicted: Option::<NodeHandle>::decode(buf)?,
            },
            MessageType::RemoveNodeResponse => Payload::RemoveNodeResponse {
                removed: bool::decode(buf)?,
            },
            MessageType::GetLevelResponse => Payload::GetLevelResponse {
                nodes: Vec::<NodeHandle>::decode(buf)?,
            },
            MessageType::JoinResponse => Payload::JoinResponse {
                neighbors: Vec::<NodeHandle>::decode(buf)?,
            },
            MessageType::MulticastResponse => Payload::MulticastResponse {
                nodes: Vec::<NodeHandle>::decode(buf)?,
            },
            MessageType::GetBackpointersResponse => Payload::GetBackpointersResponse {
                nodes: Vec::<NodeHandle>::decode(buf)?,
            },
            MessageType::Ack => Payload::Ack {
                ok: bool::decode(buf)?,
            },
            MessageType::LookupResponse => Payload::LookupResponse {
                publishers: Vec::<NodeHandle>::decode(buf)?,
            },
            MessageType::FetchResponse => Payload::FetchResponse {
                data: Option::<Vec<u8>>::decode(buf)?,
            },
            MessageType::Error => Payload::Error {
                code: ErrorCode::from_tag(u32::decode(buf)?),
                message: String::decode(buf)?,
            },
        })
    }
}
