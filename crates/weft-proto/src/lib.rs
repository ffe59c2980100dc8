//! Weft protocol - wire encoding and RPC message types.
//!
//! The overlay contract is structural: any acknowledged request/response
//! channel will do. This crate pins the concrete shape used on the wire:
//! a deterministic little-endian encoding ([`wire`]) and the tagged
//! message envelope ([`messages`]) every RPC travels in.

#![deny(unsafe_code)]

pub mod handle;
pub mod messages;
pub mod wire;

pub use handle::NodeHandle;
pub use messages::{ErrorCode, Message, MessageType, Payload, RequestId, TransferEntry};
pub use wire::{WireDecode, WireEncode, WireError};
