//! Weft transport - length-prefixed RPC frames over TCP.
//!
//! The overlay needs nothing more from its transport than reliable,
//! acknowledged request/response exchange with a deadline. This crate
//! provides exactly that: a [`client::RpcClient`] that opens a connection
//! per call and enforces `rpc_timeout`, and a [`server::RpcServer`] accept
//! loop that feeds decoded requests to an [`server::RpcHandler`].

#![deny(unsafe_code)]

pub mod client;
pub mod frame;
pub mod server;

use std::net::SocketAddr;

use thiserror::Error;
use weft_proto::{ErrorCode, WireError};

/// Transport-layer errors.
#[derive(Debug, Error)]
pub enum NetError {
    /// Socket-level failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The peer did not answer within the deadline.
    #[error("rpc to {addr} timed out")]
    Timeout {
        /// The unresponsive endpoint.
        addr: SocketAddr,
    },

    /// An inbound or outbound frame exceeded the size ceiling.
    #[error("frame of {0} bytes exceeds limit")]
    FrameTooLarge(usize),

    /// The peer's bytes did not decode.
    #[error("wire error: {0}")]
    Wire(#[from] WireError),

    /// The response correlation id did not match the request.
    #[error("response correlation mismatch (sent {sent}, got {got})")]
    Correlation {
        /// Id sent with the request.
        sent: u64,
        /// Id that came back.
        got: u64,
    },

    /// The peer answered with an error payload.
    #[error("remote error {code:?}: {message}")]
    Remote {
        /// Remote classification.
        code: ErrorCode,
        /// Remote detail.
        message: String,
    },
}
