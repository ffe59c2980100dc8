//! Outbound RPC with per-call deadline.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::trace;
use weft_core::Id;
use weft_proto::{Message, Payload};

use crate::frame::{read_frame, write_frame};
use crate::NetError;

/// RPC client: one connection per call, one deadline over connect, send and
/// receive together.
///
/// Callers treat any [`NetError`] as "peer unreachable" and react per the
/// overlay's recovery rules; the client itself never retries.
pub struct RpcClient {
    local_id: Id,
    deadline: Duration,
    next_request: AtomicU64,
}

impl RpcClient {
    /// Creates a client stamping outbound envelopes with `local_id`.
    pub fn new(local_id: Id, deadline: Duration) -> Self {
        Self {
            local_id,
            deadline,
            next_request: AtomicU64::new(1),
        }
    }

    /// Returns the configured per-call deadline.
    pub fn deadline(&self) -> Duration {
        self.deadline
    }

    /// Sends `payload` to `addr` and awaits the response payload.
    ///
    /// A remote `Error` payload surfaces as [`NetError::Remote`]; a missed
    /// deadline as [`NetError::Timeout`].
    pub async fn call(&self, addr: SocketAddr, payload: Payload) -> Result<Payload, NetError> {
        self.call_with_deadline(addr, payload, self.deadline).await
    }

    /// Like [`RpcClient::call`] with an explicit deadline, for calls whose
    /// handler fans out to further RPCs (join, multicast).
    pub async fn call_with_deadline(
        &self,
        addr: SocketAddr,
        payload: Payload,
        deadline: Duration,
    ) -> Result<Payload, NetError> {
        let request_id = self.next_request.fetch_add(1, Ordering::Relaxed);
        trace!(%addr, request_id, kind = ?payload.message_type(), "rpc call");

        let exchange = async {
            let mut stream = TcpStream::connect(addr).await?;
            let request = Message::new(request_id, self.local_id, payload);
            write_frame(&mut stream, &request).await?;
            read_frame(&mut stream).await
        };

        let response = timeout(deadline, exchange)
            .await
            .map_err(|_| NetError::Timeout { addr })??;

        if response.request_id != request_id {
            return Err(NetError::Correlation {
                sent: request_id,
                got: response.request_id,
            });
        }
        match response.payload {
            Payload::Error { code, message } => Err(NetError::Remote { code, message }),
            payload => Ok(payload),
        }
    }
}
