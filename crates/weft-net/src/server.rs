//! Inbound RPC: accept loop and handler seam.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};
use weft_core::Id;
use weft_proto::{ErrorCode, Message, Payload};

use crate::frame::{read_frame, write_frame};
use crate::NetError;

/// Implemented by the overlay node; receives every decoded request.
#[async_trait]
pub trait RpcHandler: Send + Sync + 'static {
    /// Produces the response payload for one request message.
    async fn handle(&self, msg: Message) -> Payload;
}

/// TCP accept loop feeding an [`RpcHandler`].
pub struct RpcServer {
    listener: TcpListener,
    local_id: Id,
}

impl RpcServer {
    /// Binds the listener. Port 0 picks an ephemeral port; the bound
    /// address is available from [`RpcServer::local_addr`] before spawn.
    pub async fn bind(addr: SocketAddr, local_id: Id) -> Result<Self, NetError> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self { listener, local_id })
    }

    /// Returns the bound address.
    pub fn local_addr(&self) -> Result<SocketAddr, NetError> {
        Ok(self.listener.local_addr()?)
    }

    /// Consumes the server and spawns the accept loop.
    ///
    /// The loop exits when `shutdown` observes `true`. Per-connection tasks
    /// serve requests sequentially and end on peer disconnect.
    pub fn spawn<H: RpcHandler>(
        self,
        handler: Arc<H>,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let local_id = self.local_id;
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    accepted = self.listener.accept() => {
                        match accepted {
                            Ok((stream, peer)) => {
                                trace!(%peer, "accepted connection");
                                let handler = handler.clone();
                                tokio::spawn(serve_connection(stream, peer, local_id, handler));
                            }
                            Err(e) => warn!(error = %e, "accept failed"),
                        }
                    }
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            debug!("rpc server shutting down");
                            break;
                        }
                    }
                }
            }
        })
    }
}

async fn serve_connection<H: RpcHandler>(
    mut stream: TcpStream,
    peer: SocketAddr,
    local_id: Id,
    handler: Arc<H>,
) {
    loop {
        let request = match read_frame(&mut stream).await {
            Ok(msg) => msg,
            Err(NetError::Io(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(e) => {
                debug!(%peer, error = %e, "dropping connection");
                break;
            }
        };

        let request_id = request.request_id;
        let response = if request.payload.is_request() {
            handler.handle(request).await
        } else {
            Payload::Error {
                code: ErrorCode::InvalidRequest,
                message: "expected a request payload".to_string(),
            }
        };

        let envelope = Message::new(request_id, local_id, response);
        if let Err(e) = write_frame(&mut stream, &envelope).await {
            debug!(%peer, error = %e, "response write failed");
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::RpcClient;
    use std::time::Duration;
    use weft_proto::NodeHandle;

    struct EchoHandler {
        node: NodeHandle,
    }

    #[async_trait]
    impl RpcHandler for EchoHandler {
        async fn handle(&self, msg: Message) -> Payload {
            match msg.payload {
                Payload::Hello => Payload::HelloResponse {
                    node: self.node.clone(),
                },
                _ => Payload::Error {
                    code: ErrorCode::InvalidRequest,
                    message: "unsupported".to_string(),
                },
            }
        }
    }

    #[tokio::test]
    async fn test_hello_over_loopback() {
        let id = Id::random();
        let server = RpcServer::bind("127.0.0.1:0".parse().unwrap(), id)
            .await
            .unwrap();
        let addr = server.local_addr().unwrap();
        let node = NodeHandle::new(id, addr);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        server.spawn(Arc::new(EchoHandler { node: node.clone() }), shutdown_rx);

        let client = RpcClient::new(Id::random(), Duration::from_secs(1));
        let reply = client.call(addr, Payload::Hello).await.unwrap();
        assert_eq!(reply, Payload::HelloResponse { node });

        shutdown_tx.send(true).unwrap();
    }

    #[tokio::test]
    async fn test_remote_error_surfaces() {
        let id = Id::random();
        let server = RpcServer::bind("127.0.0.1:0".parse().unwrap(), id)
            .await
            .unwrap();
        let addr = server.local_addr().unwrap();
        let node = NodeHandle::new(id, addr);

        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        server.spawn(Arc::new(EchoHandler { node }), shutdown_rx);

        let client = RpcClient::new(Id::random(), Duration::from_secs(1));
        let result = client
            .call(
                addr,
                Payload::Lookup {
                    key: "k".to_string(),
                },
            )
            .await;
        assert!(matches!(result, Err(NetError::Remote { .. })));
    }

    #[tokio::test]
    async fn test_unreachable_peer_times_out() {
        let client = RpcClient::new(Id::random(), Duration::from_millis(200));
        // RFC 5737 TEST-NET address: never routable.
        let addr: SocketAddr = "192.0.2.1:1".parse().unwrap();
        let result = client.call(addr, Payload::Hello).await;
        assert!(result.is_err());
    }
}
