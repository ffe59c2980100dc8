//! Iterative root resolution.
//!
//! `resolve_root` walks the mesh one `get_next_hop` RPC at a time until a
//! node names itself as the next hop. That fixed point is the root for the
//! target identifier. Locks are never held across a hop; each RPC carries
//! the client's deadline.

use tracing::{debug, trace};
use weft_core::{Id, DIGITS};
use weft_net::client::RpcClient;
use weft_proto::{NodeHandle, Payload};

use crate::error::OverlayError;
use crate::table::RoutingTable;

/// Upper bound on traversal steps. Prefix resolution needs at most one hop
/// per digit; the slack absorbs backtracking around dead peers.
const MAX_STEPS: usize = DIGITS * 4;

/// Resolves the root for `target`, starting the walk at `start`.
///
/// An unreachable hop is removed from the local table, reported to the
/// previous hop with `remove_node`, and the walk resumes there. An
/// unreachable `start` fails the operation.
pub(crate) async fn resolve_root(
    client: &RpcClient,
    table: &RoutingTable,
    start: NodeHandle,
    target: Id,
) -> Result<NodeHandle, OverlayError> {
    let local = table.local().clone();
    let mut current = start;
    let mut path: Vec<NodeHandle> = Vec::new();

    for _ in 0..MAX_STEPS {
        let hop = if current.id == local.id {
            Ok(table.next_hop(&target))
        } else {
            next_hop_rpc(client, &current, target).await
        };

        match hop {
            Ok(next) => {
                trace!(target = %target, at = %current, next = %next, "routing step");
                if next.id == current.id {
                    return Ok(next);
                }
                path.push(current);
                current = next;
            }
            Err(_) => {
                debug!(dead = %current, "hop unreachable, backtracking");
                table.remove(&current.id);
                match path.pop() {
                    Some(prev) => {
                        if prev.id != local.id {
                            let _ = client
                                .call(prev.addr, Payload::RemoveNode { id: current.id })
                                .await;
                        }
                        current = prev;
                    }
                    None => {
                        return Err(OverlayError::Unreachable { addr: current.addr });
                    }
                }
            }
        }
    }

    Err(OverlayError::RootNotFound { target })
}

async fn next_hop_rpc(
    client: &RpcClient,
    peer: &NodeHandle,
    target: Id,
) -> Result<NodeHandle, OverlayError> {
    match client
        .call(peer.addr, Payload::GetNextHop { target })
        .await?
    {
        Payload::GetNextHopResponse { node } => Ok(node),
        other => Err(OverlayError::Protocol(other.message_type())),
    }
}
