//! The overlay node.
//!
//! One [`OverlayNode`] owns the local routing table, backpointer set and
//! stores, answers the full RPC surface, and drives the join, leave and
//! republish protocols. All state is behind per-structure locks; no lock
//! is ever held across an RPC.

use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};
use weft_core::{Id, DIGITS};
use weft_net::client::RpcClient;
use weft_net::server::{RpcHandler, RpcServer};
use weft_proto::{ErrorCode, Message, NodeHandle, Payload, TransferEntry};

use crate::backpointers::Backpointers;
use crate::config::OverlayConfig;
use crate::error::OverlayError;
use crate::router::resolve_root;
use crate::store::{BlobStore, ObjectStore, PublishedSet};
use crate::table::RoutingTable;
use crate::TRAVERSAL_FANOUT;

/// A running overlay node.
///
/// Create with [`OverlayNode::start`]; the RPC server and the republish
/// timer run as background tasks until [`OverlayNode::leave`].
pub struct OverlayNode {
    node: NodeHandle,
    config: OverlayConfig,
    table: RoutingTable,
    backpointers: Backpointers,
    objects: ObjectStore,
    published: PublishedSet,
    blobs: BlobStore,
    client: RpcClient,
    ready_tx: watch::Sender<bool>,
    timer_stop_tx: watch::Sender<bool>,
    server_stop_tx: watch::Sender<bool>,
}

impl OverlayNode {
    /// Binds `listen`, inserts the node into the mesh reachable through
    /// `bootstrap` (or starts a fresh mesh when `bootstrap` is `None`) and
    /// spawns the background tasks.
    ///
    /// With no explicit `id` a random one is drawn.
    pub async fn start(
        id: Option<Id>,
        listen: SocketAddr,
        bootstrap: Option<SocketAddr>,
        config: OverlayConfig,
    ) -> Result<Arc<Self>, OverlayError> {
        let id = id.unwrap_or_else(Id::random);
        let server = RpcServer::bind(listen, id).await?;
        let addr = server.local_addr()?;
        let node = NodeHandle::new(id, addr);

        let (ready_tx, _) = watch::channel(false);
        let (timer_stop_tx, timer_stop_rx) = watch::channel(false);
        let (server_stop_tx, server_stop_rx) = watch::channel(false);

        let this = Arc::new(Self {
            client: RpcClient::new(id, config.rpc_timeout),
            table: RoutingTable::new(node.clone()),
            backpointers: Backpointers::new(),
            objects: ObjectStore::new(),
            published: PublishedSet::new(),
            blobs: BlobStore::new(),
            node,
            config,
            ready_tx,
            timer_stop_tx,
            server_stop_tx,
        });

        server.spawn(this.clone(), server_stop_rx);

        match bootstrap {
            None => {
                info!(node = %this.node, "starting new mesh as sole member");
                let _ = this.ready_tx.send(true);
            }
            Some(bootstrap) => {
                if let Err(e) = this.join(bootstrap).await {
                    let _ = this.server_stop_tx.send(true);
                    return Err(e);
                }
            }
        }

        tokio::spawn(Self::maintenance_loop(this.clone(), timer_stop_rx));
        Ok(this)
    }

    /// The local node's descriptor.
    pub fn descriptor(&self) -> &NodeHandle {
        &self.node
    }

    /// The local identifier.
    pub fn id(&self) -> Id {
        self.node.id
    }

    /// The bound RPC endpoint.
    pub fn addr(&self) -> SocketAddr {
        self.node.addr
    }

    /// True once join has completed (immediately for a mesh founder).
    pub fn is_ready(&self) -> bool {
        *self.ready_tx.subscribe().borrow()
    }

    /// The local routing table.
    pub fn table(&self) -> &RoutingTable {
        &self.table
    }

    /// Keys this node currently holds advertisements for as root.
    pub fn advertised_keys(&self) -> Vec<String> {
        self.objects.keys()
    }

    /// Resolves the root for `target`, starting from this node.
    pub async fn find_root(&self, target: Id) -> Result<NodeHandle, OverlayError> {
        resolve_root(&self.client, &self.table, self.node.clone(), target).await
    }

    // ------------------------------------------------------------------
    // Application surface
    // ------------------------------------------------------------------

    /// Stores `value` locally under `key` and advertises the key at its
    /// root. Blocks until the node has finished joining.
    pub async fn store(&self, key: &str, value: &[u8]) -> Result<(), OverlayError> {
        self.wait_ready().await;
        self.blobs.put(key, value.to_vec());
        self.published.insert(key);
        self.publish(key).await
    }

    /// Advertises `key` at the current root for its hash. Re-run by the
    /// republish tick for every owned key.
    pub async fn publish(&self, key: &str) -> Result<(), OverlayError> {
        let root = self.find_root(Id::hash_of(key)).await?;
        let ttl = self.config.advertise_ttl;
        if root.id == self.node.id {
            self.objects.advertise(key, self.node.clone(), ttl);
            return Ok(());
        }
        let payload = Payload::Advertise {
            key: key.to_string(),
            publisher: self.node.clone(),
            ttl_ms: ttl.as_millis() as u64,
        };
        match self.client.call(root.addr, payload).await? {
            Payload::Ack { .. } => Ok(()),
            other => Err(OverlayError::Protocol(other.message_type())),
        }
    }

    /// Returns the publishers currently advertising `key` at its root.
    pub async fn lookup(&self, key: &str) -> Result<Vec<NodeHandle>, OverlayError> {
        self.wait_ready().await;
        let root = self.find_root(Id::hash_of(key)).await?;
        if root.id == self.node.id {
            return Ok(self.objects.publishers(key));
        }
        let payload = Payload::Lookup {
            key: key.to_string(),
        };
        match self.client.call(root.addr, payload).await? {
            Payload::LookupResponse { publishers } => Ok(publishers),
            other => Err(OverlayError::Protocol(other.message_type())),
        }
    }

    /// Fetches the bytes for `key` from any live publisher.
    pub async fn get(&self, key: &str) -> Result<Vec<u8>, OverlayError> {
        let publishers = self.lookup(key).await?;
        for publisher in publishers {
            if publisher.id == self.node.id {
                if let Some(bytes) = self.blobs.get(key) {
                    return Ok(bytes);
                }
                continue;
            }
            let payload = Payload::Fetch {
                key: key.to_string(),
            };
            match self.client.call(publisher.addr, payload).await {
                Ok(Payload::FetchResponse { data: Some(bytes) }) => return Ok(bytes),
                Ok(_) => continue,
                Err(_) => {
                    self.table.remove(&publisher.id);
                }
            }
        }
        Err(OverlayError::KeyUnavailable(key.to_string()))
    }

    /// Stops publishing `key` and deletes its blob, revoking the
    /// advertisement at the current root best-effort. Returns whether the
    /// key was owned here.
    pub async fn remove(&self, key: &str) -> Result<bool, OverlayError> {
        self.wait_ready().await;
        let owned = self.published.remove(key);
        self.blobs.remove(key);
        if owned {
            if let Ok(root) = self.find_root(Id::hash_of(key)).await {
                if root.id == self.node.id {
                    self.objects.revoke(key, &self.node.id);
                } else {
                    let payload = Payload::Advertise {
                        key: key.to_string(),
                        publisher: self.node.clone(),
                        ttl_ms: 0,
                    };
                    let _ = self.client.call(root.addr, payload).await;
                }
            }
        }
        Ok(owned)
    }

    // ------------------------------------------------------------------
    // Join
    // ------------------------------------------------------------------

    async fn join(&self, bootstrap: SocketAddr) -> Result<(), OverlayError> {
        info!(node = %self.node, %bootstrap, "joining mesh");

        let gateway = match self.client.call(bootstrap, Payload::Hello).await {
            Ok(Payload::HelloResponse { node }) => node,
            Ok(other) => return Err(OverlayError::Protocol(other.message_type())),
            Err(e) => {
                return Err(OverlayError::JoinFailed(format!(
                    "bootstrap {bootstrap} unreachable: {e}"
                )))
            }
        };

        let root = resolve_root(&self.client, &self.table, gateway, self.node.id)
            .await
            .map_err(|e| OverlayError::JoinFailed(format!("no root for local id: {e}")))?;

        // The root's multicast fans out across its whole prefix region
        // before answering; give it a longer leash than a point-to-point
        // call.
        let payload = Payload::Join {
            node: self.node.clone(),
        };
        let reply = self
            .client
            .call_with_deadline(root.addr, payload, self.config.rpc_timeout * 8)
            .await
            .map_err(|e| OverlayError::JoinFailed(format!("root {root} refused join: {e}")))?;
        let neighbors = match reply {
            Payload::JoinResponse { neighbors } => neighbors,
            other => {
                return Err(OverlayError::JoinFailed(format!(
                    "unexpected {:?} from root",
                    other.message_type()
                )))
            }
        };

        let mut frontier = dedup_by_id(neighbors);
        frontier.retain(|n| n.id != self.node.id);
        for neighbor in &frontier {
            self.table.add(neighbor.clone());
        }

        self.traverse_neighbors(&mut frontier, self.node.id.shared_prefix_len(&root.id))
            .await;
        self.announce().await;

        let _ = self.ready_tx.send(true);
        info!(node = %self.node, peers = self.table.len(), "join complete");
        Ok(())
    }

    /// Walks from the join level toward level 0, harvesting lower table
    /// levels (and their backpointer sets) from the closest frontier
    /// nodes.
    async fn traverse_neighbors(&self, frontier: &mut Vec<NodeHandle>, join_level: usize) {
        for level in (1..=join_level).rev() {
            sort_closest(&self.node.id, frontier);
            frontier.truncate(TRAVERSAL_FANOUT);

            let mut discovered = Vec::new();
            for peer in frontier.iter() {
                match self.harvest_level(peer, level - 1).await {
                    Ok(nodes) => discovered.extend(nodes),
                    Err(_) => {
                        self.table.remove(&peer.id);
                    }
                }
            }

            for node in dedup_by_id(discovered) {
                if node.id == self.node.id {
                    continue;
                }
                self.table.add(node.clone());
                if !frontier.iter().any(|f| f.id == node.id) {
                    frontier.push(node);
                }
            }
        }
    }

    async fn harvest_level(
        &self,
        peer: &NodeHandle,
        level: usize,
    ) -> Result<Vec<NodeHandle>, OverlayError> {
        let mut nodes = match self
            .client
            .call(
                peer.addr,
                Payload::GetLevel {
                    level: level as u32,
                },
            )
            .await?
        {
            Payload::GetLevelResponse { nodes } => nodes,
            other => return Err(OverlayError::Protocol(other.message_type())),
        };
        match self
            .client
            .call(
                peer.addr,
                Payload::GetBackpointers {
                    level: level as u32,
                },
            )
            .await?
        {
            Payload::GetBackpointersResponse { nodes: more } => nodes.extend(more),
            other => return Err(OverlayError::Protocol(other.message_type())),
        }
        Ok(nodes)
    }

    /// Registers this node in the backpointer sets of every table peer and
    /// thereby announces join completion.
    async fn announce(&self) {
        for peer in self.table.peers() {
            let level = self.node.id.shared_prefix_len(&peer.id);
            let payload = Payload::AddBackpointer {
                level: level as u32,
                node: self.node.clone(),
            };
            if self.client.call(peer.addr, payload).await.is_err() {
                self.table.remove(&peer.id);
            }
        }
    }

    /// One step of the acknowledged multicast: fan out to every slot head
    /// of `level`, recurse locally one level deeper, and return every node
    /// reached. The bottom of the recursion contributes the local node.
    fn multicast<'a>(
        &'a self,
        newcomer: NodeHandle,
        level: usize,
    ) -> Pin<Box<dyn Future<Output = Vec<NodeHandle>> + Send + 'a>> {
        Box::pin(async move {
            if level >= DIGITS {
                return vec![self.node.clone()];
            }

            let mut reached = Vec::new();
            for target in self.table.get_level(level) {
                if target.id == newcomer.id {
                    continue;
                }
                let payload = Payload::Multicast {
                    node: newcomer.clone(),
                    level: (level + 1) as u32,
                };
                match self
                    .client
                    .call_with_deadline(target.addr, payload, self.config.rpc_timeout * 4)
                    .await
                {
                    Ok(Payload::MulticastResponse { nodes }) => reached.extend(nodes),
                    Ok(_) => {}
                    Err(e) => {
                        debug!(dead = %target, error = %e, "multicast target unreachable");
                        self.table.remove(&target.id);
                    }
                }
            }

            reached.extend(self.multicast(newcomer, level + 1).await);
            dedup_by_id(reached)
        })
    }

    /// Records a newcomer seen by the multicast: table insert, backpointer
    /// entry, and surrogate handoff of every advertisement it now roots.
    async fn absorb_newcomer(&self, newcomer: &NodeHandle) {
        if newcomer.id == self.node.id {
            return;
        }
        self.table.add(newcomer.clone());
        let level = self.node.id.shared_prefix_len(&newcomer.id);
        self.backpointers.add(level, newcomer.clone());

        let moved = self.objects.take_for(&newcomer.id, &self.node.id);
        if moved.is_empty() {
            return;
        }
        let entries: Vec<TransferEntry> = moved
            .iter()
            .map(|(key, publishers)| TransferEntry {
                key: key.clone(),
                publishers: publishers.clone(),
            })
            .collect();
        let count = entries.len();
        match self
            .client
            .call(newcomer.addr, Payload::Transfer { entries })
            .await
        {
            Ok(Payload::Ack { ok: true }) => {
                info!(count, to = %newcomer, "handed off advertisements to new root");
            }
            _ => {
                warn!(to = %newcomer, "handoff not acknowledged, reinstating entries");
                self.objects.restore(moved, self.config.advertise_ttl);
            }
        }
    }

    // ------------------------------------------------------------------
    // Leave
    // ------------------------------------------------------------------

    /// Gracefully departs the mesh: cancels the republish timer, notifies
    /// every table peer with a best-effort replacement, revokes the
    /// advertisements for locally-published keys, then stops the server.
    pub async fn leave(&self) -> Result<(), OverlayError> {
        info!(node = %self.node, "leaving mesh");
        let _ = self.timer_stop_tx.send(true);

        for peer in self.table.peers() {
            let replacement = self.table.replacement_for(&peer);
            let payload = Payload::NotifyLeave {
                leaver: self.node.clone(),
                replacement,
            };
            if let Err(e) = self.client.call(peer.addr, payload).await {
                debug!(peer = %peer, error = %e, "leave notification failed");
            }
        }

        for key in self.published.keys() {
            self.published.remove(&key);
            match self.find_root(Id::hash_of(&key)).await {
                Ok(root) if root.id != self.node.id => {
                    let payload = Payload::Advertise {
                        key: key.clone(),
                        publisher: self.node.clone(),
                        ttl_ms: 0,
                    };
                    let _ = self.client.call(root.addr, payload).await;
                }
                _ => {}
            }
        }

        let _ = self.server_stop_tx.send(true);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Background tasks
    // ------------------------------------------------------------------

    async fn maintenance_loop(node: Arc<OverlayNode>, mut stop: watch::Receiver<bool>) {
        let mut tick = interval(node.config.republish_period);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = tick.tick() => {
                    node.objects.sweep_expired();
                    for key in node.published.keys() {
                        if let Err(e) = node.publish(&key).await {
                            debug!(key = %key, error = %e, "republish failed");
                        }
                    }
                }
                _ = stop.changed() => {
                    if *stop.borrow() {
                        break;
                    }
                }
            }
        }
        debug!(node = %node.node, "republish timer stopped");
    }

    async fn wait_ready(&self) {
        let mut ready = self.ready_tx.subscribe();
        loop {
            if *ready.borrow() {
                return;
            }
            if ready.changed().await.is_err() {
                return;
            }
        }
    }
}

#[async_trait]
impl RpcHandler for OverlayNode {
    async fn handle(&self, msg: Message) -> Payload {
        match msg.payload {
            Payload::Hello => Payload::HelloResponse {
                node: self.node.clone(),
            },

            Payload::GetNextHop { target } => Payload::GetNextHopResponse {
                node: self.table.next_hop(&target),
            },

            Payload::AddNode { node } => {
                let (added, evicted) = self.table.add(node);
                Payload::AddNodeResponse { added, evicted }
            }

            Payload::RemoveNode { id } => Payload::RemoveNodeResponse {
                removed: self.table.remove(&id),
            },

            Payload::GetLevel { level } => match checked_level(level) {
                Ok(level) => Payload::GetLevelResponse {
                    nodes: self.table.get_level(level),
                },
                Err(e) => e,
            },

            Payload::Join { node } => {
                if node.id == self.node.id {
                    return Payload::Error {
                        code: ErrorCode::InvalidRequest,
                        message: "identifier already present in mesh".to_string(),
                    };
                }
                let level = self.node.id.shared_prefix_len(&node.id);
                let neighbors = self.multicast(node.clone(), level).await;
                self.absorb_newcomer(&node).await;
                Payload::JoinResponse { neighbors }
            }

            Payload::Multicast { node, level } => {
                // `level == DIGITS` is the legal recursion base: the
                // fan-out reached the last level and only the local node
                // remains to report.
                let level = level as usize;
                if level > DIGITS {
                    return Payload::Error {
                        code: ErrorCode::InvalidRequest,
                        message: format!("level {level} out of range"),
                    };
                }
                let nodes = self.multicast(node.clone(), level).await;
                self.absorb_newcomer(&node).await;
                Payload::MulticastResponse { nodes }
            }

            Payload::GetBackpointers { level } => match checked_level(level) {
                Ok(level) => Payload::GetBackpointersResponse {
                    nodes: self.backpointers.get(level),
                },
                Err(e) => e,
            },

            Payload::AddBackpointer { level, node } => Payload::Ack {
                ok: self.backpointers.add(level as usize, node),
            },

            Payload::RemoveBackpointer { level, node } => Payload::Ack {
                ok: self.backpointers.remove(level as usize, &node.id),
            },

            Payload::NotifyLeave {
                leaver,
                replacement,
            } => {
                let removed = self.table.remove(&leaver.id);
                self.backpointers.remove_everywhere(&leaver.id);
                if let Some(replacement) = replacement {
                    self.table.add(replacement);
                }
                Payload::Ack { ok: removed }
            }

            Payload::Transfer { entries } => {
                debug!(count = entries.len(), "absorbing transferred advertisements");
                self.objects.restore(
                    entries.into_iter().map(|e| (e.key, e.publishers)).collect(),
                    self.config.advertise_ttl,
                );
                Payload::Ack { ok: true }
            }

            Payload::Advertise {
                key,
                publisher,
                ttl_ms,
            } => {
                if ttl_ms == 0 {
                    Payload::Ack {
                        ok: self.objects.revoke(&key, &publisher.id),
                    }
                } else {
                    self.objects
                        .advertise(&key, publisher, Duration::from_millis(ttl_ms));
                    Payload::Ack { ok: true }
                }
            }

            Payload::Lookup { key } => Payload::LookupResponse {
                publishers: self.objects.publishers(&key),
            },

            Payload::Fetch { key } => Payload::FetchResponse {
                data: self.blobs.get(&key),
            },

            other => Payload::Error {
                code: ErrorCode::InvalidRequest,
                message: format!("unexpected {:?} request", other.message_type()),
            },
        }
    }
}

fn checked_level(level: u32) -> Result<usize, Payload> {
    let level = level as usize;
    if level >= DIGITS {
        return Err(Payload::Error {
            code: ErrorCode::InvalidRequest,
            message: format!("level {level} out of range"),
        });
    }
    Ok(level)
}

fn dedup_by_id(nodes: Vec<NodeHandle>) -> Vec<NodeHandle> {
    let mut seen = std::collections::HashSet::new();
    nodes.into_iter().filter(|n| seen.insert(n.id)).collect()
}

fn sort_closest(target: &Id, nodes: &mut [NodeHandle]) {
    nodes.sort_by(|a, b| {
        if target.closer(&a.id, &b.id) {
            std::cmp::Ordering::Less
        } else if target.closer(&b.id, &a.id) {
            std::cmp::Ordering::Greater
        } else {
            std::cmp::Ordering::Equal
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn solo_node(prefix: &str) -> Arc<OverlayNode> {
        OverlayNode::start(
            Some(Id::from_prefix(prefix).unwrap()),
            "127.0.0.1:0".parse().unwrap(),
            None,
            OverlayConfig::fast(),
        )
        .await
        .unwrap()
    }

    fn request(payload: Payload) -> Message {
        Message::new(1, Id::random(), payload)
    }

    #[tokio::test]
    async fn test_sole_member_is_ready_and_its_own_root() {
        let node = solo_node("1225").await;
        assert!(node.is_ready());

        let root = node.find_root(Id::from_prefix("1033").unwrap()).await.unwrap();
        assert_eq!(root.id, node.id());
    }

    #[tokio::test]
    async fn test_hello_and_next_hop_handlers() {
        let node = solo_node("1225").await;

        let reply = node.handle(request(Payload::Hello)).await;
        assert_eq!(
            reply,
            Payload::HelloResponse {
                node: node.descriptor().clone()
            }
        );

        let reply = node
            .handle(request(Payload::GetNextHop {
                target: Id::from_prefix("1033").unwrap(),
            }))
            .await;
        // Alone in the mesh, the node is the root for everything.
        assert_eq!(
            reply,
            Payload::GetNextHopResponse {
                node: node.descriptor().clone()
            }
        );
    }

    #[tokio::test]
    async fn test_advertise_lookup_revoke_handlers() {
        let node = solo_node("1225").await;
        let publisher = NodeHandle::new(
            Id::from_prefix("1230").unwrap(),
            "127.0.0.1:1".parse().unwrap(),
        );

        let reply = node
            .handle(request(Payload::Advertise {
                key: "key1".to_string(),
                publisher: publisher.clone(),
                ttl_ms: 60_000,
            }))
            .await;
        assert_eq!(reply, Payload::Ack { ok: true });

        let reply = node
            .handle(request(Payload::Lookup {
                key: "key1".to_string(),
            }))
            .await;
        assert_eq!(
            reply,
            Payload::LookupResponse {
                publishers: vec![publisher.clone()]
            }
        );

        // Zero TTL revokes.
        let reply = node
            .handle(request(Payload::Advertise {
                key: "key1".to_string(),
                publisher,
                ttl_ms: 0,
            }))
            .await;
        assert_eq!(reply, Payload::Ack { ok: true });
        assert!(node.advertised_keys().is_empty());
    }

    #[tokio::test]
    async fn test_out_of_range_level_is_rejected() {
        let node = solo_node("1225").await;
        let reply = node
            .handle(request(Payload::GetLevel {
                level: DIGITS as u32,
            }))
            .await;
        assert!(matches!(reply, Payload::Error { .. }));
    }

    #[tokio::test]
    async fn test_response_payload_as_request_is_rejected() {
        let node = solo_node("1225").await;
        let reply = node.handle(request(Payload::Ack { ok: true })).await;
        assert!(matches!(reply, Payload::Error { .. }));
    }

    #[tokio::test]
    async fn test_get_without_publisher_fails() {
        let node = solo_node("1225").await;
        let result = node.get("missing").await;
        assert!(matches!(result, Err(OverlayError::KeyUnavailable(_))));
    }

    #[tokio::test]
    async fn test_store_and_get_on_sole_member() {
        let node = solo_node("1225").await;
        node.store("key1", b"value1").await.unwrap();
        assert_eq!(node.get("key1").await.unwrap(), b"value1");

        assert!(node.remove("key1").await.unwrap());
        assert!(matches!(
            node.get("key1").await,
            Err(OverlayError::KeyUnavailable(_))
        ));
    }
}
