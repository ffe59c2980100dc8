//! Loopback network harness.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;
use tracing::info;
use weft_core::Id;
use weft_overlay::{OverlayConfig, OverlayError, OverlayNode};

/// A test network of real nodes on `127.0.0.1` ephemeral ports.
///
/// Identifiers are given as hex prefixes (padded with zeros) so tests can
/// pin the prefix relationships a scenario depends on.
pub struct TestNet {
    config: OverlayConfig,
    nodes: Vec<Arc<OverlayNode>>,
}

impl TestNet {
    /// Creates an empty network with compressed timing.
    pub fn new() -> Self {
        Self {
            config: OverlayConfig::fast(),
            nodes: Vec::new(),
        }
    }

    /// The timing configuration nodes are started with.
    pub fn config(&self) -> &OverlayConfig {
        &self.config
    }

    /// Starts the first node; it founds the mesh.
    pub async fn found(&mut self, id_prefix: &str) -> Result<Arc<OverlayNode>, OverlayError> {
        assert!(self.nodes.is_empty(), "mesh already founded");
        let node = OverlayNode::start(
            Some(Id::from_prefix(id_prefix).unwrap()),
            "127.0.0.1:0".parse().unwrap(),
            None,
            self.config.clone(),
        )
        .await?;
        info!(node = %node.descriptor(), "founded test mesh");
        self.nodes.push(node.clone());
        Ok(node)
    }

    /// Joins a new node through the first live member.
    pub async fn join(&mut self, id_prefix: &str) -> Result<Arc<OverlayNode>, OverlayError> {
        let bootstrap = self
            .nodes
            .first()
            .expect("mesh must be founded before joins")
            .addr();
        let node = OverlayNode::start(
            Some(Id::from_prefix(id_prefix).unwrap()),
            "127.0.0.1:0".parse().unwrap(),
            Some(bootstrap),
            self.config.clone(),
        )
        .await?;
        info!(node = %node.descriptor(), "joined test mesh");
        self.nodes.push(node.clone());
        Ok(node)
    }

    /// All live nodes.
    pub fn nodes(&self) -> &[Arc<OverlayNode>] {
        &self.nodes
    }

    /// Finds a live node by identifier.
    pub fn node_by_id(&self, id: &Id) -> Option<Arc<OverlayNode>> {
        self.nodes.iter().find(|n| n.id() == *id).cloned()
    }

    /// Gracefully departs `node` and drops it from the registry.
    pub async fn leave(&mut self, node: &Arc<OverlayNode>) -> Result<(), OverlayError> {
        node.leave().await?;
        self.nodes.retain(|n| n.id() != node.id());
        info!(node = %node.descriptor(), remaining = self.nodes.len(), "left test mesh");
        Ok(())
    }

    /// Waits long enough for every publisher to have republished and for
    /// lapsed advertisements to expire: the compressed equivalent of the
    /// scenarios' "after 20 seconds".
    pub async fn settle(&self) {
        sleep(self.config.advertise_ttl + 2 * self.config.republish_period).await;
    }

    /// A shorter pause, two republish periods.
    pub async fn breathe(&self) {
        sleep(2 * self.config.republish_period).await;
    }

    /// Extra settling time beyond the default, when a scenario stacks
    /// several churn events.
    pub async fn settle_for(&self, extra: Duration) {
        self.settle().await;
        sleep(extra).await;
    }
}

impl Default for TestNet {
    fn default() -> Self {
        Self::new()
    }
}
