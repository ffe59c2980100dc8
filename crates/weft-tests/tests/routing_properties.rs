//! Routing-engine properties over live loopback networks.

use weft_core::Id;
use weft_overlay::{OverlayConfig, OverlayError, OverlayNode};
use weft_tests::TestNet;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("weft_overlay=debug,weft_tests=debug")
        .with_test_writer()
        .try_init();
}

/// Builds a five-node mesh whose members all have distinct first digits,
/// so every table's level-0 row sees every peer.
async fn diverse_mesh(net: &mut TestNet) {
    net.found("1225").await.unwrap();
    for id in ["4230", "8221", "c021", "2310"] {
        net.join(id).await.unwrap();
    }
}

#[tokio::test]
async fn test_find_root_is_start_independent() {
    init_tracing();
    let mut net = TestNet::new();
    diverse_mesh(&mut net).await;
    net.breathe().await;

    let targets = [
        Id::from_prefix("1033").unwrap(),
        Id::from_prefix("ffff").unwrap(),
        Id::from_prefix("0001").unwrap(),
        Id::hash_of("key1"),
        Id::random(),
    ];

    for target in targets {
        let mut roots = Vec::new();
        for node in net.nodes() {
            let root = node.find_root(target).await.unwrap();
            roots.push(root.id);
        }
        let first = roots[0];
        assert!(
            roots.iter().all(|r| *r == first),
            "root for {target} differs by start: {roots:?}"
        );
    }
}

#[tokio::test]
async fn test_every_member_learns_the_mesh() {
    init_tracing();
    let mut net = TestNet::new();
    diverse_mesh(&mut net).await;
    net.breathe().await;

    // Distinct first digits put each peer in its own level-0 slot, so
    // nothing is hidden behind a slot head.
    for node in net.nodes() {
        assert_eq!(
            node.table().len(),
            net.nodes().len() - 1,
            "node {} is missing peers",
            node.descriptor()
        );
    }
}

#[tokio::test]
async fn test_own_id_roots_at_self() {
    init_tracing();
    let mut net = TestNet::new();
    diverse_mesh(&mut net).await;
    net.breathe().await;

    // Each node is the closest live node to its own identifier.
    for node in net.nodes() {
        let root = node.find_root(node.id()).await.unwrap();
        assert_eq!(root.id, node.id());
    }
}

#[tokio::test]
async fn test_join_fails_on_dead_bootstrap() {
    init_tracing();
    // The discard port is closed on test machines; the connection is
    // refused immediately.
    let result = OverlayNode::start(
        Some(Id::from_prefix("1225").unwrap()),
        "127.0.0.1:0".parse().unwrap(),
        Some("127.0.0.1:9".parse().unwrap()),
        OverlayConfig::fast(),
    )
    .await;

    assert!(matches!(result, Err(OverlayError::JoinFailed(_))));
}

#[tokio::test]
async fn test_departed_node_is_unroutable() {
    init_tracing();
    let mut net = TestNet::new();
    diverse_mesh(&mut net).await;
    net.breathe().await;

    let victim = net.nodes().last().unwrap().clone();
    net.leave(&victim).await.unwrap();

    // Its identifier now roots at some surviving node, from every start.
    for node in net.nodes() {
        let root = node.find_root(victim.id()).await.unwrap();
        assert_ne!(root.id, victim.id(), "routing still lands on departed node");
    }
}
