//! Liveness under churn: departing roots, vanished publishers, rejoins.

use std::time::Duration;

use weft_core::Id;
use weft_tests::TestNet;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("weft_overlay=debug,weft_tests=debug")
        .with_test_writer()
        .try_init();
}

async fn scenario_mesh(net: &mut TestNet) {
    net.found("1225").await.unwrap();
    for id in ["1230", "1221", "1021", "1310"] {
        net.join(id).await.unwrap();
    }
}

#[tokio::test]
async fn test_get_survives_root_departure() {
    init_tracing();
    let mut net = TestNet::new();
    scenario_mesh(&mut net).await;
    net.breathe().await;

    // Publish from a node that is not the root, then read from a third
    // party so neither endpoint of the assertion churns.
    let root = net.nodes()[0]
        .find_root(Id::hash_of("key1"))
        .await
        .unwrap();
    let publisher = net
        .nodes()
        .iter()
        .find(|n| n.id() != root.id)
        .unwrap()
        .clone();
    let reader = net
        .nodes()
        .iter()
        .find(|n| n.id() != root.id && n.id() != publisher.id())
        .unwrap()
        .clone();

    publisher.store("key1", b"value1").await.unwrap();
    net.settle().await;
    assert_eq!(reader.get("key1").await.unwrap(), b"value1");

    // The root departs; the next republish must re-root the key.
    let root_node = net.node_by_id(&root.id).unwrap();
    net.leave(&root_node).await.unwrap();
    net.settle_for(Duration::from_millis(500)).await;

    assert_eq!(reader.get("key1").await.unwrap(), b"value1");

    // And the new root is a different live node.
    let new_root = reader.find_root(Id::hash_of("key1")).await.unwrap();
    assert_ne!(new_root.id, root.id);
}

#[tokio::test]
async fn test_key_unavailable_after_all_publishers_leave() {
    init_tracing();
    let mut net = TestNet::new();
    scenario_mesh(&mut net).await;
    net.breathe().await;

    let publisher = net.node_by_id(&Id::from_prefix("1021").unwrap()).unwrap();
    publisher.store("key1", b"value1").await.unwrap();
    net.settle().await;

    let reader = net.node_by_id(&Id::from_prefix("1221").unwrap()).unwrap();
    assert_eq!(reader.get("key1").await.unwrap(), b"value1");

    // The only publisher departs gracefully; its advertisement is revoked
    // and nothing refreshes it.
    net.leave(&publisher).await.unwrap();
    net.settle().await;

    assert!(
        reader.get("key1").await.is_err(),
        "key must be unavailable once every publisher is gone"
    );
}

#[tokio::test]
async fn test_leave_then_rejoin_with_same_id() {
    init_tracing();
    let mut net = TestNet::new();
    scenario_mesh(&mut net).await;
    net.breathe().await;

    let node = net.node_by_id(&Id::from_prefix("1021").unwrap()).unwrap();
    net.leave(&node).await.unwrap();
    net.breathe().await;

    // The identifier comes back on a fresh endpoint.
    let rejoined = net.join("1021").await.unwrap();
    net.breathe().await;

    for peer in net.nodes() {
        let root = peer.find_root(rejoined.id()).await.unwrap();
        assert_eq!(
            root.id,
            rejoined.id(),
            "rejoined node is not routable from {}",
            peer.descriptor()
        );
    }
}

#[tokio::test]
async fn test_publisher_republish_repairs_missed_handoff() {
    init_tracing();
    let mut net = TestNet::new();
    net.found("1221").await.unwrap();
    net.join("1310").await.unwrap();
    net.breathe().await;

    let publisher = net.node_by_id(&Id::from_prefix("1310").unwrap()).unwrap();
    publisher.store("key1", b"value1").await.unwrap();
    net.settle().await;

    // Churn the mesh: a node joins and another leaves within the same
    // settle window. Wherever the root ends up, republish must land the
    // advertisement there within one period.
    net.join("1021").await.unwrap();
    let founder = net.node_by_id(&Id::from_prefix("1221").unwrap()).unwrap();
    net.leave(&founder).await.unwrap();
    net.settle_for(Duration::from_millis(500)).await;

    let reader = net.node_by_id(&Id::from_prefix("1021").unwrap()).unwrap();
    assert_eq!(reader.get("key1").await.unwrap(), b"value1");
}
