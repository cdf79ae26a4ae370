//! End-to-end test of the HTTP surface (spec §6) against a real 3-node
//! cluster: real Raft nodes over `SimulatedTransport`, real `axum` listeners
//! bound to ephemeral ports, real `reqwest` calls. Covers scenario 1 of §8.

use raftkv_kvservice::{router, KvService, ServiceConfig};
use raftkv_observability::NullEventSink;
use raftkv_raft::{NodeId, RaftConfig, RaftNode};
use raftkv_storage::MemoryStorage;
use raftkv_transport::SimulatedTransport;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

struct RunningNode {
    id: NodeId,
    addr: std::net::SocketAddr,
    service: KvService,
}

async fn spawn_cluster(n: u64) -> Vec<RunningNode> {
    let transport = Arc::new(SimulatedTransport::default());
    let config = RaftConfig::builder()
        .election_timeout(Duration::from_millis(40), Duration::from_millis(80))
        .heartbeat_interval(Duration::from_millis(10))
        .election_tick(Duration::from_millis(4))
        .build();
    let peers: Vec<NodeId> = (1..=n).map(NodeId).collect();

    let mut nodes = Vec::new();
    for &id in &peers {
        let (node, commit_rx) = RaftNode::new(
            id,
            peers.clone(),
            config.clone(),
            Arc::new(MemoryStorage::new()),
            transport.clone(),
            Arc::new(NullEventSink),
        )
        .await
        .unwrap();
        transport.connect(id, Arc::new(node.clone()));

        let service = KvService::new(id, node, commit_rx, ServiceConfig::default());
        let app = router(service.clone());

        let listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        nodes.push(RunningNode { id, addr, service });
    }
    nodes
}

async fn await_leader(nodes: &[RunningNode]) -> NodeId {
    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            for n in nodes {
                // report() lives on RaftNode, not KvService; peek through a
                // throwaway put attempt instead since only `put`/`get` are
                // exposed here intentionally (KvService hides the node).
                let probe = n.service.get("__leader_probe__".to_string()).await;
                if probe.is_ok() {
                    return n.id;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("a leader should emerge")
}

#[tokio::test]
async fn basic_put_then_get_over_http() {
    let nodes = spawn_cluster(3).await;
    let leader_id = await_leader(&nodes).await;
    let leader = nodes.iter().find(|n| n.id == leader_id).unwrap();

    let client = reqwest::Client::new();
    let put: serde_json::Value = client
        .post(format!("http://{}/put/", leader.addr))
        .json(&json!({"Key": "llave", "Value": "cosa"}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(put["RespStatus"], 1);
    assert_eq!(put["KeyFound"], false);

    let get: serde_json::Value = client
        .post(format!("http://{}/get/", leader.addr))
        .json(&json!({"Key": "llave"}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(get["RespStatus"], 1);
    assert_eq!(get["KeyFound"], true);
    assert_eq!(get["Value"], "cosa");
}

#[tokio::test]
async fn put_against_a_follower_reports_not_leader() {
    let nodes = spawn_cluster(3).await;
    let leader_id = await_leader(&nodes).await;
    let follower = nodes.iter().find(|n| n.id != leader_id).unwrap();

    let client = reqwest::Client::new();
    let put: serde_json::Value = client
        .post(format!("http://{}/put/", follower.addr))
        .json(&json!({"Key": "k", "Value": "v"}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(put["RespStatus"], 2, "a follower must answer NotLeader");
}

#[tokio::test]
async fn get_of_missing_key_over_http_reports_not_found() {
    let nodes = spawn_cluster(3).await;
    let leader_id = await_leader(&nodes).await;
    let leader = nodes.iter().find(|n| n.id == leader_id).unwrap();

    let client = reqwest::Client::new();
    let get: serde_json::Value = client
        .post(format!("http://{}/get/", leader.addr))
        .json(&json!({"Key": "absent"}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(get["RespStatus"], 1);
    assert_eq!(get["KeyFound"], false);
}
