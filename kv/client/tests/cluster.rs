//! End-to-end tests driving a real HTTP cluster through [`KvClient`].
//! Covers scenarios 4, 5, and 6 of spec §8.

use raftkv_kvclient::KvClient;
use raftkv_kvservice::{router, KvService, ServiceConfig};
use raftkv_observability::NullEventSink;
use raftkv_raft::{NodeId, RaftConfig, RaftNode};
use raftkv_storage::MemoryStorage;
use raftkv_transport::SimulatedTransport;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

async fn spawn_cluster(n: u64) -> Vec<String> {
    let transport = Arc::new(SimulatedTransport::default());
    let config = RaftConfig::builder()
        .election_timeout(Duration::from_millis(40), Duration::from_millis(80))
        .heartbeat_interval(Duration::from_millis(10))
        .election_tick(Duration::from_millis(4))
        .build();
    let peers: Vec<NodeId> = (1..=n).map(NodeId).collect();

    let mut addrs = Vec::new();
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
        let app = router(service);

        let listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addrs.push(addr.to_string());
    }
    addrs
}

#[tokio::test]
async fn concurrent_puts_from_fresh_clients_all_land() {
    let addrs = spawn_cluster(5).await;

    let mut handles = Vec::new();
    for i in 0..9 {
        let addrs = addrs.clone();
        handles.push(tokio::spawn(async move {
            let client = KvClient::new(addrs);
            client
                .put(format!("key{i}"), format!("value{i}"), Duration::from_secs(3))
                .await
        }));
    }
    for h in handles {
        h.await.unwrap().expect("every concurrent put should eventually land");
    }

    let reader = KvClient::new(addrs);
    for i in 0..9 {
        let (value, found) = reader
            .get(format!("key{i}"), Duration::from_secs(3))
            .await
            .expect("get should succeed");
        assert!(found);
        assert_eq!(value, Some(format!("value{i}")));
    }
}

#[tokio::test]
async fn request_issued_before_any_leader_exists_either_succeeds_or_times_out() {
    let addrs = spawn_cluster(3).await;
    // Fire immediately — the cluster has had essentially no time to elect a leader.
    let client = KvClient::new(addrs);
    let result = client
        .put("early".to_string(), "value".to_string(), Duration::from_millis(300))
        .await;

    match result {
        Ok((prev, found)) => {
            assert_eq!(prev, None);
            assert!(!found);
        }
        Err(raftkv_kvclient::ClientError::DeadlineExceeded) => {}
        Err(other) => panic!("unexpected error before consensus: {other}"),
    }
}

#[tokio::test]
async fn get_of_missing_key_through_client() {
    let addrs = spawn_cluster(3).await;
    let client = KvClient::new(addrs);
    let (value, found) = client
        .get("absent".to_string(), Duration::from_secs(2))
        .await
        .expect("cluster should elect a leader within two seconds");
    assert_eq!(value, None);
    assert!(!found);
}
