//! Runnable end-to-end demo: stands up a real Raft+KV cluster over HTTP,
//! drives it with a real [`raftkv_kvclient::KvClient`], and narrates what
//! happens — leader election, replicated Put/Get, and a leader partition
//! forcing re-election. Not part of the core; a bootstrap binary only
//! (spec §1 calls process-level bootstrap out of scope for the core design).

use anyhow::Result;
use clap::Parser;
use raftkv_kvclient::KvClient;
use raftkv_kvservice::{router, KvService, ServiceConfig};
use raftkv_observability::NullEventSink;
use raftkv_raft::{NodeId, RaftConfig, RaftNode};
use raftkv_storage::MemoryStorage;
use raftkv_transport::SimulatedTransport;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

#[derive(Parser, Debug)]
#[command(name = "cluster-demo", about = "Stand up a small raftkv cluster and drive it end to end")]
struct Args {
    /// Number of nodes in the demo cluster.
    #[arg(long, default_value_t = 3)]
    nodes: u64,

    /// Inject ~10% RPC drop / ~10% of 75ms delay to show the system tolerate a flaky network.
    #[arg(long, default_value_t = false)]
    flaky: bool,
}

struct Node {
    id: NodeId,
    addr: std::net::SocketAddr,
}

#[tokio::main]
async fn main() -> Result<()> {
    raftkv_observability::init_text_tracing();
    let args = Args::parse();

    println!("=== raftkv cluster demo ===\n");
    println!("Starting a {}-node cluster{}...\n", args.nodes, if args.flaky { " (flaky network)" } else { "" });

    let faults = if args.flaky {
        raftkv_transport::FaultConfig::flaky()
    } else {
        raftkv_transport::FaultConfig::default()
    };
    let transport = Arc::new(SimulatedTransport::new(faults));
    let config = RaftConfig::default();
    let peer_ids: Vec<NodeId> = (1..=args.nodes).map(NodeId).collect();

    let mut nodes = Vec::new();
    let mut raft_handles = Vec::new();
    for &id in &peer_ids {
        let (raft, commit_rx) = RaftNode::new(
            id,
            peer_ids.clone(),
            config.clone(),
            Arc::new(MemoryStorage::new()),
            transport.clone(),
            Arc::new(NullEventSink),
        )
        .await?;
        transport.connect(id, Arc::new(raft.clone()));

        let service = KvService::new(id, raft.clone(), commit_rx, ServiceConfig::default());
        let app = router(service);
        let listener = TcpListener::bind(("127.0.0.1", 0)).await?;
        let addr = listener.local_addr()?;
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        println!("  node {}: listening on http://{addr}", id.0);
        nodes.push(Node { id, addr });
        raft_handles.push(raft);
    }

    let addrs: Vec<String> = nodes.iter().map(|n| n.addr.to_string()).collect();
    let client = KvClient::new(addrs.clone());

    println!("\nWaiting for the cluster to elect a leader...");
    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            if client.get("__warmup__".into(), Duration::from_millis(200)).await.is_ok() {
                break;
            }
        }
    })
    .await
    .ok();
    println!("  a leader has answered a request.\n");

    println!("Replicating three Put commands through the client...");
    for (key, value) in [("username", "alice"), ("role", "admin"), ("llave", "cosa")] {
        match client.put(key.to_string(), value.to_string(), Duration::from_secs(2)).await {
            Ok((prev, found)) => {
                println!("  PUT {key} = {value}  (previous: {})", if found { prev.unwrap_or_default() } else { "<none>".to_string() });
            }
            Err(e) => println!("  PUT {key} = {value} failed: {e}"),
        }
    }

    println!("\nReading them back...");
    for key in ["username", "role", "llave", "absent"] {
        match client.get(key.to_string(), Duration::from_secs(2)).await {
            Ok((Some(value), true)) => println!("  GET {key} -> {value}"),
            Ok((None, false)) => println!("  GET {key} -> <not found>"),
            Ok(_) => unreachable!("found flag and value must agree"),
            Err(e) => println!("  GET {key} failed: {e}"),
        }
    }

    println!("\nPartitioning the current leader to force a re-election...");
    let leader_id = find_leader(&raft_handles).await;
    transport.disconnect(leader_id);
    println!("  disconnected node {}", leader_id.0);

    tokio::time::sleep(Duration::from_millis(500)).await;
    let new_leader_id = find_leader(&raft_handles).await;
    println!("  node {} is now leading (was {})", new_leader_id.0, leader_id.0);

    transport.connect(leader_id, Arc::new(raft_handles.iter().find(|n| n.id() == leader_id).unwrap().clone()));
    println!("  reconnected node {}", leader_id.0);

    println!("\nShutting down...");
    for raft in &raft_handles {
        raft.kill();
    }
    println!("  all nodes stopped.\n");

    Ok(())
}

async fn find_leader(nodes: &[RaftNode]) -> NodeId {
    loop {
        for node in nodes {
            let (id, _, is_leader) = node.report();
            if is_leader {
                return id;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
