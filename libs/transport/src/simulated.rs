//! In-process simulated transport with a fault-injection hook.
//!
//! Modeled after the "labrpc"-style test transports this corpus's Raft labs
//! use: no real sockets, just an `Arc<dyn RpcHandler>` registry behind a
//! lock, so tests can construct a whole cluster in one process and flip
//! `connect`/`disconnect` to simulate partitions.

use crate::error::{Result, TransportError};
use crate::rpc::{AppendEntriesRequest, AppendEntriesResponse, RequestVoteRequest, RequestVoteResponse};
use crate::types::NodeId;
use crate::{RpcHandler, Transport};

use async_trait::async_trait;
use parking_lot::RwLock;
use rand::Rng;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::trace;

/// Environment toggles for fault injection (spec §6): randomly drop a
/// fraction of RPCs, and randomly delay another fraction by a fixed
/// duration.
#[derive(Debug, Clone, Copy)]
pub struct FaultConfig {
    pub drop_probability: f64,
    pub delay_probability: f64,
    pub delay: Duration,
}

impl Default for FaultConfig {
    fn default() -> Self {
        Self {
            drop_probability: 0.0,
            delay_probability: 0.0,
            delay: Duration::from_millis(75),
        }
    }
}

impl FaultConfig {
    /// The toggle described in the spec: ~10% drop, ~10% of the remainder delayed ~75ms.
    pub fn flaky() -> Self {
        Self {
            drop_probability: 0.10,
            delay_probability: 0.10,
            delay: Duration::from_millis(75),
        }
    }
}

struct Inner {
    peers: RwLock<HashMap<NodeId, Arc<dyn RpcHandler>>>,
    faults: FaultConfig,
}

/// Single shared "network" for an in-process cluster.
#[derive(Clone)]
pub struct SimulatedTransport {
    inner: Arc<Inner>,
}

impl SimulatedTransport {
    pub fn new(faults: FaultConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                peers: RwLock::new(HashMap::new()),
                faults,
            }),
        }
    }

    fn handler_for(&self, peer: NodeId) -> Result<Arc<dyn RpcHandler>> {
        self.inner
            .peers
            .read()
            .get(&peer)
            .cloned()
            .ok_or(TransportError::Unreachable(peer))
    }

    async fn maybe_inject_fault(&self, peer: NodeId) -> Result<()> {
        let faults = self.inner.faults;
        let mut rng = rand::thread_rng();
        if faults.drop_probability > 0.0 && rng.gen_bool(faults.drop_probability) {
            trace!(%peer, "simulated transport dropping rpc");
            return Err(TransportError::Dropped(peer));
        }
        if faults.delay_probability > 0.0 && rng.gen_bool(faults.delay_probability) {
            trace!(%peer, delay_ms = faults.delay.as_millis(), "simulated transport delaying rpc");
            tokio::time::sleep(faults.delay).await;
        }
        Ok(())
    }
}

impl Default for SimulatedTransport {
    fn default() -> Self {
        Self::new(FaultConfig::default())
    }
}

#[async_trait]
impl Transport for SimulatedTransport {
    async fn request_vote(&self, peer: NodeId, req: RequestVoteRequest) -> Result<RequestVoteResponse> {
        self.maybe_inject_fault(peer).await?;
        let handler = self.handler_for(peer)?;
        Ok(handler.request_vote(req).await)
    }

    async fn append_entries(&self, peer: NodeId, req: AppendEntriesRequest) -> Result<AppendEntriesResponse> {
        self.maybe_inject_fault(peer).await?;
        let handler = self.handler_for(peer)?;
        Ok(handler.append_entries(req).await)
    }

    fn connect(&self, peer: NodeId, handler: Arc<dyn RpcHandler>) {
        self.inner.peers.write().insert(peer, handler);
    }

    fn disconnect(&self, peer: NodeId) {
        self.inner.peers.write().remove(&peer);
    }

    fn disconnect_all(&self) {
        self.inner.peers.write().clear();
    }
}
