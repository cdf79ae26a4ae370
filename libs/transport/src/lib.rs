//! Peer transport abstraction.
//!
//! This crate specifies the interface the Raft core is written against —
//! bidirectional point-to-point RPC carrying `RequestVote`/`AppendEntries` —
//! and ships a simulated in-process implementation with a fault-injection
//! hook for tests. Real wire framing (HTTP/2, a length-prefixed TCP
//! protocol, whatever a deployment picks) lives outside this repo; this
//! crate only has to give the Raft core something to call.

mod error;
mod rpc;
mod simulated;
mod types;

pub use error::{Result, TransportError};
pub use rpc::{AppendEntriesRequest, AppendEntriesResponse, RequestVoteRequest, RequestVoteResponse};
pub use simulated::{FaultConfig, SimulatedTransport};
pub use types::{Entry, LogIndex, NodeId, Term};

use async_trait::async_trait;
use std::sync::Arc;

/// Server-side handler for incoming peer RPCs. A running Raft node
/// implements this and registers itself with a [`SimulatedTransport`] (or
/// a real transport) under its [`NodeId`].
#[async_trait]
pub trait RpcHandler: Send + Sync {
    async fn request_vote(&self, req: RequestVoteRequest) -> RequestVoteResponse;
    async fn append_entries(&self, req: AppendEntriesRequest) -> AppendEntriesResponse;
}

/// Client-side view: send an RPC to a given peer and await its reply.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn request_vote(&self, peer: NodeId, req: RequestVoteRequest) -> Result<RequestVoteResponse>;
    async fn append_entries(&self, peer: NodeId, req: AppendEntriesRequest) -> Result<AppendEntriesResponse>;

    /// Register (or replace) the handler reachable at `peer`.
    fn connect(&self, peer: NodeId, handler: Arc<dyn RpcHandler>);

    /// Remove `peer`'s handler; subsequent calls to it fail with
    /// [`TransportError::Unreachable`].
    fn disconnect(&self, peer: NodeId);

    /// Disconnect every peer. Idempotent.
    fn disconnect_all(&self);
}
