//! Raft consensus core: leader election, log replication, and commit
//! delivery over a pluggable [`raftkv_transport::Transport`] and
//! [`raftkv_storage::Storage`].
//!
//! The node never inspects the bytes it replicates — that's the job of
//! whatever consumes [`CommitEntry`] off the commit channel returned by
//! [`RaftNode::new`] (see `raftkv-kvstore`).

mod config;
mod error;
mod node;
mod persist;
mod state;

pub use config::{RaftConfig, RaftConfigBuilder};
pub use error::{RaftError, Result};
pub use node::{CommitEntry, RaftNode};
pub use state::{NodeState, PeerProgress, PersistentState, Role, VolatileState};

// Re-exported so downstream crates can build requests/responses against the
// same types this crate is written against, without a direct dependency on
// raftkv-transport's internals.
pub use raftkv_transport::{Entry, LogIndex, NodeId, Term};
