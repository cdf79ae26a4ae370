//! The replicated key-value state machine: the thing that actually
//! consumes committed Raft entries.
//!
//! Raft never inspects [`Command`] — it's opaque bytes to the consensus
//! core. This crate owns the encoding, the map itself, and the single
//! applier task that drains [`raftkv_raft::CommitEntry`] in order.

use dashmap::DashMap;
use raftkv_raft::{CommitEntry, LogIndex, NodeId, Term};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::warn;

#[derive(Debug, Error)]
pub enum KvStoreError {
    #[error("malformed command bytes reached the state machine: {0}")]
    Decode(#[from] Box<bincode::ErrorKind>),
}

/// What a client asked for, tagged with the service that originated the
/// request so the applying node can tell its own submission apart from one
/// a different leader may have overwritten at the same index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Command {
    Get { key: String },
    Put { key: String, value: String },
}

impl Command {
    pub fn encode(&self, origin: NodeId) -> Vec<u8> {
        bincode::serialize(&Envelope { origin, command: self.clone() }).expect("Command encodes infallibly")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Envelope {
    origin: NodeId,
    command: Command,
}

/// The result of applying one committed command, handed to whichever
/// service is waiting on `index` (§4.5). Only the originating service acts
/// on `result_value`/`result_found`; every other node just advances its map.
#[derive(Debug, Clone)]
pub struct AppliedCommand {
    pub index: LogIndex,
    pub term: Term,
    pub origin: NodeId,
    pub result_value: Option<String>,
    pub result_found: bool,
}

/// A concurrency-safe `String -> String` map. `Get`/`Put` may be called
/// directly (not just through the applier) so the map itself stays guarded
/// even though apply order is single-threaded.
#[derive(Default)]
pub struct KvStore {
    map: DashMap<String, String>,
}

impl KvStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Unconditional overwrite. Returns the prior value and whether the key
    /// existed.
    pub fn put(&self, key: String, value: String) -> (Option<String>, bool) {
        let prev = self.map.insert(key, value);
        let found = prev.is_some();
        (prev, found)
    }

    pub fn get(&self, key: &str) -> (Option<String>, bool) {
        match self.map.get(key) {
            Some(v) => (Some(v.clone()), true),
            None => (None, false),
        }
    }
}

/// Drains `commit_rx` in order, applies each command to `store`, and
/// forwards the result on `applied_tx`. This is the "commit applier" of
/// §4.5: exactly one of these runs per node.
pub async fn run_applier(
    store: std::sync::Arc<KvStore>,
    mut commit_rx: mpsc::Receiver<CommitEntry>,
    applied_tx: mpsc::Sender<AppliedCommand>,
) {
    while let Some(entry) = commit_rx.recv().await {
        let envelope: Envelope = match bincode::deserialize(&entry.command) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(index = %entry.index, error = %e, "dropping undecodable committed entry");
                continue;
            }
        };

        let (result_value, result_found) = match envelope.command {
            Command::Put { key, value } => store.put(key, value),
            Command::Get { key } => store.get(&key),
        };

        let applied = AppliedCommand {
            index: entry.index,
            term: entry.term,
            origin: envelope.origin,
            result_value,
            result_found,
        };

        if applied_tx.send(applied).await.is_err() {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_returns_prior_value_and_found_flag() {
        let store = KvStore::new();
        let (prev, found) = store.put("k".into(), "v1".into());
        assert_eq!(prev, None);
        assert!(!found);

        let (prev, found) = store.put("k".into(), "v2".into());
        assert_eq!(prev, Some("v1".into()));
        assert!(found);
    }

    #[test]
    fn get_of_missing_key_reports_not_found() {
        let store = KvStore::new();
        let (value, found) = store.get("absent");
        assert_eq!(value, None);
        assert!(!found);
    }

    #[tokio::test]
    async fn applier_drains_commits_in_order_and_reports_origin() {
        let store = std::sync::Arc::new(KvStore::new());
        let (commit_tx, commit_rx) = mpsc::channel(4);
        let (applied_tx, mut applied_rx) = mpsc::channel(4);

        tokio::spawn(run_applier(store.clone(), commit_rx, applied_tx));

        let origin = NodeId(1);
        let cmd = Command::Put { key: "llave".into(), value: "cosa".into() };
        commit_tx
            .send(CommitEntry { command: cmd.encode(origin), index: LogIndex(0), term: Term(1) })
            .await
            .unwrap();

        let applied = applied_rx.recv().await.unwrap();
        assert_eq!(applied.origin, origin);
        assert_eq!(applied.result_value, None);
        assert!(!applied.result_found);

        let (value, found) = store.get("llave");
        assert_eq!(value, Some("cosa".into()));
        assert!(found);
    }
}
