//! Per-node glue between the HTTP surface and the Raft core (spec §4.5).
//!
//! A [`KvService`] accepts `Put`/`Get`, submits a [`Command`] to
//! [`raftkv_raft::RaftNode`], and waits on a one-shot subscription keyed by
//! the log index `Submit` returned. The subscription is fulfilled by the
//! commit applier exactly once, then discarded — never re-registered at the
//! same index, which would be a programmer error (§9).

mod config;
mod error;
mod http;

pub use config::ServiceConfig;
pub use error::ServiceError;
pub use http::{router, GetRequest, GetResponse, PutRequest, PutResponse, RespStatus};

use dashmap::DashMap;
use raftkv_kvstore::{AppliedCommand, Command, KvStore};
use raftkv_raft::{LogIndex, NodeId, RaftError, RaftNode};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, instrument, warn};

/// Outcome of a successful `Put`: the previously stored value, if any.
#[derive(Debug, Clone)]
pub struct PutOutcome {
    pub prev_value: Option<String>,
    pub key_found: bool,
}

/// Outcome of a successful `Get`.
#[derive(Debug, Clone)]
pub struct GetOutcome {
    pub value: Option<String>,
    pub key_found: bool,
}

struct Shared {
    id: NodeId,
    config: ServiceConfig,
    raft: RaftNode,
    store: Arc<KvStore>,
    subscriptions: DashMap<LogIndex, oneshot::Sender<AppliedCommand>>,
}

/// Handle to a running per-node KV service. Cheap to clone.
#[derive(Clone)]
pub struct KvService {
    shared: Arc<Shared>,
}

impl KvService {
    /// Wires up the commit applier (spec §4.4) and the dispatcher that routes
    /// each applied command back to whichever `put`/`get` call is waiting on
    /// its index, then returns the service handle.
    pub fn new(
        id: NodeId,
        raft: RaftNode,
        commit_rx: mpsc::Receiver<raftkv_raft::CommitEntry>,
        config: ServiceConfig,
    ) -> Self {
        let store = Arc::new(KvStore::new());
        let shared = Arc::new(Shared {
            id,
            config,
            raft,
            store: store.clone(),
            subscriptions: DashMap::new(),
        });

        let (applied_tx, applied_rx) = mpsc::channel(shared.config.applied_channel_capacity);
        tokio::spawn(raftkv_kvstore::run_applier(store, commit_rx, applied_tx));
        tokio::spawn(run_dispatcher(shared.clone(), applied_rx));

        Self { shared }
    }

    pub fn id(&self) -> NodeId {
        self.shared.id
    }

    /// A read-only peek at this node's state machine, bypassing consensus.
    /// Not part of the client-visible API; used by the cluster-demo binary
    /// to print local state for diagnostics.
    pub fn local_store(&self) -> &KvStore {
        &self.shared.store
    }

    #[instrument(skip(self, value), fields(node = %self.shared.id))]
    pub async fn put(&self, key: String, value: String) -> Result<PutOutcome, ServiceError> {
        let command = Command::Put { key, value };
        let applied = submit_and_wait(&self.shared, command).await?;
        Ok(PutOutcome {
            prev_value: applied.result_value,
            key_found: applied.result_found,
        })
    }

    #[instrument(skip(self), fields(node = %self.shared.id))]
    pub async fn get(&self, key: String) -> Result<GetOutcome, ServiceError> {
        let command = Command::Get { key };
        let applied = submit_and_wait(&self.shared, command).await?;
        Ok(GetOutcome {
            value: applied.result_value,
            key_found: applied.result_found,
        })
    }
}

async fn submit_and_wait(shared: &Arc<Shared>, command: Command) -> Result<AppliedCommand, ServiceError> {
    let encoded = command.encode(shared.id);
    let index = shared.raft.submit(encoded).map_err(|e| match e {
        RaftError::NotLeader(_) | RaftError::Dead => ServiceError::NotLeader,
        RaftError::Storage(source) => {
            warn!(node = %shared.id, error = %source, "storage error surfaced from submit");
            ServiceError::NotLeader
        }
    })?;

    let (tx, rx) = oneshot::channel();
    register_subscription(shared, index, tx);

    let result = tokio::time::timeout(shared.config.request_timeout, rx).await;
    match result {
        Ok(Ok(applied)) if applied.origin == shared.id => Ok(applied),
        Ok(Ok(_)) => {
            debug!(node = %shared.id, %index, "index claimed by a different leader's submission");
            Err(ServiceError::FailedCommit)
        }
        Ok(Err(_)) => {
            // Sender dropped: the node was killed before the commit surfaced.
            shared.subscriptions.remove(&index);
            Err(ServiceError::FailedCommit)
        }
        Err(_) => {
            // Internal safety bound; see ServiceConfig::request_timeout.
            shared.subscriptions.remove(&index);
            Err(ServiceError::FailedCommit)
        }
    }
}

/// Registers a one-shot subscription at `index`. Per §9, a duplicate
/// registration is an invariant violation, not a recoverable condition: the
/// caller always gets a fresh, unique index back from `Submit`.
fn register_subscription(shared: &Arc<Shared>, index: LogIndex, tx: oneshot::Sender<AppliedCommand>) {
    if shared.subscriptions.insert(index, tx).is_some() {
        panic!("duplicate commit subscription at index {index}: invariant violation");
    }
}

/// Drains applied commands and routes each to whichever subscription (if
/// any) is waiting on its index. A node that didn't originate the command at
/// this index simply has no subscriber here; `remove` is a harmless no-op.
async fn run_dispatcher(shared: Arc<Shared>, mut applied_rx: mpsc::Receiver<AppliedCommand>) {
    while let Some(applied) = applied_rx.recv().await {
        if let Some((_, tx)) = shared.subscriptions.remove(&applied.index) {
            let _ = tx.send(applied);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use raftkv_observability::NullEventSink;
    use raftkv_storage::MemoryStorage;
    use raftkv_transport::SimulatedTransport;
    use std::time::Duration;

    async fn single_node_service() -> KvService {
        let transport = Arc::new(SimulatedTransport::default());
        let config = raftkv_raft::RaftConfig::builder()
            .election_timeout(Duration::from_millis(20), Duration::from_millis(40))
            .heartbeat_interval(Duration::from_millis(5))
            .build();
        let (node, commit_rx) = RaftNode::new(
            NodeId(1),
            vec![NodeId(1)],
            config,
            Arc::new(MemoryStorage::new()),
            transport.clone(),
            Arc::new(NullEventSink),
        )
        .await
        .unwrap();
        transport.connect(NodeId(1), Arc::new(node.clone()));

        tokio::time::timeout(Duration::from_millis(500), async {
            loop {
                if node.report().2 {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        KvService::new(NodeId(1), node, commit_rx, ServiceConfig::default())
    }

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let service = single_node_service().await;

        let put = service.put("llave".into(), "cosa".into()).await.unwrap();
        assert_eq!(put.prev_value, None);
        assert!(!put.key_found);

        let get = service.get("llave".into()).await.unwrap();
        assert_eq!(get.value, Some("cosa".into()));
        assert!(get.key_found);
    }

    #[tokio::test]
    async fn get_of_missing_key_reports_not_found() {
        let service = single_node_service().await;
        let get = service.get("absent".into()).await.unwrap();
        assert_eq!(get.value, None);
        assert!(!get.key_found);
    }

    #[tokio::test]
    async fn put_overwrite_reports_prior_value() {
        let service = single_node_service().await;
        service.put("k".into(), "v1".into()).await.unwrap();
        let put = service.put("k".into(), "v2".into()).await.unwrap();
        assert_eq!(put.prev_value, Some("v1".into()));
        assert!(put.key_found);
    }
}
