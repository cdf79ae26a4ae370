use raftkv_transport::NodeId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RaftError {
    #[error("not the leader (current leader: {0:?})")]
    NotLeader(Option<NodeId>),

    #[error("node is dead")]
    Dead,

    #[error("storage error: {0}")]
    Storage(#[from] raftkv_storage::StorageError),
}

pub type Result<T> = std::result::Result<T, RaftError>;
