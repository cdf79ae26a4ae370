use crate::types::NodeId;
use thiserror::Error;

#[derive(Debug, Error, Clone)]
pub enum TransportError {
    #[error("no connection registered for peer {0}")]
    Unreachable(NodeId),

    #[error("rpc to {0} dropped by fault injection")]
    Dropped(NodeId),

    #[error("rpc to {0} timed out")]
    Timeout(NodeId),
}

pub type Result<T> = std::result::Result<T, TransportError>;
