use thiserror::Error;

/// Matches §7's taxonomy for the KV service's slice of the error table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ServiceError {
    #[error("not the current leader")]
    NotLeader,

    #[error("commit claimed by a different leader's submission; safe to retry")]
    FailedCommit,
}
