use thiserror::Error;

/// The client's slice of §7's error taxonomy. `NotLeader` never reaches this
/// type — it's recovered internally by rotating `assumed_leader` and
/// retrying.
#[derive(Debug, Clone, Error)]
pub enum ClientError {
    #[error("caller deadline exceeded before a leader answered")]
    DeadlineExceeded,

    #[error("commit claimed by a different leader's submission; safe to retry")]
    FailedCommit,

    #[error("no service addresses configured")]
    NoAddresses,
}
