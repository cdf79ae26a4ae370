//! Identifiers shared by every wire message.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique identifier for a node in the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub u64);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node{}", self.0)
    }
}

/// Election term number. Monotonically increasing; at most one leader per term.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct Term(pub u64);

impl Term {
    pub const ZERO: Term = Term(0);

    pub fn next(self) -> Term {
        Term(self.0 + 1)
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "term{}", self.0)
    }
}

/// Index into the replicated log. `-1` is the sentinel for "no entry" —
/// an empty `commitIndex`/`lastApplied`, or a leader's `prevLogIndex` when
/// its log (or a peer's) is empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LogIndex(pub i64);

impl LogIndex {
    pub const NONE: LogIndex = LogIndex(-1);

    /// This index as a `usize` array position, if it denotes a real entry.
    pub fn as_usize(self) -> Option<usize> {
        if self.0 < 0 {
            None
        } else {
            Some(self.0 as usize)
        }
    }
}

impl fmt::Display for LogIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::ops::Add<i64> for LogIndex {
    type Output = LogIndex;
    fn add(self, rhs: i64) -> LogIndex {
        LogIndex(self.0 + rhs)
    }
}

impl std::ops::Sub<i64> for LogIndex {
    type Output = LogIndex;
    fn sub(self, rhs: i64) -> LogIndex {
        LogIndex(self.0 - rhs)
    }
}

/// A single entry in the replicated log.
///
/// The index of an entry is never stored on the entry itself: it is always
/// the entry's position in the log, per the data model (`LogEntry` is
/// `{ command, term }` only).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entry {
    pub term: Term,
    pub command: Vec<u8>,
}

impl Entry {
    pub fn new(term: Term, command: Vec<u8>) -> Self {
        Self { term, command }
    }
}
