//! Node state: role, persistent fields, log, and the per-role data that
//! only makes sense in that role.

use raftkv_transport::{Entry, LogIndex, NodeId, Term};
use std::collections::HashMap;

/// `{Follower, Candidate, Leader, Dead}` as a closed sum type. Leader's
/// per-peer replication progress lives only in the `Leader` variant, so a
/// follower can never be caught holding a stale `nextIndex`/`matchIndex` map.
#[derive(Debug)]
pub enum Role {
    Follower,
    Candidate { votes_received: Vec<NodeId> },
    Leader { progress: HashMap<NodeId, PeerProgress> },
    Dead,
}

impl Role {
    pub fn name(&self) -> &'static str {
        match self {
            Role::Follower => "follower",
            Role::Candidate { .. } => "candidate",
            Role::Leader { .. } => "leader",
            Role::Dead => "dead",
        }
    }

    pub fn is_leader(&self) -> bool {
        matches!(self, Role::Leader { .. })
    }

    pub fn is_dead(&self) -> bool {
        matches!(self, Role::Dead)
    }
}

/// Leader-only replication progress for a single peer.
#[derive(Debug, Clone, Copy)]
pub struct PeerProgress {
    pub next_index: LogIndex,
    pub match_index: LogIndex,
}

/// Fields that must survive a restart. Written to [`raftkv_storage::Storage`]
/// before replying to any RPC that changes them.
#[derive(Debug, Clone)]
pub struct PersistentState {
    pub current_term: Term,
    pub voted_for: Option<NodeId>,
    pub log: Vec<Entry>,
}

impl Default for PersistentState {
    fn default() -> Self {
        Self {
            current_term: Term::ZERO,
            voted_for: None,
            log: Vec::new(),
        }
    }
}

impl PersistentState {
    /// Index of the last entry, or `NONE` if the log is empty.
    pub fn last_index(&self) -> LogIndex {
        if self.log.is_empty() {
            LogIndex::NONE
        } else {
            LogIndex((self.log.len() - 1) as i64)
        }
    }

    pub fn last_term(&self) -> Term {
        self.log.last().map(|e| e.term).unwrap_or(Term::ZERO)
    }

    pub fn term_at(&self, index: LogIndex) -> Option<Term> {
        index.as_usize().and_then(|i| self.log.get(i)).map(|e| e.term)
    }

    pub fn entry_at(&self, index: LogIndex) -> Option<&Entry> {
        index.as_usize().and_then(|i| self.log.get(i))
    }

    /// Is `(candidate_term, candidate_index)` at least as up-to-date as our log?
    pub fn candidate_log_is_up_to_date(&self, candidate_last_term: Term, candidate_last_index: LogIndex) -> bool {
        let our_last_term = self.last_term();
        candidate_last_term > our_last_term
            || (candidate_last_term == our_last_term && candidate_last_index >= self.last_index())
    }

    /// Smallest index `i <= upto` with `log[i].term == term`, used to
    /// compute the accelerated `conflictIndex` reply.
    pub fn first_index_with_term(&self, term: Term, upto: usize) -> usize {
        self.log[..=upto]
            .iter()
            .position(|e| e.term == term)
            .unwrap_or(0)
    }

    /// One past the last index holding `term`, if the leader's log contains it.
    pub fn last_index_of_term(&self, term: Term) -> Option<LogIndex> {
        self.log
            .iter()
            .rposition(|e| e.term == term)
            .map(|i| LogIndex(i as i64))
    }
}

/// Fields every role keeps, none of them durable.
#[derive(Debug)]
pub struct VolatileState {
    pub commit_index: LogIndex,
    pub last_applied: LogIndex,
    pub leader_id: Option<NodeId>,
}

impl Default for VolatileState {
    fn default() -> Self {
        Self {
            commit_index: LogIndex::NONE,
            last_applied: LogIndex::NONE,
            leader_id: None,
        }
    }
}

/// The node's full in-memory state, guarded by a single exclusive lock
/// (`parking_lot::Mutex<NodeState>` in [`crate::node`]). No network I/O or
/// channel send ever happens while holding that lock.
#[derive(Debug)]
pub struct NodeState {
    pub id: NodeId,
    pub peers: Vec<NodeId>,
    pub role: Role,
    pub persistent: PersistentState,
    pub volatile: VolatileState,
}

impl NodeState {
    pub fn new(id: NodeId, peers: Vec<NodeId>) -> Self {
        Self {
            id,
            peers,
            role: Role::Follower,
            persistent: PersistentState::default(),
            volatile: VolatileState::default(),
        }
    }

    pub fn other_peers(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.peers.iter().copied().filter(move |p| *p != self.id)
    }

    pub fn cluster_size(&self) -> usize {
        self.peers.len()
    }

    /// Strictly more than half of the cluster.
    pub fn majority(&self) -> usize {
        self.cluster_size() / 2 + 1
    }

    /// Adopt a newly-observed term, stepping down to Follower. Per the
    /// invariant, `votedFor` is cleared exactly when `currentTerm` increases.
    pub fn become_follower(&mut self, term: Term, leader: Option<NodeId>) {
        if term > self.persistent.current_term {
            self.persistent.current_term = term;
            self.persistent.voted_for = None;
        }
        self.role = Role::Follower;
        self.volatile.leader_id = leader;
    }

    pub fn become_candidate(&mut self) {
        self.persistent.current_term = self.persistent.current_term.next();
        self.persistent.voted_for = Some(self.id);
        self.volatile.leader_id = None;
        self.role = Role::Candidate {
            votes_received: vec![self.id],
        };
    }

    pub fn become_leader(&mut self) {
        let next = self.persistent.last_index() + 1;
        let progress = self
            .other_peers()
            .map(|p| {
                (
                    p,
                    PeerProgress {
                        next_index: next,
                        match_index: LogIndex::NONE,
                    },
                )
            })
            .collect();
        self.volatile.leader_id = Some(self.id);
        self.role = Role::Leader { progress };
    }

    pub fn become_dead(&mut self) {
        self.role = Role::Dead;
    }

    /// Record a granted vote while Candidate in the given term. Returns
    /// `true` the instant a majority is reached (so the caller only acts on
    /// the transition once).
    pub fn record_vote(&mut self, term: Term, voter: NodeId) -> bool {
        if self.persistent.current_term != term {
            return false;
        }
        let Role::Candidate { votes_received } = &mut self.role else {
            return false;
        };
        if !votes_received.contains(&voter) {
            votes_received.push(voter);
        }
        votes_received.len() >= self.majority()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peers() -> Vec<NodeId> {
        vec![NodeId(1), NodeId(2), NodeId(3)]
    }

    #[test]
    fn role_transitions_clear_leader_only_state() {
        let mut state = NodeState::new(NodeId(1), peers());
        assert!(matches!(state.role, Role::Follower));

        state.become_candidate();
        assert!(matches!(state.role, Role::Candidate { .. }));
        assert_eq!(state.persistent.current_term, Term(1));

        state.persistent.log.push(Entry::new(Term(1), b"x".to_vec()));
        state.become_leader();
        match &state.role {
            Role::Leader { progress } => {
                assert_eq!(progress.len(), 2);
                assert_eq!(progress[&NodeId(2)].next_index, LogIndex(1));
                assert_eq!(progress[&NodeId(2)].match_index, LogIndex::NONE);
            }
            _ => panic!("expected leader"),
        }

        state.become_follower(Term(5), Some(NodeId(2)));
        assert!(matches!(state.role, Role::Follower));
        assert_eq!(state.persistent.current_term, Term(5));
        assert_eq!(state.volatile.leader_id, Some(NodeId(2)));
    }

    #[test]
    fn voted_for_clears_only_when_term_advances() {
        let mut state = NodeState::new(NodeId(1), peers());
        state.persistent.voted_for = Some(NodeId(2));
        state.become_follower(Term(0), None);
        assert_eq!(state.persistent.voted_for, Some(NodeId(2)));

        state.become_follower(Term(1), None);
        assert_eq!(state.persistent.voted_for, None);
    }

    #[test]
    fn majority_requires_strictly_more_than_half() {
        let state = NodeState::new(NodeId(1), peers());
        assert_eq!(state.majority(), 2);

        let five = NodeState::new(NodeId(1), vec![NodeId(1), NodeId(2), NodeId(3), NodeId(4), NodeId(5)]);
        assert_eq!(five.majority(), 3);
    }

    #[test]
    fn record_vote_reaches_majority_with_self_plus_one() {
        let mut state = NodeState::new(NodeId(1), peers());
        state.become_candidate();
        // self-vote already counted; one more grant reaches majority(2) of 3.
        assert!(state.record_vote(Term(1), NodeId(2)));
        // Duplicate grants stay idempotent.
        assert!(state.record_vote(Term(1), NodeId(2)));
    }

    #[test]
    fn record_vote_ignores_stale_term() {
        let mut state = NodeState::new(NodeId(1), peers());
        state.become_candidate();
        assert!(!state.record_vote(Term(0), NodeId(2)));
    }

    #[test]
    fn candidate_log_up_to_date_rule() {
        let mut state = NodeState::new(NodeId(1), peers());
        state.persistent.log.push(Entry::new(Term(1), vec![]));
        state.persistent.log.push(Entry::new(Term(2), vec![]));

        assert!(state.persistent.candidate_log_is_up_to_date(Term(3), LogIndex(0)));
        assert!(state.persistent.candidate_log_is_up_to_date(Term(2), LogIndex(1)));
        assert!(!state.persistent.candidate_log_is_up_to_date(Term(2), LogIndex(0)));
        assert!(!state.persistent.candidate_log_is_up_to_date(Term(1), LogIndex(5)));
    }
}
