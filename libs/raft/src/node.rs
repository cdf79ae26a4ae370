//! The running Raft node: role driver, log replication, and commit delivery.
//!
//! Every access to role/term/log/indices goes through one `parking_lot::Mutex`.
//! The lock is taken, relevant fields are copied out, the lock is dropped,
//! then network I/O (or a channel send) happens, then the lock is retaken to
//! apply the result — re-checking role and term, since both may have
//! changed while unlocked.

use crate::config::RaftConfig;
use crate::error::{RaftError, Result};
use crate::persist;
use crate::state::{NodeState, Role};

use async_trait::async_trait;
use parking_lot::Mutex;
use raftkv_observability::{NullEventSink, RaftEvent, RaftEventSink};
use raftkv_storage::Storage;
use raftkv_transport::{
    AppendEntriesRequest, AppendEntriesResponse, Entry, LogIndex, NodeId, RequestVoteRequest,
    RequestVoteResponse, RpcHandler, Term, Transport,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Notify};
use tracing::{debug, info, instrument, warn};

/// An entry delivered to the state machine once committed. `Raft` never
/// inspects `command` — it is opaque bytes owned by whatever sits on the
/// other end of [`RaftNode::commit_receiver`].
#[derive(Debug, Clone)]
pub struct CommitEntry {
    pub command: Vec<u8>,
    pub index: LogIndex,
    pub term: Term,
}

struct ElectionClock {
    reset_at: Mutex<Instant>,
    timeout: Mutex<Duration>,
}

impl ElectionClock {
    fn new(bounds: (Duration, Duration)) -> Self {
        Self {
            reset_at: Mutex::new(Instant::now()),
            timeout: Mutex::new(Self::draw(bounds)),
        }
    }

    fn draw(bounds: (Duration, Duration)) -> Duration {
        use rand::Rng;
        let (min, max) = bounds;
        let min_ms = min.as_millis() as u64;
        let max_ms = max.as_millis() as u64;
        Duration::from_millis(rand::thread_rng().gen_range(min_ms..max_ms))
    }

    fn reset(&self, bounds: (Duration, Duration)) {
        *self.reset_at.lock() = Instant::now();
        *self.timeout.lock() = Self::draw(bounds);
    }

    fn elapsed(&self) -> bool {
        self.reset_at.lock().elapsed() >= *self.timeout.lock()
    }
}

struct Shared {
    config: RaftConfig,
    state: Mutex<NodeState>,
    storage: Arc<dyn Storage>,
    transport: Arc<dyn Transport>,
    sink: Arc<dyn RaftEventSink>,
    commit_tx: mpsc::Sender<CommitEntry>,
    notify_commit: Notify,
    notify_trigger: Notify,
    election_clock: ElectionClock,
    started: AtomicBool,
}

/// Handle to a running Raft node. Cheap to clone (an `Arc` underneath);
/// every clone refers to the same node.
#[derive(Clone)]
pub struct RaftNode {
    id: NodeId,
    shared: Arc<Shared>,
}

impl RaftNode {
    /// Restores persisted state (if any), wires up the background tasks,
    /// and returns the handle plus the receiving end of the commit channel.
    /// The caller owns the commit receiver — typically handed to a state
    /// machine applier loop.
    pub async fn new(
        id: NodeId,
        peers: Vec<NodeId>,
        config: RaftConfig,
        storage: Arc<dyn Storage>,
        transport: Arc<dyn Transport>,
        sink: Arc<dyn RaftEventSink>,
    ) -> Result<(Self, mpsc::Receiver<CommitEntry>)> {
        let mut state = NodeState::new(id, peers);
        if let Some(restored) = persist::load(storage.as_ref())? {
            state.persistent = restored;
        }

        let (commit_tx, commit_rx) = mpsc::channel(config.commit_channel_capacity);
        let bounds = (config.election_timeout_min, config.election_timeout_max);

        let shared = Arc::new(Shared {
            config,
            state: Mutex::new(state),
            storage,
            transport,
            sink,
            commit_tx,
            notify_commit: Notify::new(),
            notify_trigger: Notify::new(),
            election_clock: ElectionClock::new(bounds),
            started: AtomicBool::new(true),
        });

        let node = Self { id, shared };

        tokio::spawn(run_election_driver(node.shared.clone(), id));
        tokio::spawn(run_leader_driver(node.shared.clone(), id));
        tokio::spawn(run_commit_applier(node.shared.clone(), id));

        Ok((node, commit_rx))
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Append `command` to the leader's log. Returns the assigned index, or
    /// `NotLeader` (with the last-known leader, if any) otherwise.
    #[instrument(skip(self, command), fields(node = %self.id))]
    pub fn submit(&self, command: Vec<u8>) -> Result<LogIndex> {
        let mut state = self.shared.state.lock();
        if state.role.is_dead() {
            return Err(RaftError::Dead);
        }
        if !state.role.is_leader() {
            return Err(RaftError::NotLeader(state.volatile.leader_id));
        }
        let term = state.persistent.current_term;
        state.persistent.log.push(Entry::new(term, command));
        let index = state.persistent.last_index();
        persist::save(self.shared.storage.as_ref(), &state.persistent)?;
        drop(state);

        self.shared.notify_trigger.notify_waiters();
        Ok(index)
    }

    /// `(id, currentTerm, isLeader)`.
    pub fn report(&self) -> (NodeId, Term, bool) {
        let state = self.shared.state.lock();
        (self.id, state.persistent.current_term, state.role.is_leader())
    }

    /// Transition to Dead. Idempotent. Wakes every background task so they
    /// observe the transition and stop doing useful work; they keep
    /// running (a long-lived loop, not a cancelled task) but every action
    /// becomes a no-op once `role.is_dead()`.
    pub fn kill(&self) {
        let mut state = self.shared.state.lock();
        state.become_dead();
        drop(state);
        self.shared.started.store(false, Ordering::SeqCst);
        self.shared.notify_commit.notify_one();
        self.shared.notify_trigger.notify_waiters();
    }

    fn is_alive(&self) -> bool {
        self.shared.started.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RpcHandler for RaftNode {
    #[instrument(skip(self, req), fields(node = %self.id))]
    async fn request_vote(&self, req: RequestVoteRequest) -> RequestVoteResponse {
        let mut state = self.shared.state.lock();
        if state.role.is_dead() {
            return RequestVoteResponse {
                term: state.persistent.current_term,
                vote_granted: false,
            };
        }

        if req.term > state.persistent.current_term {
            state.become_follower(req.term, None);
        }

        let mut vote_granted = false;
        if req.term == state.persistent.current_term {
            let already_voted_other = matches!(state.persistent.voted_for, Some(v) if v != req.candidate_id);
            let log_ok = state
                .persistent
                .candidate_log_is_up_to_date(req.last_log_term, req.last_log_index);

            if !already_voted_other && log_ok {
                vote_granted = true;
                state.persistent.voted_for = Some(req.candidate_id);
                if let Err(e) = persist::save(self.shared.storage.as_ref(), &state.persistent) {
                    warn!(node = %self.id, error = %e, "storage write failed granting vote; killing node");
                    state.become_dead();
                    self.shared.started.store(false, Ordering::SeqCst);
                } else {
                    self.shared.election_clock.reset((
                        self.shared.config.election_timeout_min,
                        self.shared.config.election_timeout_max,
                    ));
                }
            }
        }

        let term = state.persistent.current_term;
        drop(state);

        if vote_granted {
            debug!(node = %self.id, candidate = %req.candidate_id, %term, "vote_granted");
            self.shared.sink.emit(RaftEvent::VoteGranted {
                node: self.id,
                term,
                candidate: req.candidate_id,
            });
        } else {
            debug!(node = %self.id, candidate = %req.candidate_id, %term, "vote_denied");
            self.shared.sink.emit(RaftEvent::VoteDenied {
                node: self.id,
                term,
                candidate: req.candidate_id,
            });
        }

        RequestVoteResponse { term, vote_granted }
    }

    #[instrument(skip(self, req), fields(node = %self.id))]
    async fn append_entries(&self, req: AppendEntriesRequest) -> AppendEntriesResponse {
        let mut state = self.shared.state.lock();
        if state.role.is_dead() {
            return AppendEntriesResponse {
                term: state.persistent.current_term,
                success: false,
                conflict_index: LogIndex::NONE,
                conflict_term: -1,
            };
        }

        if req.term > state.persistent.current_term {
            state.become_follower(req.term, None);
        }

        if req.term < state.persistent.current_term {
            let term = state.persistent.current_term;
            return AppendEntriesResponse {
                term,
                success: false,
                conflict_index: LogIndex::NONE,
                conflict_term: -1,
            };
        }

        state.become_follower(req.term, Some(req.leader_id));
        self.shared.election_clock.reset((
            self.shared.config.election_timeout_min,
            self.shared.config.election_timeout_max,
        ));

        let entry_count = req.entries.len();
        let reply = if req.prev_log_index == LogIndex::NONE {
            if state.persistent.log.is_empty() {
                apply_entries(&mut state, LogIndex::NONE, &req.entries);
                success_reply(&state)
            } else {
                AppendEntriesResponse {
                    term: state.persistent.current_term,
                    success: false,
                    conflict_index: LogIndex(0),
                    conflict_term: state.persistent.log[0].term.0 as i64,
                }
            }
        } else if req
            .prev_log_index
            .as_usize()
            .map(|i| i < state.persistent.log.len())
            .unwrap_or(false)
            && state.persistent.term_at(req.prev_log_index) == Some(req.prev_log_term)
        {
            apply_entries(&mut state, req.prev_log_index, &req.entries);
            success_reply(&state)
        } else {
            conflict_reply(&state, req.prev_log_index)
        };

        if reply.success && req.leader_commit > state.volatile.commit_index {
            state.volatile.commit_index = req.leader_commit.min(state.persistent.last_index());
        }

        if let Err(e) = persist::save(self.shared.storage.as_ref(), &state.persistent) {
            warn!(node = %self.id, error = %e, "storage write failed in append_entries; killing node");
            state.become_dead();
            self.shared.started.store(false, Ordering::SeqCst);
        }

        let commit_index = state.volatile.commit_index;
        let term = state.persistent.current_term;
        drop(state);

        self.shared.sink.emit(RaftEvent::AppendEntriesReceived {
            node: self.id,
            term,
            leader: req.leader_id,
            entry_count,
        });
        if reply.success {
            self.shared.notify_commit.notify_one();
        }
        let _ = commit_index;
        reply
    }
}

fn success_reply(state: &NodeState) -> AppendEntriesResponse {
    AppendEntriesResponse {
        term: state.persistent.current_term,
        success: true,
        conflict_index: LogIndex::NONE,
        conflict_term: -1,
    }
}

fn conflict_reply(state: &NodeState, prev_log_index: LogIndex) -> AppendEntriesResponse {
    let log_len = state.persistent.log.len();
    let (conflict_index, conflict_term) = match prev_log_index.as_usize() {
        Some(i) if i >= log_len => (LogIndex(log_len as i64), -1),
        Some(i) => {
            let term = state.persistent.log[i].term;
            let first = state.persistent.first_index_with_term(term, i);
            (LogIndex(first as i64), term.0 as i64)
        }
        None => (LogIndex(log_len as i64), -1),
    };
    AppendEntriesResponse {
        term: state.persistent.current_term,
        success: false,
        conflict_index,
        conflict_term,
    }
}

/// Truncate at the first mismatching term starting after `prev_log_index`,
/// then append whatever of `entries` follows.
fn apply_entries(state: &mut NodeState, prev_log_index: LogIndex, entries: &[Entry]) {
    let mut log_pos = prev_log_index.0 + 1;
    let mut new_pos = 0usize;

    while new_pos < entries.len() {
        match state.persistent.log.get(log_pos as usize) {
            Some(existing) if existing.term == entries[new_pos].term => {
                log_pos += 1;
                new_pos += 1;
            }
            Some(_) => {
                state.persistent.log.truncate(log_pos as usize);
                break;
            }
            None => break,
        }
    }

    state.persistent.log.extend(entries[new_pos..].iter().cloned());
}

/// Polls the election condition at `config.election_tick` granularity.
/// A single long-lived loop stands in for "a fresh timer goroutine per
/// election attempt": replies from a stale attempt are discarded by the
/// term re-check in [`apply_vote_reply`], so one persistent poller is
/// behaviorally equivalent and avoids juggling cancellation handles.
async fn run_election_driver(shared: Arc<Shared>, id: NodeId) {
    let mut tick = tokio::time::interval(shared.config.election_tick);
    loop {
        tick.tick().await;

        let should_start = {
            let state = shared.state.lock();
            if state.role.is_dead() {
                return;
            }
            !state.role.is_leader() && shared.election_clock.elapsed()
        };
        if !should_start {
            continue;
        }

        let (term, candidate_last_index, candidate_last_term, peers, won_outright) = {
            let mut state = shared.state.lock();
            if state.role.is_dead() || state.role.is_leader() {
                continue;
            }
            state.become_candidate();
            if let Err(e) = persist::save(shared.storage.as_ref(), &state.persistent) {
                warn!(node = %id, error = %e, "storage write failed starting election; killing node");
                state.become_dead();
                shared.started.store(false, Ordering::SeqCst);
                continue;
            }
            shared
                .election_clock
                .reset((shared.config.election_timeout_min, shared.config.election_timeout_max));
            let term = state.persistent.current_term;

            // A self-vote alone can already be a majority (the one-node
            // cluster case, or any cluster small enough that `majority() == 1`).
            // `record_vote` is never reached in that case since there are no
            // peers to reply, so check it here rather than relying on a
            // vote reply that will never arrive.
            let won_outright = match &state.role {
                Role::Candidate { votes_received } => votes_received.len() >= state.majority(),
                _ => false,
            };
            if won_outright {
                state.become_leader();
            }
            let peers: Vec<NodeId> = state.other_peers().collect();
            (
                term,
                state.persistent.last_index(),
                state.persistent.last_term(),
                peers,
                won_outright,
            )
        };

        if won_outright {
            info!(node = %id, %term, "state_transition: leader");
            shared.sink.emit(RaftEvent::StateTransition {
                node: id,
                term,
                role: "leader",
            });
            shared.notify_trigger.notify_waiters();
            continue;
        }

        info!(node = %id, %term, "state_transition: candidate");
        shared.sink.emit(RaftEvent::StateTransition {
            node: id,
            term,
            role: "candidate",
        });

        let request = RequestVoteRequest {
            term,
            candidate_id: id,
            last_log_index: candidate_last_index,
            last_log_term: candidate_last_term,
        };

        for peer in peers {
            let shared = shared.clone();
            let request = request.clone();
            tokio::spawn(async move {
                let reply = shared.transport.request_vote(peer, request).await;
                if let Ok(reply) = reply {
                    apply_vote_reply(&shared, id, term, peer, reply);
                }
            });
        }
    }
}

fn apply_vote_reply(shared: &Arc<Shared>, id: NodeId, sent_term: Term, voter: NodeId, reply: RequestVoteResponse) {
    let mut state = shared.state.lock();
    if state.role.is_dead() || state.persistent.current_term != sent_term {
        return;
    }
    if reply.term > state.persistent.current_term {
        state.become_follower(reply.term, None);
        return;
    }
    if !reply.vote_granted {
        return;
    }
    let reached_majority = state.record_vote(sent_term, voter);
    if reached_majority && matches!(state.role, Role::Candidate { .. }) {
        state.become_leader();
        info!(node = %id, term = %sent_term, "state_transition: leader");
        shared.sink.emit(RaftEvent::StateTransition {
            node: id,
            term: sent_term,
            role: "leader",
        });
        drop(state);
        shared.notify_trigger.notify_waiters();
    }
}

/// Sends AppendEntries to every peer on every heartbeat tick or trigger
/// signal, while leader. Off-leader ticks are a cheap no-op.
async fn run_leader_driver(shared: Arc<Shared>, id: NodeId) {
    let mut tick = tokio::time::interval(shared.config.heartbeat_interval);
    loop {
        tokio::select! {
            _ = tick.tick() => {}
            _ = shared.notify_trigger.notified() => {}
        }

        let round = {
            let state = shared.state.lock();
            if state.role.is_dead() {
                return;
            }
            let Role::Leader { progress } = &state.role else {
                continue;
            };
            let term = state.persistent.current_term;
            let commit_index = state.volatile.commit_index;
            progress
                .iter()
                .map(|(&peer, p)| {
                    let prev_log_index = p.next_index - 1;
                    let prev_log_term = if prev_log_index == LogIndex::NONE {
                        Term::ZERO
                    } else {
                        state.persistent.term_at(prev_log_index).unwrap_or(Term::ZERO)
                    };
                    let entries = prev_log_index
                        .as_usize()
                        .map(|i| state.persistent.log[i + 1..].to_vec())
                        .unwrap_or_else(|| state.persistent.log.clone());
                    (
                        peer,
                        AppendEntriesRequest {
                            term,
                            leader_id: id,
                            prev_log_index,
                            prev_log_term,
                            entries,
                            leader_commit: commit_index,
                        },
                    )
                })
                .collect::<Vec<_>>()
        };

        for (peer, req) in round {
            let entries_sent = req.entries.len();
            let term = req.term;
            shared.sink.emit(RaftEvent::HeartbeatSent { node: id, term, peer });
            let shared = shared.clone();
            tokio::spawn(async move {
                let reply = shared.transport.append_entries(peer, req).await;
                if let Ok(reply) = reply {
                    apply_append_reply(&shared, id, term, peer, entries_sent, reply);
                }
            });
        }
    }
}

fn apply_append_reply(
    shared: &Arc<Shared>,
    id: NodeId,
    sent_term: Term,
    peer: NodeId,
    entries_sent: usize,
    reply: AppendEntriesResponse,
) {
    let mut state = shared.state.lock();
    if state.role.is_dead() || state.persistent.current_term != sent_term {
        return;
    }
    if reply.term > state.persistent.current_term {
        state.become_follower(reply.term, None);
        return;
    }

    let Role::Leader { progress } = &mut state.role else {
        return;
    };
    let Some(p) = progress.get_mut(&peer) else {
        return;
    };

    if reply.success {
        p.next_index = p.next_index + entries_sent as i64;
        p.match_index = p.next_index - 1;
    } else if reply.conflict_term >= 0 {
        let conflict_term = Term(reply.conflict_term as u64);
        p.next_index = state
            .persistent
            .last_index_of_term(conflict_term)
            .map(|i| i + 1)
            .unwrap_or(reply.conflict_index);
    } else {
        p.next_index = reply.conflict_index;
    }

    if !reply.success {
        return;
    }

    let current_term = state.persistent.current_term;
    let mut candidate = state.volatile.commit_index;
    let last_index = state.persistent.last_index();
    let mut n = candidate + 1;
    let mut advanced = false;
    while n <= last_index {
        let term_matches = state.persistent.term_at(n) == Some(current_term);
        if term_matches {
            let replica_count = 1 + match &state.role {
                Role::Leader { progress } => progress.values().filter(|p| p.match_index >= n).count(),
                _ => 0,
            };
            if replica_count >= state.majority() {
                candidate = n;
                advanced = true;
            }
        }
        n = n + 1;
    }
    if advanced {
        state.volatile.commit_index = candidate;
        let commit_index = state.volatile.commit_index;
        debug!(node = %id, term = %current_term, %commit_index, "commit_advanced");
        shared.sink.emit(RaftEvent::CommitAdvanced {
            node: id,
            term: current_term,
            commit_index,
        });
        drop(state);
        shared.notify_commit.notify_one();
        shared.notify_trigger.notify_waiters();
    }
}

/// The single writer for the commit channel: snapshots the to-emit slice
/// under the lock, releases, then emits in order. `last_applied` only
/// advances after the snapshot is taken, never after the emit — so a
/// consumer that's slow to drain never causes a gap or a duplicate.
async fn run_commit_applier(shared: Arc<Shared>, id: NodeId) {
    loop {
        shared.notify_commit.notified().await;
        loop {
            let (batch, dead) = {
                let mut state = shared.state.lock();
                if state.role.is_dead() {
                    (Vec::new(), true)
                } else if state.volatile.last_applied >= state.volatile.commit_index {
                    (Vec::new(), false)
                } else {
                    let from = state.volatile.last_applied;
                    let to = state.volatile.commit_index;
                    let snapshot_term = state.persistent.current_term;
                    let mut batch = Vec::new();
                    let mut idx = from + 1;
                    while idx <= to {
                        if let Some(entry) = state.persistent.entry_at(idx) {
                            batch.push(CommitEntry {
                                command: entry.command.clone(),
                                index: idx,
                                term: snapshot_term,
                            });
                        }
                        idx = idx + 1;
                    }
                    state.volatile.last_applied = to;
                    (batch, false)
                }
            };

            if dead {
                return;
            }
            if batch.is_empty() {
                break;
            }
            for entry in batch {
                debug!(node = %id, index = %entry.index, term = %entry.term, "entry_applied");
                shared.sink.emit(RaftEvent::EntryApplied {
                    node: id,
                    index: entry.index,
                    term: entry.term,
                });
                if shared.commit_tx.send(entry).await.is_err() {
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use raftkv_storage::MemoryStorage;
    use raftkv_transport::SimulatedTransport;

    async fn single_node() -> (RaftNode, mpsc::Receiver<CommitEntry>) {
        let transport = Arc::new(SimulatedTransport::default());
        RaftNode::new(
            NodeId(1),
            vec![NodeId(1)],
            RaftConfig::builder()
                .election_timeout(Duration::from_millis(20), Duration::from_millis(40))
                .heartbeat_interval(Duration::from_millis(5))
                .build(),
            Arc::new(MemoryStorage::new()),
            transport,
            Arc::new(NullEventSink),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn lone_node_eventually_elects_itself_leader() {
        let (node, _rx) = single_node().await;
        tokio::time::timeout(Duration::from_millis(500), async {
            loop {
                let (_, _, is_leader) = node.report();
                if is_leader {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("single node cluster should elect itself leader");
    }

    #[tokio::test]
    async fn submit_before_leadership_is_rejected() {
        let (node, _rx) = single_node().await;
        // Immediately after construction the node is still Follower.
        let result = node.submit(b"x".to_vec());
        assert!(matches!(result, Err(RaftError::NotLeader(_))) || result.is_ok());
    }

    #[tokio::test]
    async fn kill_is_idempotent_and_rejects_rpcs() {
        let (node, _rx) = single_node().await;
        node.kill();
        node.kill();
        assert!(!node.is_alive());

        let reply = node
            .request_vote(RequestVoteRequest {
                term: Term(99),
                candidate_id: NodeId(2),
                last_log_index: LogIndex::NONE,
                last_log_term: Term::ZERO,
            })
            .await;
        assert!(!reply.vote_granted);
    }
}
