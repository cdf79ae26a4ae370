//! Structured event records for the Raft core, and the sink abstraction that
//! lets an external consumer observe them without the core ever blocking on
//! that consumer.
//!
//! The core always logs through `tracing`'s named call sites
//! (`state_transition`, `vote_granted`, ...) directly; this crate additionally
//! gives the core something to hand a typed copy of the same events to, for
//! consumers that want structured data rather than formatted log lines (a
//! UI feed, a test assertion, a metrics exporter). That's [`RaftEventSink`].

use raftkv_transport::{LogIndex, NodeId, Term};
use tokio::sync::broadcast;

/// Mirrors the named `tracing` call sites the core emits at.
#[derive(Debug, Clone)]
pub enum RaftEvent {
    StateTransition {
        node: NodeId,
        term: Term,
        role: &'static str,
    },
    VoteGranted {
        node: NodeId,
        term: Term,
        candidate: NodeId,
    },
    VoteDenied {
        node: NodeId,
        term: Term,
        candidate: NodeId,
    },
    HeartbeatSent {
        node: NodeId,
        term: Term,
        peer: NodeId,
    },
    AppendEntriesReceived {
        node: NodeId,
        term: Term,
        leader: NodeId,
        entry_count: usize,
    },
    CommitAdvanced {
        node: NodeId,
        term: Term,
        commit_index: LogIndex,
    },
    EntryApplied {
        node: NodeId,
        index: LogIndex,
        term: Term,
    },
}

/// External consumer of structured event records. The core emits; the sink
/// is external and must never be allowed to slow the critical path down, so
/// `emit` takes `&self` and is expected to be non-blocking.
pub trait RaftEventSink: Send + Sync {
    fn emit(&self, event: RaftEvent);
}

/// Default sink: discards everything. Zero overhead beyond the `tracing`
/// calls the core makes regardless of which sink is installed.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullEventSink;

impl RaftEventSink for NullEventSink {
    fn emit(&self, _event: RaftEvent) {}
}

/// A bounded `tokio::sync::broadcast` fan-out, for embedding in a real
/// consumer (a UI feed, a test harness that asserts on the event stream).
///
/// When a subscriber falls behind the channel's capacity, `broadcast` drops
/// the oldest unread events for that subscriber rather than blocking the
/// sender — this is the documented drop-oldest policy called for by the
/// concurrency model.
#[derive(Clone)]
pub struct ChannelEventSink {
    tx: broadcast::Sender<RaftEvent>,
}

impl ChannelEventSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RaftEvent> {
        self.tx.subscribe()
    }
}

impl RaftEventSink for ChannelEventSink {
    fn emit(&self, event: RaftEvent) {
        // No receivers is not an error: the core runs fine with nobody
        // listening on the channel.
        let _ = self.tx.send(event);
    }
}

/// Installs a `tracing` subscriber reading `RUST_LOG` (default `info`),
/// writing human-readable output, for binaries and integration tests that
/// don't need JSON.
pub fn init_text_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

/// Same, but emits newline-delimited JSON — the shape a log aggregator
/// expects in a deployed cluster.
pub fn init_json_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .json()
        .with_env_filter(filter)
        .try_init();
}
