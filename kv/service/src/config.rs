//! Per-node KV service tunables.

use std::time::Duration;

/// Not broad enough to warrant a shared configuration crate (§10.3) — this
/// lives beside the service it configures, following `RaftConfig`'s pattern
/// of a `Default` impl plus plain field construction for overrides.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Address this node's HTTP surface binds to.
    pub bind_addr: std::net::SocketAddr,

    /// Upper bound on how long `put`/`get` wait for their submitted index to
    /// surface on the commit channel. Not part of the protocol: a normal
    /// request either gets its own HTTP client's deadline cut short (the
    /// connection drops, cancelling the in-flight future) or the entry
    /// commits well inside this bound. This is a safety valve against a
    /// pathological index that never commits (e.g. a stranded minority
    /// partition) leaking a subscription forever.
    pub request_timeout: Duration,

    /// Depth of the channel between the commit applier and the dispatcher
    /// that routes applied commands back to waiting subscriptions.
    pub applied_channel_capacity: usize,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            bind_addr: ([127, 0, 0, 1], 0).into(),
            request_timeout: Duration::from_secs(5),
            applied_channel_capacity: 16,
        }
    }
}
