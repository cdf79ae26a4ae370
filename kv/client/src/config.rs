//! KV client tunables (spec §4.6).

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Per-attempt deadline, bounded further by whatever remains of the
    /// caller's own deadline.
    pub per_attempt_deadline: Duration,

    /// Brief pause after a `NotLeader` reply before rotating to the next
    /// address and retrying.
    pub not_leader_backoff: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            per_attempt_deadline: Duration::from_millis(50),
            not_leader_backoff: Duration::from_millis(300),
        }
    }
}
