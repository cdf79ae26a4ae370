//! Raft timing and resource knobs.

use std::time::Duration;

/// Tunables for a Raft node. `Default` matches the timing this design was
/// validated against; tests that need faster/slower timing use the builder.
#[derive(Debug, Clone)]
pub struct RaftConfig {
    /// Lower bound of the randomized election timeout.
    pub election_timeout_min: Duration,

    /// Upper bound (exclusive) of the randomized election timeout.
    pub election_timeout_max: Duration,

    /// How often a leader sends AppendEntries absent a trigger.
    pub heartbeat_interval: Duration,

    /// Poll granularity for checking whether the election timeout has elapsed.
    pub election_tick: Duration,

    /// Depth of the commit-delivery channel. A tuning knob, not a
    /// correctness concern: backpressure on a full channel is the
    /// replication flow-control mechanism.
    pub commit_channel_capacity: usize,
}

impl Default for RaftConfig {
    fn default() -> Self {
        Self {
            election_timeout_min: Duration::from_millis(150),
            election_timeout_max: Duration::from_millis(300),
            heartbeat_interval: Duration::from_millis(50),
            election_tick: Duration::from_millis(10),
            commit_channel_capacity: 16,
        }
    }
}

impl RaftConfig {
    pub fn builder() -> RaftConfigBuilder {
        RaftConfigBuilder::new()
    }
}

/// Builder for [`RaftConfig`], used by tests that need different timing
/// than the default (e.g. compressed election timeouts for faster scenario
/// tests).
pub struct RaftConfigBuilder {
    config: RaftConfig,
}

impl RaftConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: RaftConfig::default(),
        }
    }

    pub fn election_timeout(mut self, min: Duration, max: Duration) -> Self {
        self.config.election_timeout_min = min;
        self.config.election_timeout_max = max;
        self
    }

    pub fn heartbeat_interval(mut self, interval: Duration) -> Self {
        self.config.heartbeat_interval = interval;
        self
    }

    pub fn election_tick(mut self, tick: Duration) -> Self {
        self.config.election_tick = tick;
        self
    }

    pub fn commit_channel_capacity(mut self, capacity: usize) -> Self {
        self.config.commit_channel_capacity = capacity;
        self
    }

    pub fn build(self) -> RaftConfig {
        assert!(
            self.config.election_timeout_min < self.config.election_timeout_max,
            "election_timeout_min must be less than election_timeout_max"
        );
        assert!(
            self.config.heartbeat_interval < self.config.election_timeout_min,
            "heartbeat_interval must be less than election_timeout_min"
        );
        assert!(
            self.config.commit_channel_capacity > 0,
            "commit_channel_capacity must be greater than 0"
        );

        self.config
    }
}

impl Default for RaftConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
