//! Runtime configuration for a `NodeState`, built and validated the way the teacher's
//! consensus core validates its `Config` before a node is ever spawned.

use std::sync::Arc;

use rand::{thread_rng, Rng};
use serde::{Deserialize, Serialize};

/// Default election timeout lower bound, in milliseconds.
pub const DEFAULT_ELECTION_TIMEOUT_MIN: u64 = 150;
/// Default election timeout upper bound, in milliseconds.
pub const DEFAULT_ELECTION_TIMEOUT_MAX: u64 = 300;
/// Default heartbeat interval, in milliseconds. Must stay well below the election timeout.
pub const DEFAULT_HEARTBEAT_INTERVAL: u64 = 50;

/// Node runtime configuration (§4, §5, §9 knobs).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    /// A name for the cluster, used only for diagnostics.
    pub cluster_name: String,

    /// Minimum election timeout, in milliseconds. Randomized per node between
    /// `election_timeout_min` and `election_timeout_max` on every FOLLOWER → CANDIDATE
    /// transition (§4.1).
    pub election_timeout_min: u64,
    /// Maximum election timeout, in milliseconds.
    pub election_timeout_max: u64,
    /// Interval between heartbeat APPEND_MUTATIONS with zero records (§4.5).
    pub heartbeat_interval: u64,

    /// Maximum number of mutations to buffer in a single APPEND_MUTATIONS. The replication
    /// protocol (§4.5) only ever sends one record at a time in the lock-step state machine,
    /// so this bounds the *lagging* catch-up loop only.
    pub max_payload_entries: u64,

    /// How many mutations a downstream peer may lag behind before its replication loop
    /// switches from line-rate (one record, wait for ack) to lagging (batch catch-up) mode.
    pub replication_lag_threshold: u64,

    /// If a leader cannot reach a majority of any active config for this many milliseconds,
    /// it steps down to FOLLOWER (§4.1, optional `leader_step_down`). `None` disables this.
    pub leader_step_down_after: Option<u64>,
}

impl Config {
    /// Start building a config for the named cluster.
    pub fn build(cluster_name: String) -> ConfigBuilder {
        ConfigBuilder {
            inner: Config {
                cluster_name,
                election_timeout_min: DEFAULT_ELECTION_TIMEOUT_MIN,
                election_timeout_max: DEFAULT_ELECTION_TIMEOUT_MAX,
                heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
                max_payload_entries: 300,
                replication_lag_threshold: 1000,
                leader_step_down_after: None,
            },
        }
    }

    /// Draw a randomized election timeout, in milliseconds, within the configured bounds.
    pub fn new_rand_election_timeout(&self) -> u64 {
        thread_rng().gen_range(self.election_timeout_min, self.election_timeout_max + 1)
    }
}

/// A builder which validates a [`Config`] before it can be used to spawn a `NodeState`.
pub struct ConfigBuilder {
    inner: Config,
}

impl ConfigBuilder {
    pub fn election_timeout_min(mut self, v: u64) -> Self {
        self.inner.election_timeout_min = v;
        self
    }

    pub fn election_timeout_max(mut self, v: u64) -> Self {
        self.inner.election_timeout_max = v;
        self
    }

    pub fn heartbeat_interval(mut self, v: u64) -> Self {
        self.inner.heartbeat_interval = v;
        self
    }

    pub fn max_payload_entries(mut self, v: u64) -> Self {
        self.inner.max_payload_entries = v;
        self
    }

    pub fn replication_lag_threshold(mut self, v: u64) -> Self {
        self.inner.replication_lag_threshold = v;
        self
    }

    pub fn leader_step_down_after(mut self, v: Option<u64>) -> Self {
        self.inner.leader_step_down_after = v;
        self
    }

    /// Validate the accumulated config, returning an `Arc<Config>` ready to be handed to a
    /// `NodeState`.
    pub fn validate(self) -> anyhow::Result<Arc<Config>> {
        let c = self.inner;
        if c.election_timeout_min >= c.election_timeout_max {
            anyhow::bail!(
                "election_timeout_min ({}) must be < election_timeout_max ({})",
                c.election_timeout_min,
                c.election_timeout_max
            );
        }
        if c.heartbeat_interval >= c.election_timeout_min {
            anyhow::bail!(
                "heartbeat_interval ({}) must be < election_timeout_min ({})",
                c.heartbeat_interval,
                c.election_timeout_min
            );
        }
        if c.max_payload_entries == 0 {
            anyhow::bail!("max_payload_entries must be > 0");
        }
        Ok(Arc::new(c))
    }
}
