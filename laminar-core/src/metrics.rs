//! Metrics reporting, mirroring the teacher's `watch`-channel metrics stream: every
//! `NodeState` publishes its latest view of itself on every state-changing transition, and
//! callers (tests included) can `wait()` on a predicate instead of polling.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::time::timeout as tokio_timeout;

use crate::core::Role;
use crate::ids::{GlobalOffset, NodeId};

/// A point-in-time snapshot of a node's externally visible state.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct NodeMetrics {
    pub id: NodeId,
    pub role: Role,
    pub current_term: u64,
    pub current_leader: Option<NodeId>,
    pub last_received_offset: GlobalOffset,
    pub last_committed_offset: GlobalOffset,
    pub members: Vec<NodeId>,
    pub in_joint_consensus: bool,
}

/// A handle which waits for a `NodeMetrics` stream to satisfy a predicate, or times out.
/// Mirrors `async_raft::metrics::Wait`.
pub struct Wait {
    pub rx: watch::Receiver<NodeMetrics>,
    pub timeout: Duration,
}

impl Wait {
    pub async fn metrics<T>(&self, func: T, msg: &str) -> anyhow::Result<NodeMetrics>
    where T: Fn(&NodeMetrics) -> bool + Send {
        let mut rx = self.rx.clone();
        let fut = async move {
            loop {
                let m = rx.borrow().clone();
                if func(&m) {
                    return m;
                }
                if rx.changed().await.is_err() {
                    anyhow::bail!("metrics channel closed while waiting for: {}", msg);
                }
            }
        };
        tokio_timeout(self.timeout, fut).await.map_err(|_| anyhow::anyhow!("timed out waiting for: {}", msg))
    }

    pub async fn role(&self, want: Role, msg: &str) -> anyhow::Result<NodeMetrics> {
        self.metrics(move |m| m.role == want, msg).await
    }

    pub async fn committed(&self, want: GlobalOffset, msg: &str) -> anyhow::Result<NodeMetrics> {
        self.metrics(move |m| m.last_committed_offset >= want, msg).await
    }
}
