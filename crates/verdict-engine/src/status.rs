// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Shared view of worker health and counters.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::watch;
use verdict_core::{GraphKind, GraphStats};

/// One worker: a graph over one partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct WorkerId {
    /// Graph the worker runs.
    pub graph: GraphKind,
    /// Partition of both inputs it owns.
    pub partition: u32,
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.graph, self.partition)
    }
}

/// Lifecycle of a worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum PartitionStatus {
    /// Restoring state.
    Starting,
    /// Following its inputs.
    Running,
    /// Waiting out the backoff after a failure.
    Restarting {
        /// Restart number, from 1.
        attempt: u32,
    },
    /// Drained and checkpointed.
    Stopped,
    /// Gave up.
    Failed {
        /// Last error.
        reason: String,
    },
}

impl PartitionStatus {
    /// True for [`PartitionStatus::Failed`].
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }
}

pub(crate) type StatusMap = BTreeMap<WorkerId, PartitionStatus>;
pub(crate) type StatsMap = BTreeMap<WorkerId, GraphStats>;

/// Status and counters published by workers, read by the engine handle.
#[derive(Debug, Clone)]
pub(crate) struct Board {
    status: Arc<watch::Sender<StatusMap>>,
    stats: Arc<watch::Sender<StatsMap>>,
}

impl Board {
    pub(crate) fn new(workers: impl IntoIterator<Item = WorkerId>) -> Self {
        let status = workers
            .into_iter()
            .map(|id| (id, PartitionStatus::Starting))
            .collect();
        Self {
            status: Arc::new(watch::channel(status).0),
            stats: Arc::new(watch::channel(StatsMap::new()).0),
        }
    }

    pub(crate) fn set_status(&self, id: WorkerId, status: PartitionStatus) {
        self.status.send_modify(|map| {
            map.insert(id, status);
        });
    }

    pub(crate) fn set_stats(&self, id: WorkerId, stats: GraphStats) {
        self.stats.send_if_modified(|map| map.insert(id, stats) != Some(stats));
    }

    pub(crate) fn watch_status(&self) -> watch::Receiver<StatusMap> {
        self.status.subscribe()
    }

    pub(crate) fn status(&self) -> StatusMap {
        self.status.borrow().clone()
    }

    pub(crate) fn stats(&self) -> StatsMap {
        self.stats.borrow().clone()
    }
}
