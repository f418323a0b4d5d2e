// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;
use verdict_core::{CoreError, GraphKind};
use verdict_log::LogError;

/// Errors raised by the engine driver.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Not every partition came up within the startup timeout.
    #[error("startup timed out after {waited:?}: {ready} of {expected} partitions ready")]
    StartupTimeout {
        /// Time waited.
        waited: Duration,
        /// Workers running when the timeout fired.
        ready: usize,
        /// Workers expected.
        expected: usize,
    },
    /// Configuration or graph failure.
    #[error(transparent)]
    Core(#[from] CoreError),
    /// Log transport failure.
    #[error(transparent)]
    Log(#[from] LogError),
    /// Checkpoint storage failure.
    #[error("state store error on {path}: {source}")]
    StateStore {
        /// File or directory involved.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
    /// A checkpoint that cannot be resumed: undecodable, foreign, or ahead of
    /// the log it was taken against.
    #[error("corrupt state for {graph} partition {partition}: {reason}")]
    CorruptState {
        /// Graph owning the checkpoint.
        graph: GraphKind,
        /// Partition owning the checkpoint.
        partition: u32,
        /// What was wrong with it.
        reason: String,
    },
    /// A partition worker failed permanently.
    #[error("partition {worker} failed: {reason}")]
    PartitionFailed {
        /// `<graph>/<partition>`.
        worker: String,
        /// Last error seen.
        reason: String,
    },
}

impl EngineError {
    /// Whether restarting the worker from its checkpoint can clear the error.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::CorruptState { .. } | Self::Core(_))
    }
}
