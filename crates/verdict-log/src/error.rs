// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
use std::path::PathBuf;

use thiserror::Error;

/// Errors raised by the log.
#[derive(Debug, Error)]
pub enum LogError {
    /// Filesystem failure on a segment or metadata file.
    #[error("io error on {path}: {source}")]
    Io {
        /// File or directory involved.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
    /// A record could not be encoded.
    #[error("encode failed: {0}")]
    Encode(#[from] serde_json::Error),
    /// A persisted line did not decode.
    #[error("corrupt log {path} line {line}: {reason}")]
    Corrupt {
        /// Segment or metadata file.
        path: PathBuf,
        /// 1-based line number.
        line: usize,
        /// Decoder message.
        reason: String,
    },
    /// Partition index outside the topic.
    #[error("topic {topic} has {partitions} partitions, no partition {partition}")]
    PartitionOutOfRange {
        /// Topic name.
        topic: String,
        /// Requested partition.
        partition: u32,
        /// Partition count.
        partitions: u32,
    },
    /// A persisted topic was opened with a different partition count.
    #[error("topic {topic} was created with {found} partitions, requested {expected}")]
    PartitionMismatch {
        /// Topic name.
        topic: String,
        /// Count requested by the caller.
        expected: u32,
        /// Count recorded on disk.
        found: u32,
    },
    /// Bootstrap string named no usable location.
    #[error("invalid bootstrap location: {0:?}")]
    InvalidBootstrap(String),
}

pub(crate) fn io_err(path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> LogError {
    let path = path.into();
    move |source| LogError::Io { path, source }
}
