// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
use thiserror::Error;

/// Errors raised by the core graphs.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    /// Configuration rejected by [`EngineConfig::validate`](crate::EngineConfig::validate).
    #[error("invalid config: {0}")]
    InvalidConfig(String),
    /// Graph state could not be serialized.
    #[error("snapshot failed: {0}")]
    Snapshot(String),
    /// A checkpoint did not decode into graph state.
    #[error("corrupt snapshot: {0}")]
    CorruptSnapshot(String),
}
