// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
use serde::{Deserialize, Serialize};

/// Counters kept by a processing graph. Checkpointed with graph state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphStats {
    /// Verdicts consumed.
    pub validations_seen: u64,
    /// Lifecycle records consumed.
    pub entities_seen: u64,
    /// Lifecycle records skipped for not being CREATED.
    pub entities_filtered: u64,
    /// Records behind a window or join horizon.
    pub late_dropped: u64,
    /// Sessions finalized.
    pub sessions_closed: u64,
    /// Tombstones discarded by the gate.
    pub tombstones: u64,
    /// Finalized sessions that reached the threshold.
    pub gated: u64,
    /// Join results produced.
    pub join_matches: u64,
    /// Left-side records evicted without a match.
    pub join_misses: u64,
    /// Duplicate failures absorbed by the reducer.
    pub dedup_absorbed: u64,
    /// Transitions handed to the emitter.
    pub transitions_emitted: u64,
}

impl GraphStats {
    /// Add `other` into `self`, for totals across partitions.
    pub fn absorb(&mut self, other: &Self) {
        self.validations_seen += other.validations_seen;
        self.entities_seen += other.entities_seen;
        self.entities_filtered += other.entities_filtered;
        self.late_dropped += other.late_dropped;
        self.sessions_closed += other.sessions_closed;
        self.tombstones += other.tombstones;
        self.gated += other.gated;
        self.join_matches += other.join_matches;
        self.join_misses += other.join_misses;
        self.dedup_absorbed += other.dedup_absorbed;
        self.transitions_emitted += other.transitions_emitted;
    }
}
