// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Engine configuration: windowing policy plus driver tuning.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::CoreError;

/// Default number of PASS verdicts that validate an order.
pub const DEFAULT_REQUIRED_RULES: u32 = 3;
/// Default session inactivity gap (5 minutes).
pub const DEFAULT_SESSION_GAP_MS: u64 = 5 * 60 * 1000;
/// Default join skew tolerance (5 minutes).
pub const DEFAULT_JOIN_SKEW_MS: u64 = 5 * 60 * 1000;
/// Default startup timeout for partition assignment (60 seconds).
pub const DEFAULT_STARTUP_TIMEOUT_MS: u64 = 60 * 1000;

/// Configuration consumed by the core graphs and the engine driver.
///
/// The rule count is a static policy: it is fixed for the lifetime of an engine
/// and applies to every order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// PASS verdicts needed in one session to validate an order.
    pub required_rule_count: u32,
    /// Session inactivity gap.
    pub session_gap_ms: u64,
    /// Maximum event-time distance between a verdict (or gated signal) and the
    /// CREATED record it joins with, in either direction.
    pub join_skew_ms: u64,
    /// Extra retention for join buffers beyond the skew. Must cover the session
    /// gap, since gated signals only appear once their session closes.
    pub join_grace_ms: u64,
    /// How long a fail-dedup cell is remembered after its first failure.
    pub dedup_retention_ms: u64,
    /// Partition count of both input feeds.
    pub partitions: u32,
    /// Interval between partition checkpoints.
    pub commit_interval_ms: u64,
    /// Interval between punctuation ticks.
    pub punctuate_interval_ms: u64,
    /// Advance idle partitions' stream time to the wall clock on punctuation.
    pub wall_clock_punctuation: bool,
    /// Bound on waiting for every partition to come up.
    pub startup_timeout_ms: u64,
    /// Restarts allowed per partition before the engine gives up.
    pub max_partition_restarts: u32,
    /// Delay before restarting a failed partition.
    pub restart_backoff_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            required_rule_count: DEFAULT_REQUIRED_RULES,
            session_gap_ms: DEFAULT_SESSION_GAP_MS,
            join_skew_ms: DEFAULT_JOIN_SKEW_MS,
            join_grace_ms: DEFAULT_SESSION_GAP_MS,
            dedup_retention_ms: 24 * 60 * 60 * 1000,
            partitions: 4,
            commit_interval_ms: 1_000,
            punctuate_interval_ms: 1_000,
            wall_clock_punctuation: true,
            startup_timeout_ms: DEFAULT_STARTUP_TIMEOUT_MS,
            max_partition_restarts: 5,
            restart_backoff_ms: 500,
        }
    }
}

impl EngineConfig {
    /// Reject configurations the graphs cannot run with.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.required_rule_count == 0 {
            return Err(CoreError::InvalidConfig(
                "required_rule_count must be at least 1".into(),
            ));
        }
        if self.partitions == 0 {
            return Err(CoreError::InvalidConfig(
                "partitions must be at least 1".into(),
            ));
        }
        if self.session_gap_ms == 0 || self.join_skew_ms == 0 {
            return Err(CoreError::InvalidConfig(
                "session gap and join skew must be positive".into(),
            ));
        }
        if self.join_grace_ms < self.session_gap_ms {
            return Err(CoreError::InvalidConfig(format!(
                "join_grace_ms ({}) must cover session_gap_ms ({})",
                self.join_grace_ms, self.session_gap_ms
            )));
        }
        if self.commit_interval_ms == 0 || self.punctuate_interval_ms == 0 {
            return Err(CoreError::InvalidConfig(
                "commit and punctuate intervals must be positive".into(),
            ));
        }
        Ok(())
    }

    /// Session gap in signed milliseconds for event-time arithmetic.
    pub fn session_gap(&self) -> i64 {
        millis(self.session_gap_ms)
    }

    /// Join skew in signed milliseconds.
    pub fn join_skew(&self) -> i64 {
        millis(self.join_skew_ms)
    }

    /// Join grace in signed milliseconds.
    pub fn join_grace(&self) -> i64 {
        millis(self.join_grace_ms)
    }

    /// Dedup retention in signed milliseconds.
    pub fn dedup_retention(&self) -> i64 {
        millis(self.dedup_retention_ms)
    }

    /// Checkpoint cadence.
    pub fn commit_interval(&self) -> Duration {
        Duration::from_millis(self.commit_interval_ms)
    }

    /// Punctuation cadence.
    pub fn punctuate_interval(&self) -> Duration {
        Duration::from_millis(self.punctuate_interval_ms)
    }

    /// Startup bound.
    pub fn startup_timeout(&self) -> Duration {
        Duration::from_millis(self.startup_timeout_ms)
    }

    /// Restart delay.
    pub fn restart_backoff(&self) -> Duration {
        Duration::from_millis(self.restart_backoff_ms)
    }
}

fn millis(ms: u64) -> i64 {
    i64::try_from(ms).unwrap_or(i64::MAX)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_policy() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.required_rule_count, 3);
        assert_eq!(cfg.session_gap(), 300_000);
        assert_eq!(cfg.join_skew(), 300_000);
        assert_eq!(cfg.startup_timeout(), Duration::from_secs(60));
        cfg.validate().unwrap();
    }

    #[test]
    fn zero_rule_count_is_rejected() {
        let cfg = EngineConfig {
            required_rule_count: 0,
            ..EngineConfig::default()
        };
        assert!(matches!(cfg.validate(), Err(CoreError::InvalidConfig(_))));
    }

    #[test]
    fn grace_shorter_than_gap_is_rejected() {
        let cfg = EngineConfig {
            join_grace_ms: 1,
            ..EngineConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn partial_json_fills_defaults() {
        let cfg: EngineConfig = serde_json::from_str(r#"{"required_rule_count": 2}"#).unwrap();
        assert_eq!(cfg.required_rule_count, 2);
        assert_eq!(cfg.partitions, 4);
    }
}
