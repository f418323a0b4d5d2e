// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! The two processing graphs run per partition.
//!
//! - [`PassGraph`]: verdicts -> sessions -> gate -> join with CREATED -> VALIDATED.
//! - [`FailGraph`]: FAIL verdicts -> join with CREATED -> first-seen dedup -> FAILED.
//!
//! Both graphs are driven by stream time, the largest event time seen on either
//! input of the partition (or pushed in by punctuation). Stream time never moves
//! backwards. Every input and every punctuation returns the transitions it
//! produced, in a deterministic order.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;
use verdict_model::{Entity, EventTime, StateTransition, ValidationResult};

use crate::dedup::{Cell, FirstSeen};
use crate::gate::{PassSignal, ThresholdGate};
use crate::join::{Arrival, JoinSnapshot, JoinWindow, Joined, WindowedJoin};
use crate::session::{Observation, SessionAggregator, SessionSnapshot};
use crate::{CoreError, EngineConfig, GraphStats};

/// Which processing graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GraphKind {
    /// Aggregate-and-validate path.
    Pass,
    /// Fail-fast path.
    Fail,
}

impl GraphKind {
    /// Both graphs, in start order.
    pub const ALL: [Self; 2] = [Self::Pass, Self::Fail];

    /// Short name used in logs and state paths.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pass => "pass",
            Self::Fail => "fail",
        }
    }

    /// Consumer group the graph reads its inputs under.
    pub const fn consumer_group(self) -> &'static str {
        match self {
            Self::Pass => "verdict-aggregator-pass",
            Self::Fail => "verdict-aggregator-fail",
        }
    }
}

impl std::fmt::Display for GraphKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A per-partition processing graph over the verdict and lifecycle feeds.
pub trait Graph: Send {
    /// Which graph this is.
    fn kind(&self) -> GraphKind;

    /// Consume one verdict stamped `at`.
    fn on_validation(&mut self, at: EventTime, result: &ValidationResult) -> Vec<StateTransition>;

    /// Consume one lifecycle record stamped `at`.
    fn on_entity(&mut self, at: EventTime, entity: &Entity) -> Vec<StateTransition>;

    /// Advance stream time to `now` without input.
    fn punctuate(&mut self, now: EventTime) -> Vec<StateTransition>;

    /// Current stream time.
    fn stream_time(&self) -> Option<EventTime>;

    /// Counters.
    fn stats(&self) -> &GraphStats;

    /// Serialize state for a checkpoint.
    fn snapshot(&self) -> Result<Value, CoreError>;

    /// Replace state from a checkpoint.
    fn restore(&mut self, state: Value) -> Result<(), CoreError>;
}

/// Build the graph of `kind` for `config`.
pub fn build_graph(kind: GraphKind, config: &EngineConfig) -> Box<dyn Graph> {
    match kind {
        GraphKind::Pass => Box::new(PassGraph::new(config)),
        GraphKind::Fail => Box::new(FailGraph::new(config)),
    }
}

fn advance_clock(clock: &mut Option<EventTime>, at: EventTime) {
    if clock.is_none_or(|now| at > now) {
        *clock = Some(at);
    }
}

fn encode<T: Serialize>(state: &T) -> Result<Value, CoreError> {
    serde_json::to_value(state).map_err(|e| CoreError::Snapshot(e.to_string()))
}

fn decode<T: for<'de> Deserialize<'de>>(kind: GraphKind, state: Value) -> Result<T, CoreError> {
    let found = state.get("kind").cloned();
    if found != Some(Value::String(kind.as_str().to_owned())) {
        return Err(CoreError::CorruptSnapshot(format!(
            "expected {kind} graph state, found kind {}",
            found.unwrap_or(Value::Null)
        )));
    }
    serde_json::from_value(state).map_err(|e| CoreError::CorruptSnapshot(e.to_string()))
}

#[derive(Serialize, Deserialize)]
struct PassState {
    kind: GraphKind,
    stream_time: Option<EventTime>,
    sessions: SessionSnapshot,
    join: JoinSnapshot<PassSignal, Entity>,
    stats: GraphStats,
}

/// Verdicts -> session counts -> threshold gate -> join with CREATED -> VALIDATED.
#[derive(Debug, Clone)]
pub struct PassGraph {
    gap: i64,
    window: JoinWindow,
    aggregator: SessionAggregator,
    gate: ThresholdGate,
    join: WindowedJoin<PassSignal, Entity>,
    clock: Option<EventTime>,
    stats: GraphStats,
}

impl PassGraph {
    /// Fresh graph for `config`.
    pub fn new(config: &EngineConfig) -> Self {
        let window = JoinWindow::symmetric(config.join_skew(), config.join_grace());
        Self {
            gap: config.session_gap(),
            window,
            aggregator: SessionAggregator::new(config.session_gap()),
            gate: ThresholdGate::new(config.required_rule_count),
            join: WindowedJoin::new(window),
            clock: None,
            stats: GraphStats::default(),
        }
    }

    /// The session aggregator (read-only).
    pub fn aggregator(&self) -> &SessionAggregator {
        &self.aggregator
    }

    fn validated(&mut self, matches: Vec<Joined<PassSignal, Entity>>) -> Vec<StateTransition> {
        self.stats.join_matches += matches.len() as u64;
        matches
            .into_iter()
            .map(|m| StateTransition::validated(m.right, m.at))
            .collect()
    }

    fn advance(&mut self) -> Vec<StateTransition> {
        let Some(now) = self.clock else {
            return Vec::new();
        };
        let mut out = Vec::new();
        for update in self.aggregator.close_expired(now) {
            if update.is_tombstone() {
                self.stats.tombstones += 1;
                continue;
            }
            self.stats.sessions_closed += 1;
            let Some(signal) = self.gate.admit(&update) else {
                debug!(
                    entity = %update.entity_id,
                    passes = update.count.unwrap_or(0),
                    required = self.gate.required(),
                    "session closed below threshold"
                );
                continue;
            };
            self.stats.gated += 1;
            let key = signal.entity_id.clone();
            let at = signal.at;
            match self.join.on_left(&key, at, signal) {
                Arrival::Accepted(matches) => out.extend(self.validated(matches)),
                Arrival::Late => {
                    self.stats.join_misses += 1;
                    debug!(entity = %key, %at, "join miss: gated signal behind join horizon");
                }
            }
        }
        for miss in self.join.expire(now) {
            self.stats.join_misses += 1;
            debug!(entity = %miss.key, at = %miss.at, "join miss: no CREATED order within skew");
        }
        out
    }

    fn finish(&mut self, mut out: Vec<StateTransition>) -> Vec<StateTransition> {
        out.extend(self.advance());
        self.stats.transitions_emitted += out.len() as u64;
        out
    }
}

impl Graph for PassGraph {
    fn kind(&self) -> GraphKind {
        GraphKind::Pass
    }

    fn on_validation(&mut self, at: EventTime, result: &ValidationResult) -> Vec<StateTransition> {
        self.stats.validations_seen += 1;
        advance_clock(&mut self.clock, at);
        if self.aggregator.observe(result, at) == Observation::Late {
            self.stats.late_dropped += 1;
        }
        self.finish(Vec::new())
    }

    fn on_entity(&mut self, at: EventTime, entity: &Entity) -> Vec<StateTransition> {
        self.stats.entities_seen += 1;
        advance_clock(&mut self.clock, at);
        let mut out = Vec::new();
        if entity.is_created() {
            match self.join.on_right(&entity.id, at, entity.clone()) {
                Arrival::Accepted(matches) => out = self.validated(matches),
                Arrival::Late => {
                    self.stats.late_dropped += 1;
                    debug!(entity = %entity.id, %at, "late CREATED record dropped");
                }
            }
        } else {
            self.stats.entities_filtered += 1;
        }
        self.finish(out)
    }

    fn punctuate(&mut self, now: EventTime) -> Vec<StateTransition> {
        advance_clock(&mut self.clock, now);
        self.finish(Vec::new())
    }

    fn stream_time(&self) -> Option<EventTime> {
        self.clock
    }

    fn stats(&self) -> &GraphStats {
        &self.stats
    }

    fn snapshot(&self) -> Result<Value, CoreError> {
        encode(&PassState {
            kind: GraphKind::Pass,
            stream_time: self.clock,
            sessions: self.aggregator.snapshot(),
            join: self.join.snapshot(),
            stats: self.stats,
        })
    }

    fn restore(&mut self, state: Value) -> Result<(), CoreError> {
        let state: PassState = decode(GraphKind::Pass, state)?;
        self.clock = state.stream_time;
        self.aggregator = SessionAggregator::restore(self.gap, state.sessions);
        self.join = WindowedJoin::restore(self.window, state.join);
        self.stats = state.stats;
        Ok(())
    }
}

#[derive(Serialize, Deserialize)]
struct FailState {
    kind: GraphKind,
    stream_time: Option<EventTime>,
    join: JoinSnapshot<ValidationResult, Entity>,
    dedup: Vec<Cell<StateTransition>>,
    stats: GraphStats,
}

/// FAIL verdicts -> join with CREATED -> first-seen-wins per entity -> FAILED.
#[derive(Debug, Clone)]
pub struct FailGraph {
    window: JoinWindow,
    retention: i64,
    join: WindowedJoin<ValidationResult, Entity>,
    dedup: FirstSeen<StateTransition>,
    clock: Option<EventTime>,
    stats: GraphStats,
}

impl FailGraph {
    /// Fresh graph for `config`.
    pub fn new(config: &EngineConfig) -> Self {
        let window = JoinWindow::symmetric(config.join_skew(), config.join_grace());
        Self {
            window,
            retention: config.dedup_retention(),
            join: WindowedJoin::new(window),
            dedup: FirstSeen::new(config.dedup_retention()),
            clock: None,
            stats: GraphStats::default(),
        }
    }

    /// The dedup cells (read-only).
    pub fn dedup(&self) -> &FirstSeen<StateTransition> {
        &self.dedup
    }

    fn reduce(&mut self, matches: Vec<Joined<ValidationResult, Entity>>) -> Vec<StateTransition> {
        let mut out = Vec::new();
        for m in matches {
            self.stats.join_matches += 1;
            let transition = StateTransition::failed(m.right, m.at);
            match self.dedup.offer(&m.key, m.at, transition) {
                Some(first) => out.push(first),
                None => {
                    self.stats.dedup_absorbed += 1;
                    debug!(entity = %m.key, check = %m.left.check, "duplicate failure absorbed");
                }
            }
        }
        out
    }

    fn advance(&mut self) {
        let Some(now) = self.clock else {
            return;
        };
        for miss in self.join.expire(now) {
            self.stats.join_misses += 1;
            debug!(entity = %miss.key, at = %miss.at, "join miss: FAIL verdict without CREATED order");
        }
        self.dedup.expire(now);
    }

    fn finish(&mut self, out: Vec<StateTransition>) -> Vec<StateTransition> {
        self.advance();
        self.stats.transitions_emitted += out.len() as u64;
        out
    }
}

impl Graph for FailGraph {
    fn kind(&self) -> GraphKind {
        GraphKind::Fail
    }

    fn on_validation(&mut self, at: EventTime, result: &ValidationResult) -> Vec<StateTransition> {
        self.stats.validations_seen += 1;
        advance_clock(&mut self.clock, at);
        let mut out = Vec::new();
        if result.is_fail() {
            match self.join.on_left(&result.entity_id, at, result.clone()) {
                Arrival::Accepted(matches) => out = self.reduce(matches),
                Arrival::Late => {
                    self.stats.late_dropped += 1;
                    debug!(entity = %result.entity_id, %at, "late FAIL verdict dropped");
                }
            }
        }
        self.finish(out)
    }

    fn on_entity(&mut self, at: EventTime, entity: &Entity) -> Vec<StateTransition> {
        self.stats.entities_seen += 1;
        advance_clock(&mut self.clock, at);
        let mut out = Vec::new();
        if entity.is_created() {
            match self.join.on_right(&entity.id, at, entity.clone()) {
                Arrival::Accepted(matches) => out = self.reduce(matches),
                Arrival::Late => {
                    self.stats.late_dropped += 1;
                    debug!(entity = %entity.id, %at, "late CREATED record dropped");
                }
            }
        } else {
            self.stats.entities_filtered += 1;
        }
        self.finish(out)
    }

    fn punctuate(&mut self, now: EventTime) -> Vec<StateTransition> {
        advance_clock(&mut self.clock, now);
        self.finish(Vec::new())
    }

    fn stream_time(&self) -> Option<EventTime> {
        self.clock
    }

    fn stats(&self) -> &GraphStats {
        &self.stats
    }

    fn snapshot(&self) -> Result<Value, CoreError> {
        encode(&FailState {
            kind: GraphKind::Fail,
            stream_time: self.clock,
            join: self.join.snapshot(),
            dedup: self.dedup.snapshot(),
            stats: self.stats,
        })
    }

    fn restore(&mut self, state: Value) -> Result<(), CoreError> {
        let state: FailState = decode(GraphKind::Fail, state)?;
        self.clock = state.stream_time;
        self.join = WindowedJoin::restore(self.window, state.join);
        self.dedup = FirstSeen::restore(self.retention, state.dedup);
        self.stats = state.stats;
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use verdict_model::{EntityId, EntityState, RuleOutcome, TransitionKind, ValidationCheck};

    const MIN: i64 = 60_000;

    fn t(minutes: i64) -> EventTime {
        EventTime::from_millis(minutes * MIN)
    }

    fn order(key: &str) -> Entity {
        Entity::order(EntityId::new(key).unwrap(), 1, "JUMPERS", 1, 9.99)
    }

    fn verdict(key: &str, check: ValidationCheck, outcome: RuleOutcome) -> ValidationResult {
        ValidationResult::new(EntityId::new(key).unwrap(), check, outcome)
    }

    fn three_passes(graph: &mut dyn Graph, key: &str, from: i64) -> Vec<StateTransition> {
        let mut out = Vec::new();
        for (i, check) in [
            ValidationCheck::InventoryCheck,
            ValidationCheck::FraudCheck,
            ValidationCheck::OrderDetailsCheck,
        ]
        .into_iter()
        .enumerate()
        {
            let at = t(from + i64::try_from(i).unwrap());
            out.extend(graph.on_validation(at, &verdict(key, check, RuleOutcome::Pass)));
        }
        out
    }

    #[test]
    fn pass_graph_validates_once_session_closes() {
        let mut g = PassGraph::new(&EngineConfig::default());
        assert!(g.on_entity(t(0), &order("x")).is_empty());
        assert!(three_passes(&mut g, "x", 1).is_empty());
        // session [1, 3] closes once stream time passes 8
        assert!(g.punctuate(t(8)).is_empty());
        let out = g.punctuate(t(9));
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].kind, TransitionKind::Validated);
        assert_eq!(out[0].to_entity().state, EntityState::Validated);
        assert_eq!(out[0].at, t(3));
        assert_eq!(g.stats().gated, 1);
        assert_eq!(g.stats().tombstones, 1);
        assert!(g.punctuate(t(60)).is_empty());
    }

    #[test]
    fn pass_graph_ignores_non_created_records() {
        let mut g = PassGraph::new(&EngineConfig::default());
        g.on_entity(t(0), &order("x").with_state(EntityState::Validated));
        three_passes(&mut g, "x", 1);
        assert!(g.punctuate(t(30)).is_empty());
        assert_eq!(g.stats().entities_filtered, 1);
        assert_eq!(g.stats().join_misses, 1);
    }

    #[test]
    fn fail_graph_emits_single_failure() {
        let mut g = FailGraph::new(&EngineConfig::default());
        g.on_entity(t(0), &order("y"));
        let first = g.on_validation(
            t(1),
            &verdict("y", ValidationCheck::FraudCheck, RuleOutcome::Fail),
        );
        let second = g.on_validation(
            t(2),
            &verdict("y", ValidationCheck::InventoryCheck, RuleOutcome::Fail),
        );
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].kind, TransitionKind::Failed);
        assert!(second.is_empty());
        assert_eq!(g.stats().dedup_absorbed, 1);
    }

    #[test]
    fn fail_graph_skips_passes() {
        let mut g = FailGraph::new(&EngineConfig::default());
        g.on_entity(t(0), &order("y"));
        assert!(three_passes(&mut g, "y", 1).is_empty());
        assert_eq!(g.stats().join_matches, 0);
    }

    #[test]
    fn restore_rejects_other_graph_state() {
        let pass = PassGraph::new(&EngineConfig::default());
        let mut fail = FailGraph::new(&EngineConfig::default());
        let err = fail.restore(pass.snapshot().unwrap()).unwrap_err();
        assert!(matches!(err, CoreError::CorruptSnapshot(_)));
    }

    #[test]
    fn restored_graph_continues_where_it_stopped() {
        let cfg = EngineConfig::default();
        let mut g = PassGraph::new(&cfg);
        g.on_entity(t(0), &order("x"));
        g.on_validation(
            t(1),
            &verdict("x", ValidationCheck::InventoryCheck, RuleOutcome::Pass),
        );
        let snap = g.snapshot().unwrap();

        let mut restored = PassGraph::new(&cfg);
        restored.restore(snap).unwrap();
        for graph in [&mut g, &mut restored] {
            graph.on_validation(
                t(2),
                &verdict("x", ValidationCheck::FraudCheck, RuleOutcome::Pass),
            );
            graph.on_validation(
                t(3),
                &verdict("x", ValidationCheck::OrderDetailsCheck, RuleOutcome::Pass),
            );
        }
        assert_eq!(g.punctuate(t(20)), restored.punctuate(t(20)));
        assert_eq!(g.stats(), restored.stats());
    }
}
