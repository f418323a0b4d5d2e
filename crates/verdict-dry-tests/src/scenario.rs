// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Input timelines replayed through both graphs of one partition.

use verdict_core::{build_graph, EngineConfig, Emitter, EntityTable, Graph, GraphKind, GraphStats};
use verdict_model::{
    Entity, EntityId, EntityState, EventTime, StateTransition, TransitionKind, ValidationCheck,
    ValidationResult,
};

use crate::records::{fail, id, order, pass};

/// One input, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// A verdict stamped with an event time.
    Verdict(EventTime, ValidationResult),
    /// A lifecycle record stamped with an event time.
    Order(EventTime, Entity),
    /// Punctuation to an event time.
    Tick(EventTime),
}

/// Builder for a timeline.
#[derive(Debug, Clone, Default)]
pub struct Scenario {
    steps: Vec<Step>,
}

impl Scenario {
    /// Empty timeline.
    pub fn new() -> Self {
        Self::default()
    }

    /// CREATED order for `key` at `at`.
    pub fn order(self, at: EventTime, key: &str) -> Self {
        self.entity(at, order(key))
    }

    /// Arbitrary lifecycle record at `at`.
    pub fn entity(mut self, at: EventTime, entity: Entity) -> Self {
        self.steps.push(Step::Order(at, entity));
        self
    }

    /// PASS verdict at `at`.
    pub fn pass(self, at: EventTime, key: &str, check: ValidationCheck) -> Self {
        self.verdict(at, pass(key, check))
    }

    /// FAIL verdict at `at`.
    pub fn fail(self, at: EventTime, key: &str, check: ValidationCheck) -> Self {
        self.verdict(at, fail(key, check))
    }

    /// Arbitrary verdict at `at`.
    pub fn verdict(mut self, at: EventTime, verdict: ValidationResult) -> Self {
        self.steps.push(Step::Verdict(at, verdict));
        self
    }

    /// Punctuate to `at`.
    pub fn tick(mut self, at: EventTime) -> Self {
        self.steps.push(Step::Tick(at));
        self
    }

    /// Steps in arrival order.
    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    /// Feed every step to `graph`, returning its transitions in order.
    pub fn run_graph(&self, graph: &mut dyn Graph) -> Vec<StateTransition> {
        self.steps.iter().flat_map(|step| feed(graph, step)).collect()
    }

    /// Run both graphs with `config` and apply their output to a table.
    ///
    /// Each step reaches the pass graph before the fail graph.
    pub fn run(&self, config: &EngineConfig) -> Outcome {
        let mut pass = build_graph(GraphKind::Pass, config);
        let mut fail = build_graph(GraphKind::Fail, config);
        let mut emitter = Emitter::new(EntityTable::default());
        let mut transitions = Vec::new();
        for step in &self.steps {
            for graph in [&mut pass, &mut fail] {
                let out = feed(graph.as_mut(), step);
                emitter.emit_all(&out).unwrap_or_else(|never| match never {});
                transitions.extend(out);
            }
        }
        Outcome {
            transitions,
            table: emitter.into_inner(),
            pass: *pass.stats(),
            fail: *fail.stats(),
        }
    }
}

fn feed(graph: &mut dyn Graph, step: &Step) -> Vec<StateTransition> {
    match step {
        Step::Verdict(at, v) => graph.on_validation(*at, v),
        Step::Order(at, e) => graph.on_entity(*at, e),
        Step::Tick(at) => graph.punctuate(*at),
    }
}

/// What a scenario produced.
#[derive(Debug, Clone)]
pub struct Outcome {
    /// Every transition, in emission order.
    pub transitions: Vec<StateTransition>,
    /// Latest lifecycle record per order after applying the transitions.
    pub table: EntityTable,
    /// Pass graph counters.
    pub pass: GraphStats,
    /// Fail graph counters.
    pub fail: GraphStats,
}

impl Outcome {
    /// Transitions of `kind` for `key`.
    pub fn count(&self, key: &str, kind: TransitionKind) -> usize {
        let key = id(key);
        self.transitions
            .iter()
            .filter(|t| t.kind == kind && *t.entity_id() == key)
            .count()
    }

    /// State written for `key`, if any transition was emitted for it.
    pub fn state_of(&self, key: &str) -> Option<EntityState> {
        self.table.get(&id(key)).map(|e| e.state)
    }

    /// Ids with at least one transition.
    pub fn touched(&self) -> Vec<EntityId> {
        self.table.iter().map(|e| e.id.clone()).collect()
    }
}
