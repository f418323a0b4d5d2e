// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Output emitter: transitions become full overwrite records on the lifecycle feed.

use std::collections::BTreeMap;
use std::convert::Infallible;

use tracing::debug;
use verdict_model::{Entity, EntityId, EventTime, StateTransition};

/// Destination of overwrite records, keyed by entity id.
pub trait TransitionSink {
    /// Publish failure.
    type Error;

    /// Write `record` under `key` with event time `at`.
    fn publish(&mut self, key: &EntityId, record: &Entity, at: EventTime)
        -> Result<(), Self::Error>;
}

/// Writes each transition as the previous payload plus the new state.
#[derive(Debug)]
pub struct Emitter<S> {
    sink: S,
    emitted: u64,
}

impl<S: TransitionSink> Emitter<S> {
    /// Emitter over `sink`.
    pub fn new(sink: S) -> Self {
        Self { sink, emitted: 0 }
    }

    /// Publish one transition.
    pub fn emit(&mut self, transition: &StateTransition) -> Result<(), S::Error> {
        let record = transition.to_entity();
        debug!(
            entity = %transition.entity_id(),
            state = %record.state,
            at = %transition.at,
            "emitting transition"
        );
        self.sink.publish(transition.entity_id(), &record, transition.at)?;
        self.emitted += 1;
        Ok(())
    }

    /// Publish transitions in order, stopping at the first failure.
    pub fn emit_all<'a>(
        &mut self,
        transitions: impl IntoIterator<Item = &'a StateTransition>,
    ) -> Result<(), S::Error> {
        for t in transitions {
            self.emit(t)?;
        }
        Ok(())
    }

    /// Transitions published so far.
    pub fn emitted(&self) -> u64 {
        self.emitted
    }

    /// Borrow the sink.
    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Consume the emitter, returning the sink.
    pub fn into_inner(self) -> S {
        self.sink
    }
}

/// Latest record per key; the consumer's view of an overwrite-by-key feed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntityTable {
    records: BTreeMap<EntityId, Entity>,
    writes: u64,
}

impl EntityTable {
    /// Apply a lifecycle record.
    pub fn upsert(&mut self, record: Entity) {
        self.writes += 1;
        self.records.insert(record.id.clone(), record);
    }

    /// Latest record for `key`.
    pub fn get(&self, key: &EntityId) -> Option<&Entity> {
        self.records.get(key)
    }

    /// Number of keys.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// True when empty.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Total writes applied, including overwrites.
    pub fn writes(&self) -> u64 {
        self.writes
    }

    /// Records ordered by key.
    pub fn iter(&self) -> impl Iterator<Item = &Entity> {
        self.records.values()
    }
}

impl TransitionSink for EntityTable {
    type Error = Infallible;

    fn publish(&mut self, _key: &EntityId, record: &Entity, _at: EventTime) -> Result<(), Infallible> {
        self.upsert(record.clone());
        Ok(())
    }
}
