// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
use serde::{Deserialize, Serialize};

use crate::{Entity, EntityId, EntityState, EventTime};

/// Terminal state the aggregator can move an order to.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransitionKind {
    /// Enough rules passed.
    Validated,
    /// A rule failed.
    Failed,
}

impl From<TransitionKind> for EntityState {
    fn from(kind: TransitionKind) -> Self {
        match kind {
            TransitionKind::Validated => Self::Validated,
            TransitionKind::Failed => Self::Failed,
        }
    }
}

/// A derived state change, carrying the joined CREATED record it applies to.
///
/// Output is keyed by entity id and overwrites the previous record, so emitting
/// the same transition twice yields an identical record.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct StateTransition {
    /// Target state.
    pub kind: TransitionKind,
    /// The CREATED record matched by the join.
    pub source: Entity,
    /// Event time of the join result (the later of both sides).
    pub at: EventTime,
}

impl StateTransition {
    /// A VALIDATED transition for `source`.
    pub fn validated(source: Entity, at: EventTime) -> Self {
        Self {
            kind: TransitionKind::Validated,
            source,
            at,
        }
    }

    /// A FAILED transition for `source`.
    pub fn failed(source: Entity, at: EventTime) -> Self {
        Self {
            kind: TransitionKind::Failed,
            source,
            at,
        }
    }

    /// Key of the output record.
    pub fn entity_id(&self) -> &EntityId {
        &self.source.id
    }

    /// The full overwrite record: previous payload, new state.
    pub fn to_entity(&self) -> Entity {
        self.source.with_state(self.kind.into())
    }
}
