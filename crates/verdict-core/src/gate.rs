// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Threshold gate over aggregator output.

use serde::{Deserialize, Serialize};
use verdict_model::{EntityId, EventTime};

use crate::session::AggregateUpdate;

/// "Enough rules passed" for one entity, stamped with the session end.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct PassSignal {
    /// Entity that reached the threshold.
    pub entity_id: EntityId,
    /// Final PASS count of the session.
    pub pass_count: u64,
    /// Session end; the event time used by the pass-path join.
    pub at: EventTime,
}

/// Stateless filter: drops tombstones and counts below the required rule count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThresholdGate {
    required: u64,
}

impl ThresholdGate {
    /// Gate requiring `required` PASS verdicts.
    pub fn new(required: u32) -> Self {
        Self {
            required: u64::from(required),
        }
    }

    /// Required PASS count.
    pub fn required(&self) -> u64 {
        self.required
    }

    /// Forward `update` as a signal if it is a final count at or over the threshold.
    pub fn admit(&self, update: &AggregateUpdate) -> Option<PassSignal> {
        let count = update.count?;
        (count >= self.required).then(|| PassSignal {
            entity_id: update.entity_id.clone(),
            pass_count: count,
            at: update.window.end,
        })
    }
}
