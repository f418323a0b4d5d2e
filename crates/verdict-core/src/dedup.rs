// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Left-biased reduction per entity, kept as a set-if-absent cell.
//!
//! `reduce(first, next) -> first`: the first value offered for a key is
//! retained and forwarded; later values are absorbed. Cells expire
//! `retention` after their first value, bounding memory to the recently active
//! entities.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use verdict_model::{EntityId, EventTime};

/// One retained representative.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cell<V> {
    /// Key of the cell.
    pub key: EntityId,
    /// Event time of the retained value.
    pub first_at: EventTime,
    /// The retained value.
    pub value: V,
}

/// First-seen-wins cells keyed by entity id.
#[derive(Debug, Clone)]
pub struct FirstSeen<V> {
    retention: i64,
    cells: BTreeMap<EntityId, (EventTime, V)>,
    expiry: BTreeSet<(EventTime, EntityId)>,
}

impl<V: Clone> FirstSeen<V> {
    /// Empty reducer whose cells live for `retention_ms` of stream time.
    pub fn new(retention_ms: i64) -> Self {
        Self {
            retention: retention_ms,
            cells: BTreeMap::new(),
            expiry: BTreeSet::new(),
        }
    }

    /// Offer `value` for `key`. Returns it when it becomes the representative,
    /// `None` when an earlier value already holds the cell.
    pub fn offer(&mut self, key: &EntityId, at: EventTime, value: V) -> Option<V> {
        if self.cells.contains_key(key) {
            return None;
        }
        self.expiry.insert((at, key.clone()));
        self.cells.insert(key.clone(), (at, value.clone()));
        Some(value)
    }

    /// Current representative for `key`.
    pub fn get(&self, key: &EntityId) -> Option<&V> {
        self.cells.get(key).map(|(_, v)| v)
    }

    /// Live cells.
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    /// True when no cell is live.
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Drop cells whose first value is older than `stream_time - retention`.
    pub fn expire(&mut self, stream_time: EventTime) -> usize {
        let horizon = stream_time.minus_millis(self.retention);
        let mut dropped = 0;
        while let Some(first) = self.expiry.first().cloned() {
            if first.0 >= horizon {
                break;
            }
            self.expiry.remove(&first);
            if self.cells.remove(&first.1).is_some() {
                dropped += 1;
            }
        }
        dropped
    }

    /// Capture state for a checkpoint.
    pub fn snapshot(&self) -> Vec<Cell<V>> {
        self.cells
            .iter()
            .map(|(key, (first_at, value))| Cell {
                key: key.clone(),
                first_at: *first_at,
                value: value.clone(),
            })
            .collect()
    }

    /// Rebuild from a checkpoint.
    pub fn restore(retention_ms: i64, cells: Vec<Cell<V>>) -> Self {
        let mut reducer = Self::new(retention_ms);
        for cell in cells {
            reducer.offer(&cell.key, cell.first_at, cell.value);
        }
        reducer
    }
}
