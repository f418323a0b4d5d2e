// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use verdict_model::{EntityId, EventTime};

/// Value types a topic can carry.
pub trait Payload: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {}

impl<T> Payload for T where T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {}

/// One keyed record at a fixed position in a partition.
///
/// A `None` value is a tombstone: it deletes the key from the table view.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct Record<V> {
    /// Partition holding the record.
    pub partition: u32,
    /// Position within the partition; dense from 0 until compaction.
    pub offset: u64,
    /// Record key.
    pub key: EntityId,
    /// Value, or `None` for a tombstone.
    pub value: Option<V>,
    /// Event time stamped by the producer.
    pub timestamp: EventTime,
}

impl<V> Record<V> {
    /// True for a delete marker.
    pub fn is_tombstone(&self) -> bool {
        self.value.is_none()
    }

    /// Offset a reader resumes from after consuming this record.
    pub fn next_offset(&self) -> u64 {
        self.offset + 1
    }
}
