// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Topics: fixed partitions of append-only keyed records.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, info};
use verdict_model::{partition_for, EntityId, EventTime};

use crate::error::io_err;
use crate::segment::{read_json, write_json, Segment};
use crate::{LogError, Payload, Record};

type GroupOffsets = BTreeMap<String, BTreeMap<u32, u64>>;

#[derive(Serialize, Deserialize)]
struct TopicMeta {
    partitions: u32,
}

struct PartitionState<V> {
    records: Vec<Record<V>>,
    next_offset: u64,
    latest: BTreeMap<EntityId, u64>,
    segment: Option<Segment>,
}

impl<V: Payload> PartitionState<V> {
    fn new(records: Vec<Record<V>>, segment: Option<Segment>) -> Self {
        let next_offset = records.last().map_or(0, Record::next_offset);
        let latest = records.iter().map(|r| (r.key.clone(), r.offset)).collect();
        Self {
            records,
            next_offset,
            latest,
            segment,
        }
    }

    fn position(&self, offset: u64) -> usize {
        self.records.partition_point(|r| r.offset < offset)
    }

    fn at(&self, offset: u64) -> Option<&Record<V>> {
        self.records
            .get(self.position(offset))
            .filter(|r| r.offset == offset)
    }
}

struct Partition<V> {
    state: Mutex<PartitionState<V>>,
    end: watch::Sender<u64>,
}

impl<V: Payload> Partition<V> {
    fn new(state: PartitionState<V>) -> Self {
        let (end, _) = watch::channel(state.next_offset);
        Self {
            state: Mutex::new(state),
            end,
        }
    }

    fn lock(&self) -> MutexGuard<'_, PartitionState<V>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

struct Inner<V> {
    name: String,
    dir: Option<PathBuf>,
    partitions: Vec<Partition<V>>,
    groups: Mutex<GroupOffsets>,
}

/// A named, partitioned log of keyed records. Cheap to clone; clones share
/// the same partitions.
pub struct Topic<V> {
    inner: Arc<Inner<V>>,
}

impl<V> Clone for Topic<V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<V> std::fmt::Debug for Topic<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Topic")
            .field("name", &self.inner.name)
            .field("partitions", &self.inner.partitions.len())
            .field("dir", &self.inner.dir)
            .finish_non_exhaustive()
    }
}

impl<V: Payload> Topic<V> {
    /// A topic held only in memory.
    pub fn in_memory(name: impl Into<String>, partitions: u32) -> Self {
        let partitions = (0..partitions.max(1))
            .map(|_| Partition::new(PartitionState::new(Vec::new(), None)))
            .collect();
        Self {
            inner: Arc::new(Inner {
                name: name.into(),
                dir: None,
                partitions,
                groups: Mutex::new(GroupOffsets::new()),
            }),
        }
    }

    /// Open or create a topic persisted under `root/<name>/`.
    ///
    /// # Errors
    /// I/O failures, corrupt segments, or a partition count that differs from
    /// the one the topic was created with.
    pub fn open(root: &Path, name: impl Into<String>, partitions: u32) -> Result<Self, LogError> {
        let name = name.into();
        let partitions = partitions.max(1);
        let dir = root.join(&name);
        fs::create_dir_all(&dir).map_err(io_err(&dir))?;

        let meta_path = dir.join("meta.json");
        match read_json::<TopicMeta>(&meta_path)? {
            Some(meta) if meta.partitions != partitions => {
                return Err(LogError::PartitionMismatch {
                    topic: name,
                    expected: partitions,
                    found: meta.partitions,
                });
            }
            Some(_) => {}
            None => write_json(&meta_path, &TopicMeta { partitions })?,
        }

        let mut parts = Vec::with_capacity(partitions as usize);
        let mut loaded = 0usize;
        for p in 0..partitions {
            let (segment, records) = Segment::open::<V>(&dir.join(format!("{p}.jsonl")))?;
            loaded += records.len();
            parts.push(Partition::new(PartitionState::new(records, Some(segment))));
        }
        let groups = read_json::<GroupOffsets>(&dir.join("groups.json"))?.unwrap_or_default();
        info!(topic = %name, partitions, records = loaded, dir = %dir.display(), "topic opened");

        Ok(Self {
            inner: Arc::new(Inner {
                name,
                dir: Some(dir),
                partitions: parts,
                groups: Mutex::new(groups),
            }),
        })
    }

    /// Topic name.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Number of partitions.
    pub fn partitions(&self) -> u32 {
        u32::try_from(self.inner.partitions.len()).unwrap_or(u32::MAX)
    }

    /// Partition `key` is stored in.
    pub fn partition_of(&self, key: &EntityId) -> u32 {
        partition_for(key, self.partitions())
    }

    fn partition(&self, partition: u32) -> Result<&Partition<V>, LogError> {
        self.inner
            .partitions
            .get(partition as usize)
            .ok_or_else(|| LogError::PartitionOutOfRange {
                topic: self.inner.name.clone(),
                partition,
                partitions: self.partitions(),
            })
    }

    /// Append a record for `key`; `None` writes a tombstone.
    ///
    /// # Errors
    /// Persistence failures. Nothing is appended when the write fails.
    pub fn append(
        &self,
        key: EntityId,
        value: Option<V>,
        timestamp: EventTime,
    ) -> Result<Record<V>, LogError> {
        let index = self.partition_of(&key);
        let partition = self.partition(index)?;
        let (record, end) = {
            let mut state = partition.lock();
            let record = Record {
                partition: index,
                offset: state.next_offset,
                key,
                value,
                timestamp,
            };
            if let Some(segment) = state.segment.as_mut() {
                segment.append(&record)?;
            }
            state.latest.insert(record.key.clone(), record.offset);
            state.records.push(record.clone());
            state.next_offset += 1;
            (record, state.next_offset)
        };
        partition.end.send_replace(end);
        Ok(record)
    }

    /// Append a value for `key`.
    ///
    /// # Errors
    /// See [`Topic::append`].
    pub fn send(&self, key: EntityId, value: V, timestamp: EventTime) -> Result<Record<V>, LogError> {
        self.append(key, Some(value), timestamp)
    }

    /// Append a delete marker for `key`.
    ///
    /// # Errors
    /// See [`Topic::append`].
    pub fn tombstone(&self, key: EntityId, timestamp: EventTime) -> Result<Record<V>, LogError> {
        self.append(key, None, timestamp)
    }

    /// Up to `max` records of `partition` starting at offset `from`.
    ///
    /// Offsets removed by compaction are skipped.
    ///
    /// # Errors
    /// Unknown partition.
    pub fn read(&self, partition: u32, from: u64, max: usize) -> Result<Vec<Record<V>>, LogError> {
        let state = self.partition(partition)?.lock();
        let start = state.position(from);
        Ok(state.records[start..].iter().take(max).cloned().collect())
    }

    /// Offset the next append to `partition` will receive.
    ///
    /// # Errors
    /// Unknown partition.
    pub fn end_offset(&self, partition: u32) -> Result<u64, LogError> {
        Ok(self.partition(partition)?.lock().next_offset)
    }

    /// Change feed for `partition`: yields the end offset after every append.
    ///
    /// # Errors
    /// Unknown partition.
    pub fn subscribe(&self, partition: u32) -> Result<watch::Receiver<u64>, LogError> {
        Ok(self.partition(partition)?.end.subscribe())
    }

    /// Record `offset` as the next position `group` reads from in `partition`.
    ///
    /// # Errors
    /// Unknown partition or persistence failures.
    pub fn commit(&self, group: &str, partition: u32, offset: u64) -> Result<(), LogError> {
        self.partition(partition)?;
        let mut groups = self
            .inner
            .groups
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        groups
            .entry(group.to_owned())
            .or_default()
            .insert(partition, offset);
        if let Some(dir) = &self.inner.dir {
            write_json(&dir.join("groups.json"), &*groups)?;
        }
        Ok(())
    }

    /// Last offset committed by `group` for `partition`.
    pub fn committed(&self, group: &str, partition: u32) -> Option<u64> {
        self.inner
            .groups
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(group)
            .and_then(|offsets| offsets.get(&partition).copied())
    }

    /// Latest live record for `key`; `None` if absent or tombstoned.
    pub fn latest(&self, key: &EntityId) -> Option<Record<V>> {
        let state = self.partition(self.partition_of(key)).ok()?.lock();
        let offset = *state.latest.get(key)?;
        state.at(offset).filter(|r| !r.is_tombstone()).cloned()
    }

    /// Live record per key across all partitions, ordered by key.
    pub fn snapshot(&self) -> Vec<Record<V>> {
        let mut live = BTreeMap::new();
        for partition in &self.inner.partitions {
            let state = partition.lock();
            for (key, offset) in &state.latest {
                if let Some(record) = state.at(*offset).filter(|r| !r.is_tombstone()) {
                    live.insert(key.clone(), record.clone());
                }
            }
        }
        live.into_values().collect()
    }

    /// Records currently retained across all partitions.
    pub fn record_count(&self) -> usize {
        self.inner.partitions.iter().map(|p| p.lock().records.len()).sum()
    }

    /// Drop every record superseded by a later one with the same key.
    ///
    /// Offsets of retained records are unchanged. Returns the number removed.
    ///
    /// # Errors
    /// Persistence failures while rewriting a segment.
    pub fn compact(&self) -> Result<usize, LogError> {
        let mut removed = 0;
        for partition in &self.inner.partitions {
            let mut guard = partition.lock();
            let PartitionState {
                records,
                latest,
                segment,
                ..
            } = &mut *guard;
            let before = records.len();
            records.retain(|r| latest.get(&r.key) == Some(&r.offset));
            let dropped = before - records.len();
            if dropped > 0 {
                if let Some(segment) = segment {
                    segment.rewrite(records)?;
                }
            }
            removed += dropped;
        }
        debug!(topic = %self.inner.name, removed, "compacted");
        Ok(removed)
    }
}
