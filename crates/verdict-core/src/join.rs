// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Event-time windowed stream-stream inner join, keyed by entity id.
//!
//! A left record at `t` matches right records at `[t - before, t + after]`, and
//! a right record at `t` matches left records at `[t - after, t + before]`.
//! Both sides are buffered until stream time moves past
//! `t + max(before, after) + grace`; records already behind that horizon on
//! arrival are dropped as late.
//!
//! A left record evicted without ever matching is a join miss. Misses are
//! returned from [`WindowedJoin::expire`] so callers can count them; they are
//! ordinary control flow, not errors.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use verdict_model::{EntityId, EventTime};

/// Join window bounds in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinWindow {
    /// How far a right record may precede a left one.
    pub before_ms: i64,
    /// How far a right record may follow a left one.
    pub after_ms: i64,
    /// Extra buffer retention past the window.
    pub grace_ms: i64,
}

impl JoinWindow {
    /// Same tolerance in both directions.
    pub fn symmetric(skew_ms: i64, grace_ms: i64) -> Self {
        Self {
            before_ms: skew_ms.max(0),
            after_ms: skew_ms.max(0),
            grace_ms: grace_ms.max(0),
        }
    }

    fn retention(&self) -> i64 {
        self.before_ms.max(self.after_ms).saturating_add(self.grace_ms)
    }
}

/// A matched pair. `at` is the later of both sides' event times.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Joined<L, R> {
    /// Join key.
    pub key: EntityId,
    /// Left value.
    pub left: L,
    /// Right value.
    pub right: R,
    /// Event time of the result.
    pub at: EventTime,
}

/// Result of offering a record to one side of the join.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Arrival<L, R> {
    /// Buffered; carries any matches against the other side (possibly none).
    Accepted(Vec<Joined<L, R>>),
    /// Behind the retention horizon; dropped.
    Late,
}

/// A buffered record, as evicted or checkpointed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Buffered<V> {
    /// Join key.
    pub key: EntityId,
    /// Event time.
    pub at: EventTime,
    /// Arrival sequence, disambiguating equal `(key, at)` pairs.
    pub seq: u64,
    /// Payload.
    pub value: V,
    /// Whether it ever matched the other side.
    pub matched: bool,
}

#[derive(Debug, Clone)]
struct Entry<V> {
    value: V,
    matched: bool,
}

#[derive(Debug, Clone)]
struct SideBuffer<V> {
    entries: BTreeMap<(EntityId, EventTime, u64), Entry<V>>,
    by_time: BTreeSet<(EventTime, u64, EntityId)>,
}

impl<V> Default for SideBuffer<V> {
    fn default() -> Self {
        Self {
            entries: BTreeMap::new(),
            by_time: BTreeSet::new(),
        }
    }
}

impl<V: Clone> SideBuffer<V> {
    fn insert(&mut self, key: EntityId, at: EventTime, seq: u64, value: V, matched: bool) {
        self.by_time.insert((at, seq, key.clone()));
        self.entries.insert((key, at, seq), Entry { value, matched });
    }

    fn in_range(
        &mut self,
        key: &EntityId,
        lo: EventTime,
        hi: EventTime,
    ) -> impl Iterator<Item = (EventTime, &mut Entry<V>)> + '_ {
        self.entries
            .range_mut((key.clone(), lo, 0)..=(key.clone(), hi, u64::MAX))
            .map(|((_, at, _), entry)| (*at, entry))
    }

    fn evict_before(&mut self, horizon: EventTime) -> Vec<Buffered<V>> {
        let mut evicted = Vec::new();
        while let Some(first) = self.by_time.first().cloned() {
            if first.0 >= horizon {
                break;
            }
            self.by_time.remove(&first);
            let (at, seq, key) = first;
            if let Some(entry) = self.entries.remove(&(key.clone(), at, seq)) {
                evicted.push(Buffered {
                    key,
                    at,
                    seq,
                    value: entry.value,
                    matched: entry.matched,
                });
            }
        }
        evicted
    }

    fn to_vec(&self) -> Vec<Buffered<V>> {
        self.entries
            .iter()
            .map(|((key, at, seq), entry)| Buffered {
                key: key.clone(),
                at: *at,
                seq: *seq,
                value: entry.value.clone(),
                matched: entry.matched,
            })
            .collect()
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Checkpoint form of a [`WindowedJoin`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinSnapshot<L, R> {
    /// Retention horizon reached so far.
    pub horizon: Option<EventTime>,
    /// Next arrival sequence number.
    pub next_seq: u64,
    /// Buffered left records.
    pub left: Vec<Buffered<L>>,
    /// Buffered right records.
    pub right: Vec<Buffered<R>>,
}

/// Windowed inner join of a left and a right stream on entity id.
#[derive(Debug, Clone)]
pub struct WindowedJoin<L, R> {
    window: JoinWindow,
    left: SideBuffer<L>,
    right: SideBuffer<R>,
    horizon: Option<EventTime>,
    next_seq: u64,
}

impl<L: Clone, R: Clone> WindowedJoin<L, R> {
    /// Empty join over `window`.
    pub fn new(window: JoinWindow) -> Self {
        Self {
            window,
            left: SideBuffer::default(),
            right: SideBuffer::default(),
            horizon: None,
            next_seq: 0,
        }
    }

    /// Window bounds.
    pub fn window(&self) -> JoinWindow {
        self.window
    }

    /// Buffered record counts `(left, right)`.
    pub fn buffered(&self) -> (usize, usize) {
        (self.left.len(), self.right.len())
    }

    fn is_late(&self, at: EventTime) -> bool {
        self.horizon.is_some_and(|h| at < h)
    }

    fn alloc_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }

    /// Offer a left record.
    pub fn on_left(&mut self, key: &EntityId, at: EventTime, value: L) -> Arrival<L, R> {
        if self.is_late(at) {
            return Arrival::Late;
        }
        let lo = at.minus_millis(self.window.before_ms);
        let hi = at.plus_millis(self.window.after_ms);
        let mut out = Vec::new();
        for (right_at, entry) in self.right.in_range(key, lo, hi) {
            entry.matched = true;
            out.push(Joined {
                key: key.clone(),
                left: value.clone(),
                right: entry.value.clone(),
                at: at.max(right_at),
            });
        }
        let seq = self.alloc_seq();
        let matched = !out.is_empty();
        self.left.insert(key.clone(), at, seq, value, matched);
        Arrival::Accepted(out)
    }

    /// Offer a right record.
    pub fn on_right(&mut self, key: &EntityId, at: EventTime, value: R) -> Arrival<L, R> {
        if self.is_late(at) {
            return Arrival::Late;
        }
        let lo = at.minus_millis(self.window.after_ms);
        let hi = at.plus_millis(self.window.before_ms);
        let mut out = Vec::new();
        for (left_at, entry) in self.left.in_range(key, lo, hi) {
            entry.matched = true;
            out.push(Joined {
                key: key.clone(),
                left: entry.value.clone(),
                right: value.clone(),
                at: at.max(left_at),
            });
        }
        let seq = self.alloc_seq();
        let matched = !out.is_empty();
        self.right.insert(key.clone(), at, seq, value, matched);
        Arrival::Accepted(out)
    }

    /// Evict both sides up to the retention horizon for `stream_time`.
    ///
    /// Returns the evicted left records that never matched (join misses).
    pub fn expire(&mut self, stream_time: EventTime) -> Vec<Buffered<L>> {
        let horizon = stream_time.minus_millis(self.window.retention());
        if self.horizon.is_some_and(|h| horizon <= h) {
            return Vec::new();
        }
        self.horizon = Some(horizon);
        self.right.evict_before(horizon);
        self.left
            .evict_before(horizon)
            .into_iter()
            .filter(|b| !b.matched)
            .collect()
    }

    /// Capture state for a checkpoint.
    pub fn snapshot(&self) -> JoinSnapshot<L, R> {
        JoinSnapshot {
            horizon: self.horizon,
            next_seq: self.next_seq,
            left: self.left.to_vec(),
            right: self.right.to_vec(),
        }
    }

    /// Rebuild from a checkpoint.
    pub fn restore(window: JoinWindow, snapshot: JoinSnapshot<L, R>) -> Self {
        let mut join = Self::new(window);
        join.horizon = snapshot.horizon;
        join.next_seq = snapshot.next_seq;
        for b in snapshot.left {
            join.left.insert(b.key, b.at, b.seq, b.value, b.matched);
        }
        for b in snapshot.right {
            join.right.insert(b.key, b.at, b.seq, b.value, b.matched);
        }
        join
    }
}
