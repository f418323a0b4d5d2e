// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Session-windowed PASS counting per entity.
//!
//! A session is a maximal run of verdicts for one entity where consecutive
//! verdicts are no more than `gap` apart. Sessions are indexed per partition by
//! `(entity, start)` with a secondary `(end, entity, start)` index, so lookup of
//! the neighbours of an event and eviction of expired sessions are both range
//! scans rather than walks over every open session.
//!
//! # Closure
//!
//! Closure is driven by stream time. A session `[start, end]` closes once
//! `end + gap < stream_time`; closing emits the final count followed by a
//! tombstone for the same window. Closed sessions are gone from the index, so
//! a key is never finalized twice for the same window.
//!
//! The end of each closed window is remembered until `end + gap` falls behind
//! the horizon. A verdict within the gap of a closed window is dropped as late
//! rather than opening a second session for the same span.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::debug;
use verdict_model::{EntityId, EventTime, ValidationResult};

/// Event-time span of a session, inclusive on both ends.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize)]
pub struct SessionWindow {
    /// First verdict in the session.
    pub start: EventTime,
    /// Last verdict in the session.
    pub end: EventTime,
}

impl SessionWindow {
    /// Zero-length window at `at`.
    pub const fn instant(at: EventTime) -> Self {
        Self { start: at, end: at }
    }

    /// Smallest window covering both.
    #[must_use]
    pub fn union(self, other: Self) -> Self {
        Self {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }

    /// Whether an event at `at` is within `gap` of this window.
    pub fn touches(&self, at: EventTime, gap: i64) -> bool {
        at >= self.start.minus_millis(gap) && at <= self.end.plus_millis(gap)
    }
}

/// A session's running PASS count.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct SessionAggregate {
    /// Grouping key.
    pub entity_id: EntityId,
    /// Span of the session.
    pub window: SessionWindow,
    /// PASS verdicts seen in the session.
    pub pass_count: u64,
}

/// Aggregator output: a final count, or the tombstone that retires it.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct AggregateUpdate {
    /// Grouping key.
    pub entity_id: EntityId,
    /// Window the update refers to.
    pub window: SessionWindow,
    /// `None` marks a tombstone.
    pub count: Option<u64>,
}

impl AggregateUpdate {
    /// True for the retirement marker.
    pub fn is_tombstone(&self) -> bool {
        self.count.is_none()
    }
}

/// What happened to an observed verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Observation {
    /// No session was within the gap; a new one was opened.
    Opened,
    /// Folded into the single neighbouring session.
    Extended,
    /// Bridged several sessions, which were merged into one.
    Merged {
        /// Number of pre-existing sessions merged.
        sessions: usize,
    },
    /// Older than the closure horizon, or within the gap of a session that
    /// already closed; dropped.
    Late,
}

/// Session merge function: counts add, an absent side takes the present one.
pub fn merge_counts(a: Option<u64>, b: Option<u64>) -> Option<u64> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.saturating_add(b)),
        (x, None) | (None, x) => x,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Slot {
    end: EventTime,
    pass_count: u64,
}

/// Interval index of open sessions for one partition.
#[derive(Debug, Default, Clone)]
pub struct SessionStore {
    by_key: BTreeMap<(EntityId, EventTime), Slot>,
    by_end: BTreeSet<(EventTime, EntityId, EventTime)>,
}

impl SessionStore {
    /// Number of open sessions.
    pub fn len(&self) -> usize {
        self.by_key.len()
    }

    /// True when no session is open.
    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }

    /// Open sessions for `key`, ordered by start.
    pub fn sessions_for(&self, key: &EntityId) -> Vec<SessionAggregate> {
        self.by_key
            .range((key.clone(), EventTime::MIN)..=(key.clone(), EventTime::MAX))
            .map(|((id, start), slot)| SessionAggregate {
                entity_id: id.clone(),
                window: SessionWindow {
                    start: *start,
                    end: slot.end,
                },
                pass_count: slot.pass_count,
            })
            .collect()
    }

    /// Every open session, ordered by `(entity, start)`.
    pub fn iter(&self) -> impl Iterator<Item = SessionAggregate> + '_ {
        self.by_key.iter().map(|((id, start), slot)| SessionAggregate {
            entity_id: id.clone(),
            window: SessionWindow {
                start: *start,
                end: slot.end,
            },
            pass_count: slot.pass_count,
        })
    }

    /// Remove and return the sessions of `key` whose span intersects `[lo, hi]`.
    fn take_overlapping(
        &mut self,
        key: &EntityId,
        lo: EventTime,
        hi: EventTime,
    ) -> Vec<(SessionWindow, u64)> {
        let found: Vec<(SessionWindow, u64)> = self
            .by_key
            .range((key.clone(), EventTime::MIN)..=(key.clone(), hi))
            .filter(|(_, slot)| slot.end >= lo)
            .map(|((_, start), slot)| {
                (
                    SessionWindow {
                        start: *start,
                        end: slot.end,
                    },
                    slot.pass_count,
                )
            })
            .collect();
        for (window, _) in &found {
            self.by_key.remove(&(key.clone(), window.start));
            self.by_end.remove(&(window.end, key.clone(), window.start));
        }
        found
    }

    fn insert(&mut self, key: EntityId, window: SessionWindow, pass_count: u64) {
        self.by_end.insert((window.end, key.clone(), window.start));
        self.by_key.insert(
            (key, window.start),
            Slot {
                end: window.end,
                pass_count,
            },
        );
    }

    /// Remove sessions ending before `horizon`, in `(end, entity, start)` order.
    fn pop_ended_before(&mut self, horizon: EventTime) -> Vec<SessionAggregate> {
        let mut closed = Vec::new();
        while let Some(first) = self.by_end.first().cloned() {
            if first.0 >= horizon {
                break;
            }
            self.by_end.remove(&first);
            let (end, entity_id, start) = first;
            if let Some(slot) = self.by_key.remove(&(entity_id.clone(), start)) {
                closed.push(SessionAggregate {
                    entity_id,
                    window: SessionWindow { start, end },
                    pass_count: slot.pass_count,
                });
            }
        }
        closed
    }
}

/// Ends of closed sessions that a late verdict could still reach.
#[derive(Debug, Default, Clone)]
struct Retired {
    by_key: BTreeSet<(EntityId, EventTime)>,
    by_end: BTreeSet<(EventTime, EntityId)>,
}

impl Retired {
    fn insert(&mut self, key: EntityId, end: EventTime) {
        self.by_end.insert((end, key.clone()));
        self.by_key.insert((key, end));
    }

    /// Whether `key` has a closed window ending at or after `since`.
    fn reaches(&self, key: &EntityId, since: EventTime) -> bool {
        self.by_key
            .range((key.clone(), since)..=(key.clone(), EventTime::MAX))
            .next()
            .is_some()
    }

    fn forget_before(&mut self, cutoff: EventTime) {
        while let Some(first) = self.by_end.first().cloned() {
            if first.0 >= cutoff {
                break;
            }
            self.by_end.remove(&first);
            let (end, key) = first;
            self.by_key.remove(&(key, end));
        }
    }

    fn iter(&self) -> impl Iterator<Item = (EntityId, EventTime)> + '_ {
        self.by_key.iter().cloned()
    }
}

/// Checkpoint form of a [`SessionAggregator`].
#[derive(Clone, PartialEq, Eq, Debug, Default, Serialize, Deserialize)]
pub struct SessionSnapshot {
    /// Closure horizon reached so far.
    pub horizon: Option<EventTime>,
    /// Open sessions, ordered by `(entity, start)`.
    pub sessions: Vec<SessionAggregate>,
    /// `(entity, end)` of closed sessions still within reach of the horizon.
    #[serde(default)]
    pub retired: Vec<(EntityId, EventTime)>,
}

/// Per-partition windowed evidence aggregator.
#[derive(Debug, Clone)]
pub struct SessionAggregator {
    gap: i64,
    store: SessionStore,
    retired: Retired,
    horizon: Option<EventTime>,
}

impl SessionAggregator {
    /// Empty aggregator with the given inactivity gap (milliseconds).
    pub fn new(gap_ms: i64) -> Self {
        Self {
            gap: gap_ms,
            store: SessionStore::default(),
            retired: Retired::default(),
            horizon: None,
        }
    }

    /// Inactivity gap in milliseconds.
    pub fn gap(&self) -> i64 {
        self.gap
    }

    /// Open sessions.
    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    /// Fold one verdict into the sessions of its entity.
    ///
    /// FAIL verdicts extend or open a session without counting. A verdict whose
    /// own session would already be past closure is dropped as late.
    pub fn observe(&mut self, result: &ValidationResult, at: EventTime) -> Observation {
        if self.horizon.is_some_and(|h| at < h) {
            debug!(entity = %result.entity_id, %at, "late verdict dropped");
            return Observation::Late;
        }
        let key = &result.entity_id;
        if self.retired.reaches(key, at.minus_millis(self.gap)) {
            debug!(entity = %key, %at, "verdict reaches a closed session; dropped");
            return Observation::Late;
        }
        let neighbours =
            self.store
                .take_overlapping(key, at.minus_millis(self.gap), at.plus_millis(self.gap));
        let own = Some(u64::from(result.is_pass()));
        let (window, count) = neighbours.iter().fold(
            (SessionWindow::instant(at), own),
            |(window, count), (other, other_count)| {
                (window.union(*other), merge_counts(count, Some(*other_count)))
            },
        );
        self.store.insert(key.clone(), window, count.unwrap_or(0));
        match neighbours.len() {
            0 => Observation::Opened,
            1 => Observation::Extended,
            sessions => Observation::Merged { sessions },
        }
    }

    /// Close every session whose inactivity gap has elapsed by `stream_time`.
    ///
    /// Each closed session yields its final count followed immediately by its
    /// tombstone.
    pub fn close_expired(&mut self, stream_time: EventTime) -> Vec<AggregateUpdate> {
        let horizon = stream_time.minus_millis(self.gap);
        if self.horizon.is_some_and(|h| horizon <= h) {
            return Vec::new();
        }
        self.horizon = Some(horizon);
        // Verdicts at or after the horizon cannot reach windows ending before this.
        self.retired.forget_before(horizon.minus_millis(self.gap));
        let closed = self.store.pop_ended_before(horizon);
        let mut updates = Vec::with_capacity(closed.len() * 2);
        for agg in closed {
            self.retired.insert(agg.entity_id.clone(), agg.window.end);
            debug!(
                entity = %agg.entity_id,
                start = %agg.window.start,
                end = %agg.window.end,
                passes = agg.pass_count,
                "session closed"
            );
            updates.push(AggregateUpdate {
                entity_id: agg.entity_id.clone(),
                window: agg.window,
                count: Some(agg.pass_count),
            });
            updates.push(AggregateUpdate {
                entity_id: agg.entity_id,
                window: agg.window,
                count: None,
            });
        }
        updates
    }

    /// Capture state for a checkpoint.
    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            horizon: self.horizon,
            sessions: self.store.iter().collect(),
            retired: self.retired.iter().collect(),
        }
    }

    /// Rebuild from a checkpoint.
    pub fn restore(gap_ms: i64, snapshot: SessionSnapshot) -> Self {
        let mut agg = Self::new(gap_ms);
        agg.horizon = snapshot.horizon;
        for s in snapshot.sessions {
            agg.store.insert(s.entity_id, s.window, s.pass_count);
        }
        for (key, end) in snapshot.retired {
            agg.retired.insert(key, end);
        }
        agg
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use verdict_model::{RuleOutcome, ValidationCheck};

    const MIN: i64 = 60_000;
    const GAP: i64 = 5 * MIN;

    fn id(s: &str) -> EntityId {
        EntityId::new(s).unwrap()
    }

    fn verdict(key: &str, outcome: RuleOutcome) -> ValidationResult {
        ValidationResult::new(id(key), ValidationCheck::InventoryCheck, outcome)
    }

    fn t(minutes: i64) -> EventTime {
        EventTime::from_millis(minutes * MIN)
    }

    #[test]
    fn passes_four_minutes_apart_share_a_session() {
        let mut agg = SessionAggregator::new(GAP);
        assert_eq!(agg.observe(&verdict("a", RuleOutcome::Pass), t(0)), Observation::Opened);
        assert_eq!(agg.observe(&verdict("a", RuleOutcome::Pass), t(4)), Observation::Extended);
        let sessions = agg.store().sessions_for(&id("a"));
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].pass_count, 2);
        assert_eq!(sessions[0].window, SessionWindow { start: t(0), end: t(4) });
    }

    #[test]
    fn passes_six_minutes_apart_form_two_sessions() {
        let mut agg = SessionAggregator::new(GAP);
        agg.observe(&verdict("a", RuleOutcome::Pass), t(0));
        assert_eq!(agg.observe(&verdict("a", RuleOutcome::Pass), t(6)), Observation::Opened);
        let counts: Vec<u64> = agg
            .store()
            .sessions_for(&id("a"))
            .iter()
            .map(|s| s.pass_count)
            .collect();
        assert_eq!(counts, vec![1, 1]);
    }

    #[test]
    fn fail_extends_without_counting() {
        let mut agg = SessionAggregator::new(GAP);
        agg.observe(&verdict("a", RuleOutcome::Pass), t(0));
        agg.observe(&verdict("a", RuleOutcome::Fail), t(4));
        agg.observe(&verdict("a", RuleOutcome::Pass), t(8));
        let sessions = agg.store().sessions_for(&id("a"));
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].pass_count, 2);
        assert_eq!(sessions[0].window.end, t(8));
    }

    #[test]
    fn late_bridge_sums_both_sessions() {
        let mut agg = SessionAggregator::new(GAP);
        agg.observe(&verdict("a", RuleOutcome::Pass), t(0));
        agg.observe(&verdict("a", RuleOutcome::Pass), t(1));
        agg.observe(&verdict("a", RuleOutcome::Pass), t(8));
        assert_eq!(agg.store().len(), 2);
        let obs = agg.observe(&verdict("a", RuleOutcome::Fail), t(4));
        assert_eq!(obs, Observation::Merged { sessions: 2 });
        let sessions = agg.store().sessions_for(&id("a"));
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].pass_count, 3);
        assert_eq!(sessions[0].window, SessionWindow { start: t(0), end: t(8) });
    }

    #[test]
    fn keys_do_not_share_sessions() {
        let mut agg = SessionAggregator::new(GAP);
        agg.observe(&verdict("a", RuleOutcome::Pass), t(0));
        assert_eq!(agg.observe(&verdict("b", RuleOutcome::Pass), t(0)), Observation::Opened);
        assert_eq!(agg.store().len(), 2);
    }

    #[test]
    fn closure_emits_final_then_tombstone_once() {
        let mut agg = SessionAggregator::new(GAP);
        agg.observe(&verdict("a", RuleOutcome::Pass), t(0));
        agg.observe(&verdict("a", RuleOutcome::Pass), t(1));
        // exactly end + gap: still open
        assert!(agg.close_expired(t(6)).is_empty());
        let updates = agg.close_expired(t(6).plus_millis(1));
        assert_eq!(updates.len(), 2);
        assert_eq!(updates[0].count, Some(2));
        assert!(updates[1].is_tombstone());
        assert_eq!(updates[0].window, updates[1].window);
        assert!(agg.close_expired(t(60)).is_empty());
        assert!(agg.store().is_empty());
    }

    #[test]
    fn verdict_behind_horizon_is_late() {
        let mut agg = SessionAggregator::new(GAP);
        agg.observe(&verdict("a", RuleOutcome::Pass), t(10));
        agg.close_expired(t(20));
        assert_eq!(agg.observe(&verdict("b", RuleOutcome::Pass), t(14)), Observation::Late);
        assert_eq!(agg.observe(&verdict("b", RuleOutcome::Pass), t(15)), Observation::Opened);
    }

    #[test]
    fn verdict_reaching_a_closed_session_is_late() {
        let mut agg = SessionAggregator::new(GAP);
        agg.observe(&verdict("a", RuleOutcome::Pass), t(0));
        agg.observe(&verdict("a", RuleOutcome::Pass), t(1));
        let closed = agg.close_expired(t(6).plus_millis(1));
        assert_eq!(closed[0].count, Some(2));
        // not behind the horizon, which is t(1) + 1ms
        let straggler = t(1).plus_millis(1);
        assert_eq!(agg.observe(&verdict("a", RuleOutcome::Pass), straggler), Observation::Late);
        assert!(agg.store().is_empty());
        // other keys are unaffected
        assert_eq!(agg.observe(&verdict("b", RuleOutcome::Pass), straggler), Observation::Opened);
    }

    #[test]
    fn closed_windows_are_forgotten_once_out_of_reach() {
        let mut agg = SessionAggregator::new(GAP);
        agg.observe(&verdict("a", RuleOutcome::Pass), t(0));
        agg.close_expired(t(6));
        assert_eq!(agg.snapshot().retired, vec![(id("a"), t(0))]);
        // horizon t(10): a verdict at or after it cannot reach an end at t(0)
        agg.close_expired(t(15));
        assert!(agg.snapshot().retired.is_empty());
        assert_eq!(agg.observe(&verdict("a", RuleOutcome::Pass), t(10)), Observation::Opened);
    }

    #[test]
    fn snapshot_restore_preserves_sessions_and_horizon() {
        let mut agg = SessionAggregator::new(GAP);
        agg.observe(&verdict("a", RuleOutcome::Pass), t(0));
        agg.observe(&verdict("b", RuleOutcome::Pass), t(20));
        agg.close_expired(t(21));
        let snap = agg.snapshot();
        assert_eq!(snap.retired, vec![(id("a"), t(0))]);
        let json = serde_json::to_string(&snap).unwrap();
        let restored = SessionAggregator::restore(GAP, serde_json::from_str(&json).unwrap());
        assert_eq!(restored.snapshot(), snap);
        assert_eq!(restored.store().len(), 1);
    }

    #[test]
    fn merge_counts_takes_present_side() {
        assert_eq!(merge_counts(Some(2), Some(3)), Some(5));
        assert_eq!(merge_counts(Some(2), None), Some(2));
        assert_eq!(merge_counts(None, Some(4)), Some(4));
        assert_eq!(merge_counts(None, None), None);
    }
}
