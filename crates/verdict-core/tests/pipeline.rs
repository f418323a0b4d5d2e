// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>

#![allow(missing_docs, clippy::unwrap_used)]
//! End-to-end behaviour of both graphs over single-partition timelines.

use verdict_core::{build_graph, EngineConfig, GraphKind};
use verdict_dry_tests::{minutes, order, Scenario, RULES};
use verdict_model::{EntityState, TransitionKind, ValidationCheck};

fn validated_by_three(key: &str, at: [i64; 3]) -> Scenario {
    let mut s = Scenario::new().order(minutes(at[0]), key);
    for (check, m) in RULES.into_iter().zip(at) {
        s = s.pass(minutes(m), key, check);
    }
    s
}

#[test]
fn three_passes_validate_exactly_once() {
    let outcome = validated_by_three("o-1", [1, 2, 3])
        .pass(minutes(3), "o-1", ValidationCheck::Other("AUDIT".into()))
        .tick(minutes(9))
        .tick(minutes(120))
        .run(&EngineConfig::default());
    assert_eq!(outcome.count("o-1", TransitionKind::Validated), 1);
    assert_eq!(outcome.count("o-1", TransitionKind::Failed), 0);
    assert_eq!(outcome.state_of("o-1"), Some(EntityState::Validated));
    assert_eq!(outcome.pass.gated, 1);
}

#[test]
fn validation_waits_for_the_session_to_close() {
    let cfg = EngineConfig::default();
    let open = validated_by_three("o-1", [0, 1, 2]).tick(minutes(7)).run(&cfg);
    assert!(open.transitions.is_empty());
    let closed = validated_by_three("o-1", [0, 1, 2])
        .tick(minutes(7).plus_millis(1))
        .run(&cfg);
    assert_eq!(closed.count("o-1", TransitionKind::Validated), 1);
    assert_eq!(closed.transitions[0].at, minutes(2));
}

#[test]
fn validated_record_carries_the_original_payload() {
    let outcome = validated_by_three("o-1", [0, 1, 2])
        .tick(minutes(30))
        .run(&EngineConfig::default());
    let record = outcome.table.get(&verdict_dry_tests::id("o-1")).unwrap();
    assert_eq!(record.payload, order("o-1").payload);
    assert_eq!(record.state, EntityState::Validated);
}

#[test]
fn four_minute_spacing_is_one_session() {
    let outcome = Scenario::new()
        .order(minutes(4), "o-2")
        .pass(minutes(0), "o-2", RULES[0].clone())
        .pass(minutes(4), "o-2", RULES[1].clone())
        .pass(minutes(8), "o-2", RULES[2].clone())
        .tick(minutes(60))
        .run(&EngineConfig::default());
    assert_eq!(outcome.pass.sessions_closed, 1);
    assert_eq!(outcome.count("o-2", TransitionKind::Validated), 1);
}

#[test]
fn six_minute_spacing_never_validates() {
    let outcome = Scenario::new()
        .order(minutes(0), "o-3")
        .pass(minutes(0), "o-3", RULES[0].clone())
        .pass(minutes(6), "o-3", RULES[1].clone())
        .pass(minutes(12), "o-3", RULES[2].clone())
        .tick(minutes(60))
        .run(&EngineConfig::default());
    assert_eq!(outcome.pass.sessions_closed, 3);
    assert_eq!(outcome.pass.gated, 0);
    assert!(outcome.transitions.is_empty());
    assert_eq!(outcome.state_of("o-3"), None);
}

#[test]
fn below_threshold_session_only_tombstones() {
    let outcome = Scenario::new()
        .order(minutes(0), "o-4")
        .pass(minutes(1), "o-4", RULES[0].clone())
        .pass(minutes(2), "o-4", RULES[1].clone())
        .tick(minutes(60))
        .run(&EngineConfig::default());
    assert_eq!(outcome.pass.sessions_closed, 1);
    assert_eq!(outcome.pass.tombstones, 1);
    assert_eq!(outcome.pass.gated, 0);
    assert!(outcome.transitions.is_empty());
}

#[test]
fn trailing_fail_keeps_the_session_open() {
    // the FAIL at 6 stretches [1, 2] to [1, 6] so the PASS at 10 still lands in it
    let outcome = Scenario::new()
        .order(minutes(5), "o-5")
        .pass(minutes(1), "o-5", RULES[0].clone())
        .pass(minutes(2), "o-5", RULES[1].clone())
        .fail(minutes(6), "o-5", ValidationCheck::Other("SHADOW".into()))
        .pass(minutes(10), "o-5", RULES[2].clone())
        .tick(minutes(60))
        .run(&EngineConfig::default());
    assert_eq!(outcome.pass.sessions_closed, 1);
    assert_eq!(outcome.pass.gated, 1);
    // the fail path is independent of the pass path
    assert_eq!(outcome.count("o-5", TransitionKind::Failed), 1);
}

#[test]
fn out_of_order_verdicts_land_in_one_session() {
    let outcome = Scenario::new()
        .order(minutes(2), "o-6")
        .pass(minutes(4), "o-6", RULES[0].clone())
        .pass(minutes(0), "o-6", RULES[1].clone())
        .pass(minutes(2), "o-6", RULES[2].clone())
        .tick(minutes(60))
        .run(&EngineConfig::default());
    assert_eq!(outcome.pass.late_dropped, 0);
    assert_eq!(outcome.count("o-6", TransitionKind::Validated), 1);
}

#[test]
fn verdict_after_its_session_closed_is_dropped_not_split_off() {
    // Unrelated traffic pushes stream time past o-a's session before its
    // third verdict arrives; that verdict is still within the gap of the
    // closed window, so it must not start a second session.
    let outcome = Scenario::new()
        .order(minutes(0), "o-a")
        .pass(minutes(0), "o-a", RULES[0].clone())
        .pass(minutes(1), "o-a", RULES[1].clone())
        .order(minutes(6).plus_millis(1), "o-b")
        .pass(minutes(1).plus_millis(1), "o-a", RULES[2].clone())
        .tick(minutes(60))
        .run(&EngineConfig::default());
    assert_eq!(outcome.pass.sessions_closed, 1);
    assert_eq!(outcome.pass.late_dropped, 1);
    assert_eq!(outcome.count("o-a", TransitionKind::Validated), 0);
}

#[test]
fn verdict_beyond_the_gap_of_a_closed_session_starts_a_new_one() {
    let outcome = Scenario::new()
        .order(minutes(0), "o-a")
        .pass(minutes(0), "o-a", RULES[0].clone())
        .order(minutes(6).plus_millis(1), "o-b")
        .pass(minutes(5).plus_millis(1), "o-a", RULES[1].clone())
        .tick(minutes(60))
        .run(&EngineConfig::default());
    assert_eq!(outcome.pass.late_dropped, 0);
    assert_eq!(outcome.pass.sessions_closed, 2);
    assert!(outcome.transitions.is_empty());
}

#[test]
fn repeated_failures_emit_one_failed_record() {
    let mut s = Scenario::new().order(minutes(0), "o-7");
    for (i, check) in RULES.into_iter().enumerate() {
        s = s.fail(minutes(1 + i64::try_from(i).unwrap()), "o-7", check);
    }
    let outcome = s.tick(minutes(60)).run(&EngineConfig::default());
    assert_eq!(outcome.count("o-7", TransitionKind::Failed), 1);
    assert_eq!(outcome.fail.dedup_absorbed, 2);
    assert_eq!(outcome.state_of("o-7"), Some(EntityState::Failed));
}

#[test]
fn failure_before_order_still_joins() {
    let outcome = Scenario::new()
        .fail(minutes(0), "o-8", RULES[1].clone())
        .order(minutes(3), "o-8")
        .run(&EngineConfig::default());
    assert_eq!(outcome.count("o-8", TransitionKind::Failed), 1);
}

#[test]
fn missing_order_is_a_join_miss_not_an_error() {
    let outcome = validated_by_three("ghost", [0, 1, 2])
        .fail(minutes(3), "ghost-2", RULES[0].clone())
        .tick(minutes(120))
        .run(&EngineConfig::default());
    // only ghost has an order; it validates, ghost-2 never does
    assert_eq!(outcome.count("ghost", TransitionKind::Validated), 1);
    assert_eq!(outcome.count("ghost-2", TransitionKind::Failed), 0);
    assert_eq!(outcome.fail.join_misses, 1);

    let orphan = Scenario::new()
        .pass(minutes(0), "orphan", RULES[0].clone())
        .pass(minutes(1), "orphan", RULES[1].clone())
        .pass(minutes(2), "orphan", RULES[2].clone())
        .tick(minutes(120))
        .run(&EngineConfig::default());
    assert!(orphan.transitions.is_empty());
    assert_eq!(orphan.pass.gated, 1);
    assert_eq!(orphan.pass.join_misses, 1);
}

#[test]
fn order_outside_skew_does_not_join() {
    let outcome = Scenario::new()
        .order(minutes(0), "o-9")
        .pass(minutes(7), "o-9", RULES[0].clone())
        .pass(minutes(8), "o-9", RULES[1].clone())
        .pass(minutes(9), "o-9", RULES[2].clone())
        .tick(minutes(120))
        .run(&EngineConfig::default());
    assert!(outcome.transitions.is_empty());
    assert_eq!(outcome.pass.join_misses, 1);
}

#[test]
fn non_created_orders_are_ignored() {
    let outcome = Scenario::new()
        .entity(minutes(0), order("o-10").with_state(EntityState::Shipped))
        .fail(minutes(1), "o-10", RULES[0].clone())
        .tick(minutes(120))
        .run(&EngineConfig::default());
    assert!(outcome.transitions.is_empty());
    assert_eq!(outcome.fail.entities_filtered, 1);
}

#[test]
fn higher_rule_count_needs_more_passes() {
    let cfg = EngineConfig {
        required_rule_count: 4,
        ..EngineConfig::default()
    };
    let three = validated_by_three("o-11", [0, 1, 2]).tick(minutes(60)).run(&cfg);
    assert!(three.transitions.is_empty());
    let four = validated_by_three("o-11", [0, 1, 2])
        .pass(minutes(3), "o-11", ValidationCheck::Other("AUDIT".into()))
        .tick(minutes(60))
        .run(&cfg);
    assert_eq!(four.count("o-11", TransitionKind::Validated), 1);
}

#[test]
fn replay_is_deterministic() {
    let scenario = validated_by_three("a", [0, 1, 2])
        .order(minutes(1), "b")
        .fail(minutes(2), "b", RULES[0].clone())
        .fail(minutes(3), "b", RULES[2].clone())
        .tick(minutes(60));
    let cfg = EngineConfig::default();
    let first = scenario.run(&cfg);
    let second = scenario.run(&cfg);
    assert_eq!(first.transitions, second.transitions);
    assert_eq!(first.table, second.table);
    assert_eq!(first.pass, second.pass);
    assert_eq!(first.fail, second.fail);
}

#[test]
fn resuming_from_a_snapshot_matches_an_uninterrupted_run() {
    let cfg = EngineConfig::default();
    let head = Scenario::new()
        .order(minutes(0), "a")
        .order(minutes(0), "b")
        .pass(minutes(1), "a", RULES[0].clone())
        .fail(minutes(1), "b", RULES[0].clone());
    let tail = Scenario::new()
        .pass(minutes(2), "a", RULES[1].clone())
        .fail(minutes(2), "b", RULES[1].clone())
        .pass(minutes(3), "a", RULES[2].clone())
        .tick(minutes(60));

    for kind in GraphKind::ALL {
        let mut straight = build_graph(kind, &cfg);
        let mut expected = head.run_graph(straight.as_mut());
        expected.extend(tail.run_graph(straight.as_mut()));

        let mut before = build_graph(kind, &cfg);
        let mut resumed_out = head.run_graph(before.as_mut());
        let snapshot = before.snapshot().unwrap();
        let mut after = build_graph(kind, &cfg);
        after.restore(snapshot).unwrap();
        resumed_out.extend(tail.run_graph(after.as_mut()));

        assert_eq!(expected, resumed_out, "{kind} graph diverged after restore");
        assert_eq!(straight.stats(), after.stats());
        assert_eq!(straight.snapshot().unwrap(), after.snapshot().unwrap());
    }
}
