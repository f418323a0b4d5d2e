// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>

#![allow(missing_docs, clippy::unwrap_used, clippy::expect_used)]
//! Engine lifecycle against in-memory and on-disk logs.

use std::sync::Arc;
use std::time::Duration;

use tokio::time;
use verdict_core::{EngineConfig, GraphKind};
use verdict_dry_tests::{fail, id, minutes, order, pass, MemoryStateStore, RULES};
use verdict_engine::{Checkpoint, Engine, EngineError, CHECKPOINT_VERSION};
use verdict_log::Broker;
use verdict_model::EntityState;

fn config() -> EngineConfig {
    EngineConfig {
        partitions: 1,
        commit_interval_ms: 20,
        punctuate_interval_ms: 20,
        wall_clock_punctuation: false,
        startup_timeout_ms: 5_000,
        restart_backoff_ms: 10,
        ..EngineConfig::default()
    }
}

async fn eventually(mut check: impl FnMut() -> bool) {
    time::timeout(Duration::from_secs(5), async {
        while !check() {
            time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached within 5s");
}

fn state_of(broker: &Broker, key: &str) -> Option<EntityState> {
    broker
        .orders()
        .latest(&id(key))
        .and_then(|r| r.value)
        .map(|e| e.state)
}

fn written(broker: &Broker, state: EntityState) -> usize {
    broker
        .orders()
        .read(0, 0, usize::MAX)
        .unwrap()
        .into_iter()
        .filter(|r| r.value.as_ref().is_some_and(|e| e.state == state))
        .count()
}

#[tokio::test]
async fn passes_validate_through_the_log() {
    let broker = Broker::in_memory(1);
    let store = MemoryStateStore::new();
    let engine = Engine::start_with(config(), broker.clone(), Arc::new(store.clone()))
        .await
        .unwrap();

    broker.orders().send(id("o-1"), order("o-1"), minutes(0)).unwrap();
    for (m, check) in (1..).zip(RULES) {
        broker.validations().send(id("o-1"), pass("o-1", check), minutes(m)).unwrap();
    }
    // an unrelated order moves stream time past the session gap
    broker.orders().send(id("clock"), order("clock"), minutes(20)).unwrap();

    eventually(|| state_of(&broker, "o-1") == Some(EntityState::Validated)).await;
    let stats = engine.stats();
    assert_eq!(stats.pass.gated, 1);
    assert_eq!(stats.pass.transitions_emitted, 1);

    engine.stop().await.unwrap();
    assert_eq!(written(&broker, EntityState::Validated), 1);
    let cp = store.get(GraphKind::Pass, 0).unwrap();
    assert_eq!(cp.validations_offset, 3);
    assert_eq!(broker.validations().committed(GraphKind::Pass.consumer_group(), 0), Some(3));
}

#[tokio::test]
async fn failures_are_written_once_across_restarts() {
    let broker = Broker::in_memory(1);
    let store = MemoryStateStore::new();

    let engine = Engine::start_with(config(), broker.clone(), Arc::new(store.clone()))
        .await
        .unwrap();
    broker.orders().send(id("o-2"), order("o-2"), minutes(0)).unwrap();
    broker
        .validations()
        .send(id("o-2"), fail("o-2", RULES[0].clone()), minutes(1))
        .unwrap();
    eventually(|| state_of(&broker, "o-2") == Some(EntityState::Failed)).await;
    engine.stop().await.unwrap();

    let engine = Engine::start_with(config(), broker.clone(), Arc::new(store.clone()))
        .await
        .unwrap();
    broker
        .validations()
        .send(id("o-2"), fail("o-2", RULES[1].clone()), minutes(2))
        .unwrap();
    eventually(|| engine.stats().fail.validations_seen == 2).await;
    assert_eq!(engine.stats().fail.dedup_absorbed, 1);
    engine.stop().await.unwrap();

    assert_eq!(written(&broker, EntityState::Failed), 1);
}

#[tokio::test]
async fn corrupt_checkpoint_fails_startup() {
    let store = MemoryStateStore::new();
    store.put(Checkpoint {
        version: CHECKPOINT_VERSION,
        graph: GraphKind::Pass,
        partition: 0,
        validations_offset: 0,
        entities_offset: 0,
        state: serde_json::json!({"kind": "fail"}),
    });
    let err = Engine::start_with(config(), Broker::in_memory(1), Arc::new(store))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::PartitionFailed { ref worker, .. } if worker == "pass/0"));
}

#[tokio::test]
async fn unreadable_state_times_out_startup() {
    let store = MemoryStateStore::new();
    store.set_fail_on_load(true);
    let cfg = EngineConfig {
        startup_timeout_ms: 200,
        max_partition_restarts: 1_000,
        ..config()
    };
    let err = Engine::start_with(cfg, Broker::in_memory(1), Arc::new(store))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::StartupTimeout { ready: 0, expected: 2, .. }
    ));
}

#[tokio::test]
async fn state_store_failure_fails_the_partition() {
    let broker = Broker::in_memory(1);
    let store = MemoryStateStore::new();
    let cfg = EngineConfig {
        max_partition_restarts: 1,
        ..config()
    };
    let engine = Engine::start_with(cfg, broker.clone(), Arc::new(store.clone()))
        .await
        .unwrap();
    store.set_fail_on_save(true);
    broker
        .validations()
        .send(id("o-3"), pass("o-3", RULES[0].clone()), minutes(0))
        .unwrap();

    let err = time::timeout(Duration::from_secs(5), engine.wait_failed())
        .await
        .unwrap();
    assert!(matches!(err, EngineError::PartitionFailed { .. }));
    assert!(engine.failed().is_some());
    assert!(engine.stop().await.is_err());
}

#[tokio::test]
async fn partition_count_must_match_the_broker() {
    let err = Engine::start_with(config(), Broker::in_memory(3), Arc::new(MemoryStateStore::new()))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Core(_)));
}

#[tokio::test]
async fn on_disk_engine_checkpoints_every_partition_on_stop() {
    let dir = tempfile::tempdir().unwrap();
    let log_dir = dir.path().join("log");
    let state_dir = dir.path().join("state");
    let cfg = EngineConfig {
        partitions: 2,
        ..config()
    };
    let engine = Engine::start(log_dir.to_str().unwrap(), &state_dir, cfg.clone())
        .await
        .unwrap();
    engine
        .broker()
        .orders()
        .send(id("o-4"), order("o-4"), minutes(0))
        .unwrap();
    engine.stop().await.unwrap();

    for graph in GraphKind::ALL {
        for partition in 0..2 {
            let path = state_dir.join(graph.as_str()).join(format!("{partition}.json"));
            assert!(path.exists(), "missing checkpoint {}", path.display());
        }
    }

    // the log survives too: a new engine sees the order already consumed
    let engine = Engine::start(log_dir.to_str().unwrap(), &state_dir, cfg)
        .await
        .unwrap();
    let p = engine.broker().orders().partition_of(&id("o-4"));
    assert_eq!(engine.broker().orders().end_offset(p).unwrap(), 1);
    // counters come back from the checkpoint and the order is not replayed
    eventually(|| engine.stats().fail.entities_seen == 1).await;
    time::sleep(Duration::from_millis(50)).await;
    assert_eq!(engine.stats().fail.entities_seen, 1);
    engine.stop().await.unwrap();
}

#[tokio::test]
async fn checkpoint_ahead_of_the_log_fails_startup() {
    let store = MemoryStateStore::new();
    let broker = Broker::in_memory(1);
    let engine = Engine::start_with(config(), broker.clone(), Arc::new(store.clone()))
        .await
        .unwrap();
    for key in ["o-1", "o-2", "o-3"] {
        broker.orders().send(id(key), order(key), minutes(0)).unwrap();
    }
    eventually(|| engine.stats().fail.entities_seen == 3).await;
    engine.stop().await.unwrap();

    // same checkpoints, but a log that starts over from offset 0
    let err = Engine::start_with(config(), Broker::in_memory(1), Arc::new(store))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::PartitionFailed { ref reason, .. } if reason.contains("ahead of the log")
    ));
}

#[tokio::test]
async fn memory_log_restart_does_not_skip_new_records() {
    let dir = tempfile::tempdir().unwrap();
    let engine = Engine::start("memory:", dir.path(), config()).await.unwrap();
    for key in ["o-1", "o-2", "o-3"] {
        engine
            .broker()
            .orders()
            .send(id(key), order(key), minutes(0))
            .unwrap();
    }
    eventually(|| engine.stats().fail.entities_seen == 3).await;
    engine.stop().await.unwrap();

    let engine = Engine::start("memory:", dir.path(), config()).await.unwrap();
    let broker = engine.broker().clone();
    broker.orders().send(id("o-9"), order("o-9"), minutes(0)).unwrap();
    broker
        .validations()
        .send(id("o-9"), fail("o-9", RULES[0].clone()), minutes(1))
        .unwrap();
    eventually(|| state_of(&broker, "o-9") == Some(EntityState::Failed)).await;
    engine.stop().await.unwrap();
}
