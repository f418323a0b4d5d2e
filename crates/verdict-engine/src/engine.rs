// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Engine lifecycle: start, observe, stop.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{error, info, instrument, warn};
use verdict_core::{CoreError, EngineConfig, GraphKind, GraphStats};
use verdict_log::{Broker, BrokerLocation};

use crate::status::{Board, StatusMap};
use crate::supervisor::supervise;
use crate::worker::WorkerContext;
use crate::{EngineError, FsStateStore, PartitionStatus, StateStore, WorkerId};

/// Counters summed over every partition, per graph.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EngineStats {
    /// Aggregate-and-validate graph.
    pub pass: GraphStats,
    /// Fail-fast graph.
    pub fail: GraphStats,
}

/// A running engine. Dropping it without [`Engine::stop`] aborts the workers
/// without a final checkpoint.
#[derive(Debug)]
pub struct Engine {
    config: Arc<EngineConfig>,
    broker: Broker,
    board: Board,
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

fn settled(map: &StatusMap) -> bool {
    map.values().any(PartitionStatus::is_failed)
        || map.values().all(|s| *s == PartitionStatus::Running)
}

fn first_failure(map: &StatusMap) -> Option<(WorkerId, String)> {
    map.iter().find_map(|(id, status)| match status {
        PartitionStatus::Failed { reason } => Some((*id, reason.clone())),
        _ => None,
    })
}

impl Engine {
    /// Connect to `bootstrap`, keep checkpoints under `state_dir`, and start.
    ///
    /// An in-memory log starts empty, so existing checkpoints are cleared first.
    ///
    /// # Errors
    /// Invalid config, unreachable log or state dir, or see [`Engine::start_with`].
    #[instrument(skip(state_dir, config), fields(state_dir = %state_dir.as_ref().display()))]
    pub async fn start(
        bootstrap: &str,
        state_dir: impl AsRef<Path>,
        config: EngineConfig,
    ) -> Result<Self, EngineError> {
        config.validate()?;
        let broker = Broker::connect(bootstrap, config.partitions)?;
        let store = FsStateStore::open(state_dir.as_ref())?;
        if *broker.location() == BrokerLocation::Memory {
            warn!("in-memory log starts empty; discarding checkpoints");
            store.clear()?;
        }
        Self::start_with(config, broker, Arc::new(store)).await
    }

    /// Start workers over `broker`, checkpointing into `store`.
    ///
    /// Returns once every worker has restored its state and is following its
    /// inputs.
    ///
    /// # Errors
    /// [`EngineError::StartupTimeout`] when that takes longer than the startup
    /// timeout, [`EngineError::PartitionFailed`] when a worker gives up first.
    /// The engine is stopped before either is returned.
    pub async fn start_with(
        config: EngineConfig,
        broker: Broker,
        store: Arc<dyn StateStore>,
    ) -> Result<Self, EngineError> {
        config.validate()?;
        if broker.partitions() != config.partitions {
            return Err(CoreError::InvalidConfig(format!(
                "broker has {} partitions, config expects {}",
                broker.partitions(),
                config.partitions
            ))
            .into());
        }
        let config = Arc::new(config);
        let workers: Vec<WorkerId> = GraphKind::ALL
            .into_iter()
            .flat_map(|graph| (0..config.partitions).map(move |partition| WorkerId { graph, partition }))
            .collect();
        let board = Board::new(workers.iter().copied());
        let (shutdown, _) = watch::channel(false);

        let tasks = workers
            .iter()
            .map(|&id| {
                let ctx = Arc::new(WorkerContext {
                    id,
                    config: Arc::clone(&config),
                    broker: broker.clone(),
                    store: Arc::clone(&store),
                    board: board.clone(),
                });
                tokio::spawn(supervise(ctx, shutdown.subscribe()))
            })
            .collect();

        let engine = Self {
            config,
            broker,
            board,
            shutdown,
            tasks,
        };

        let timeout = engine.config.startup_timeout();
        let mut status = engine.board.watch_status();
        let waited = time::timeout(timeout, status.wait_for(settled))
            .await
            .map(|seen| seen.map(|map| first_failure(&map)));
        let failure = match waited {
            Ok(Ok(failure)) => failure,
            Ok(Err(_)) => Some((workers[0], "status board closed".to_owned())),
            Err(_) => {
                let ready = engine
                    .board
                    .status()
                    .values()
                    .filter(|s| **s == PartitionStatus::Running)
                    .count();
                error!(?timeout, ready, expected = workers.len(), "startup timed out");
                engine.abandon().await;
                return Err(EngineError::StartupTimeout {
                    waited: timeout,
                    ready,
                    expected: workers.len(),
                });
            }
        };
        if let Some((worker, reason)) = failure {
            error!(%worker, %reason, "partition failed during startup");
            engine.abandon().await;
            return Err(EngineError::PartitionFailed {
                worker: worker.to_string(),
                reason,
            });
        }
        info!(
            partitions = engine.config.partitions,
            workers = workers.len(),
            "engine started"
        );
        Ok(engine)
    }

    /// Config the engine runs with.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The log the engine reads and writes.
    pub fn broker(&self) -> &Broker {
        &self.broker
    }

    /// Counters summed per graph.
    pub fn stats(&self) -> EngineStats {
        let mut totals = EngineStats::default();
        for (id, stats) in self.board.stats() {
            match id.graph {
                GraphKind::Pass => totals.pass.absorb(&stats),
                GraphKind::Fail => totals.fail.absorb(&stats),
            }
        }
        totals
    }

    /// Status of every worker.
    pub fn status(&self) -> BTreeMap<WorkerId, PartitionStatus> {
        self.board.status()
    }

    /// First worker that gave up, with its last error.
    pub fn failed(&self) -> Option<(WorkerId, String)> {
        first_failure(&self.board.status())
    }

    /// Resolves when a worker gives up.
    pub async fn wait_failed(&self) -> EngineError {
        let mut status = self.board.watch_status();
        let failure = status
            .wait_for(|map| first_failure(map).is_some())
            .await
            .ok()
            .and_then(|map| first_failure(&map));
        match failure {
            Some((worker, reason)) => EngineError::PartitionFailed {
                worker: worker.to_string(),
                reason,
            },
            None => EngineError::PartitionFailed {
                worker: "engine".to_owned(),
                reason: "status board closed".to_owned(),
            },
        }
    }

    /// Stop after a failed start; the startup error is what the caller sees.
    async fn abandon(self) {
        if let Err(err) = self.stop().await {
            warn!(%err, "stopping after failed start");
        }
    }

    /// Signal every worker to drain and checkpoint, then wait for them.
    ///
    /// # Errors
    /// [`EngineError::PartitionFailed`] if a worker had already given up.
    #[instrument(skip(self))]
    pub async fn stop(self) -> Result<(), EngineError> {
        self.shutdown.send_replace(true);
        for task in self.tasks {
            if let Err(err) = task.await {
                warn!(%err, "worker task did not finish cleanly");
            }
        }
        info!("engine stopped");
        match first_failure(&self.board.status()) {
            Some((worker, reason)) => Err(EngineError::PartitionFailed {
                worker: worker.to_string(),
                reason,
            }),
            None => Ok(()),
        }
    }
}
