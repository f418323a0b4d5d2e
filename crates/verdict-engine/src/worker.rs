// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! One graph over one partition of both input topics.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info, instrument, trace};
use verdict_core::{build_graph, EngineConfig, Emitter, Graph};
use verdict_log::{Broker, Record};
use verdict_model::{Entity, EventTime, StateTransition, ValidationResult};

use crate::status::{Board, WorkerId};
use crate::{Checkpoint, EngineError, LogSink, StateStore, CHECKPOINT_VERSION};

/// Records read from each topic per pass.
const BATCH: usize = 512;

/// Everything a worker needs that outlives a single run.
pub(crate) struct WorkerContext {
    pub(crate) id: WorkerId,
    pub(crate) config: Arc<EngineConfig>,
    pub(crate) broker: Broker,
    pub(crate) store: Arc<dyn StateStore>,
    pub(crate) board: Board,
}

enum Next {
    Validation,
    Entity,
    Refill,
}

pub(crate) struct PartitionWorker {
    ctx: Arc<WorkerContext>,
    graph: Box<dyn Graph>,
    emitter: Emitter<LogSink>,
    validations_offset: u64,
    entities_offset: u64,
    dirty: bool,
}

impl PartitionWorker {
    /// Build the graph and load its checkpoint, if one exists.
    pub(crate) fn restore(ctx: Arc<WorkerContext>) -> Result<Self, EngineError> {
        let WorkerId { graph: kind, partition } = ctx.id;
        let mut graph = build_graph(kind, &ctx.config);
        let (validations_offset, entities_offset) = match ctx.store.load(kind, partition)? {
            Some(cp) => {
                let corrupt = |reason: String| EngineError::CorruptState {
                    graph: kind,
                    partition,
                    reason,
                };
                if cp.version != CHECKPOINT_VERSION {
                    return Err(corrupt(format!("unsupported checkpoint version {}", cp.version)));
                }
                if cp.graph != kind || cp.partition != partition {
                    return Err(corrupt(format!(
                        "checkpoint belongs to {}/{}",
                        cp.graph, cp.partition
                    )));
                }
                let validations_end = ctx.broker.validations().end_offset(partition)?;
                let entities_end = ctx.broker.orders().end_offset(partition)?;
                if cp.validations_offset > validations_end || cp.entities_offset > entities_end {
                    return Err(corrupt(format!(
                        "checkpoint at offsets {}/{} is ahead of the log ({validations_end}/{entities_end})",
                        cp.validations_offset, cp.entities_offset
                    )));
                }
                graph
                    .restore(cp.state)
                    .map_err(|e| corrupt(e.to_string()))?;
                info!(
                    worker = %ctx.id,
                    validations = cp.validations_offset,
                    entities = cp.entities_offset,
                    "restored from checkpoint"
                );
                (cp.validations_offset, cp.entities_offset)
            }
            None => {
                info!(worker = %ctx.id, "no checkpoint; replaying from the start");
                (0, 0)
            }
        };
        let emitter = Emitter::new(LogSink::new(ctx.broker.orders().clone()));
        Ok(Self {
            ctx,
            graph,
            emitter,
            validations_offset,
            entities_offset,
            dirty: false,
        })
    }

    /// Follow both inputs until `shutdown` turns true, then drain and checkpoint.
    #[instrument(name = "worker", skip_all, fields(worker = %self.ctx.id))]
    pub(crate) async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> Result<(), EngineError> {
        let partition = self.ctx.id.partition;
        let mut validations = self.ctx.broker.validations().subscribe(partition)?;
        let mut orders = self.ctx.broker.orders().subscribe(partition)?;

        let mut commit = time::interval(self.ctx.config.commit_interval());
        commit.set_missed_tick_behavior(MissedTickBehavior::Delay);
        commit.reset();
        let mut punctuate = time::interval(self.ctx.config.punctuate_interval());
        punctuate.set_missed_tick_behavior(MissedTickBehavior::Delay);
        punctuate.reset();

        self.drain()?;
        while !*shutdown.borrow() {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = validations.changed() => self.drain()?,
                _ = orders.changed() => self.drain()?,
                _ = commit.tick() => self.checkpoint().await?,
                _ = punctuate.tick() => self.punctuate()?,
            }
        }
        self.drain()?;
        self.dirty = true;
        self.checkpoint().await?;
        info!(
            validations = self.validations_offset,
            entities = self.entities_offset,
            emitted = self.emitter.emitted(),
            "worker stopped"
        );
        Ok(())
    }

    /// Consume everything currently in both partitions, oldest event first.
    ///
    /// On equal timestamps the lifecycle record goes first, so a CREATED order
    /// is buffered before a verdict stamped at the same instant looks for it.
    fn drain(&mut self) -> Result<(), EngineError> {
        let partition = self.ctx.id.partition;
        loop {
            let verdicts = self.ctx.broker.validations().read(
                partition,
                self.validations_offset,
                BATCH,
            )?;
            let entities =
                self.ctx
                    .broker
                    .orders()
                    .read(partition, self.entities_offset, BATCH)?;
            if verdicts.is_empty() && entities.is_empty() {
                break;
            }
            let verdicts_full = verdicts.len() == BATCH;
            let entities_full = entities.len() == BATCH;
            let mut verdicts = verdicts.into_iter().peekable();
            let mut entities = entities.into_iter().peekable();
            loop {
                let next = match (verdicts.peek(), entities.peek()) {
                    (None, None) => Next::Refill,
                    (Some(_), None) if entities_full => Next::Refill,
                    (None, Some(_)) if verdicts_full => Next::Refill,
                    (Some(_), None) => Next::Validation,
                    (None, Some(_)) => Next::Entity,
                    (Some(v), Some(e)) if e.timestamp <= v.timestamp => Next::Entity,
                    (Some(_), Some(_)) => Next::Validation,
                };
                match next {
                    Next::Validation => {
                        if let Some(record) = verdicts.next() {
                            self.apply_validation(record)?;
                        }
                    }
                    Next::Entity => {
                        if let Some(record) = entities.next() {
                            self.apply_entity(record)?;
                        }
                    }
                    Next::Refill => break,
                }
            }
        }
        self.ctx.board.set_stats(self.ctx.id, *self.graph.stats());
        Ok(())
    }

    fn apply_validation(&mut self, record: Record<ValidationResult>) -> Result<(), EngineError> {
        self.validations_offset = record.next_offset();
        self.dirty = true;
        let Some(verdict) = record.value else {
            trace!(key = %record.key, offset = record.offset, "skipping verdict tombstone");
            return Ok(());
        };
        let out = self.graph.on_validation(record.timestamp, &verdict);
        self.emit(&out)
    }

    fn apply_entity(&mut self, record: Record<Entity>) -> Result<(), EngineError> {
        self.entities_offset = record.next_offset();
        self.dirty = true;
        let Some(entity) = record.value else {
            trace!(key = %record.key, offset = record.offset, "skipping order tombstone");
            return Ok(());
        };
        let out = self.graph.on_entity(record.timestamp, &entity);
        self.emit(&out)
    }

    fn emit(&mut self, out: &[StateTransition]) -> Result<(), EngineError> {
        if out.is_empty() {
            return Ok(());
        }
        self.emitter.emit_all(out)?;
        Ok(())
    }

    /// Advance an active graph to the wall clock so trailing sessions close.
    fn punctuate(&mut self) -> Result<(), EngineError> {
        if !self.ctx.config.wall_clock_punctuation || self.graph.stream_time().is_none() {
            return Ok(());
        }
        let now = EventTime::now();
        let out = self.graph.punctuate(now);
        if !out.is_empty() {
            debug!(transitions = out.len(), %now, "punctuation emitted transitions");
        }
        self.dirty = true;
        self.emit(&out)?;
        self.ctx.board.set_stats(self.ctx.id, *self.graph.stats());
        Ok(())
    }

    /// Persist state with both offsets, then commit the offsets to the log.
    ///
    /// The file writes run on the blocking pool.
    async fn checkpoint(&mut self) -> Result<(), EngineError> {
        if !self.dirty {
            return Ok(());
        }
        let WorkerId { graph, partition } = self.ctx.id;
        let checkpoint = Checkpoint {
            version: CHECKPOINT_VERSION,
            graph,
            partition,
            validations_offset: self.validations_offset,
            entities_offset: self.entities_offset,
            state: self.graph.snapshot()?,
        };
        let ctx = Arc::clone(&self.ctx);
        task::spawn_blocking(move || -> Result<(), EngineError> {
            ctx.store.save(&checkpoint)?;
            let group = graph.consumer_group();
            ctx.broker
                .validations()
                .commit(group, partition, checkpoint.validations_offset)?;
            ctx.broker
                .orders()
                .commit(group, partition, checkpoint.entities_offset)?;
            Ok(())
        })
        .await
        .map_err(|err| EngineError::PartitionFailed {
            worker: self.ctx.id.to_string(),
            reason: format!("checkpoint task: {err}"),
        })??;
        self.dirty = false;
        Ok(())
    }
}
