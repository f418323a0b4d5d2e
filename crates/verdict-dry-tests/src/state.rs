// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! In-memory checkpoint store with failure injection.

use std::collections::BTreeMap;
use std::io;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use verdict_core::GraphKind;
use verdict_engine::{Checkpoint, EngineError, StateStore};

#[derive(Default)]
struct Inner {
    checkpoints: BTreeMap<(GraphKind, u32), Checkpoint>,
    saves: usize,
    fail_on_save: bool,
    fail_on_load: bool,
}

/// [`StateStore`] kept in memory. Clones share contents.
#[derive(Clone, Default)]
pub struct MemoryStateStore {
    inner: Arc<Mutex<Inner>>,
}

fn simulated(graph: GraphKind, partition: u32, what: &str) -> EngineError {
    EngineError::StateStore {
        path: PathBuf::from(format!("memory:{graph}/{partition}")),
        source: io::Error::other(format!("simulated {what} failure")),
    }
}

impl MemoryStateStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make every `save` fail until reset.
    pub fn set_fail_on_save(&self, fail: bool) {
        self.lock().fail_on_save = fail;
    }

    /// Make every `load` fail until reset.
    pub fn set_fail_on_load(&self, fail: bool) {
        self.lock().fail_on_load = fail;
    }

    /// Successful saves so far.
    pub fn saves(&self) -> usize {
        self.lock().saves
    }

    /// Stored checkpoint for `graph`/`partition`.
    pub fn get(&self, graph: GraphKind, partition: u32) -> Option<Checkpoint> {
        self.lock().checkpoints.get(&(graph, partition)).cloned()
    }

    /// Store `checkpoint` directly, bypassing failure injection.
    pub fn put(&self, checkpoint: Checkpoint) {
        self.lock()
            .checkpoints
            .insert((checkpoint.graph, checkpoint.partition), checkpoint);
    }
}

impl StateStore for MemoryStateStore {
    fn load(&self, graph: GraphKind, partition: u32) -> Result<Option<Checkpoint>, EngineError> {
        let inner = self.lock();
        if inner.fail_on_load {
            return Err(simulated(graph, partition, "load"));
        }
        Ok(inner.checkpoints.get(&(graph, partition)).cloned())
    }

    fn save(&self, checkpoint: &Checkpoint) -> Result<(), EngineError> {
        let mut inner = self.lock();
        if inner.fail_on_save {
            return Err(simulated(checkpoint.graph, checkpoint.partition, "save"));
        }
        inner.saves += 1;
        inner
            .checkpoints
            .insert((checkpoint.graph, checkpoint.partition), checkpoint.clone());
        Ok(())
    }

    fn clear(&self) -> Result<(), EngineError> {
        self.lock().checkpoints.clear();
        Ok(())
    }
}
