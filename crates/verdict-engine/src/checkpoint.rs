// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Partition checkpoints and where they are kept.

use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};
use verdict_core::{CoreError, GraphKind};

use crate::EngineError;

/// Format version written into every checkpoint.
pub const CHECKPOINT_VERSION: u32 = 1;

/// Graph state of one partition plus the input positions it covers.
///
/// Offsets are the next record to read; every record before them is reflected
/// in `state`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Format version.
    pub version: u32,
    /// Graph the state belongs to.
    pub graph: GraphKind,
    /// Partition the state belongs to.
    pub partition: u32,
    /// Next offset to read from the verdict topic.
    pub validations_offset: u64,
    /// Next offset to read from the lifecycle topic.
    pub entities_offset: u64,
    /// Serialized graph state.
    pub state: Value,
}

/// Durable home for partition checkpoints.
pub trait StateStore: Send + Sync {
    /// Latest checkpoint for `graph`/`partition`, if any.
    fn load(&self, graph: GraphKind, partition: u32) -> Result<Option<Checkpoint>, EngineError>;

    /// Replace the checkpoint for the partition named inside `checkpoint`.
    fn save(&self, checkpoint: &Checkpoint) -> Result<(), EngineError>;

    /// Remove every checkpoint.
    fn clear(&self) -> Result<(), EngineError>;
}

/// Checkpoints as JSON files under `<root>/<graph>/<partition>.json`.
#[derive(Debug, Clone)]
pub struct FsStateStore {
    root: PathBuf,
}

fn store_err(path: &Path) -> impl FnOnce(std::io::Error) -> EngineError + '_ {
    move |source| EngineError::StateStore {
        path: path.to_path_buf(),
        source,
    }
}

impl FsStateStore {
    /// Store rooted at `root`, created if missing.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, EngineError> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(store_err(&root))?;
        Ok(Self { root })
    }

    /// Directory holding the checkpoints.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// File holding the checkpoint of `graph`/`partition`.
    pub fn path_for(&self, graph: GraphKind, partition: u32) -> PathBuf {
        self.root
            .join(graph.as_str())
            .join(format!("{partition}.json"))
    }
}

impl StateStore for FsStateStore {
    fn load(&self, graph: GraphKind, partition: u32) -> Result<Option<Checkpoint>, EngineError> {
        let path = self.path_for(graph, partition);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(store_err(&path)(err)),
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| EngineError::CorruptState {
                graph,
                partition,
                reason: e.to_string(),
            })
    }

    fn save(&self, checkpoint: &Checkpoint) -> Result<(), EngineError> {
        let path = self.path_for(checkpoint.graph, checkpoint.partition);
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).map_err(store_err(dir))?;
        }
        let bytes = serde_json::to_vec(checkpoint)
            .map_err(|e| CoreError::Snapshot(e.to_string()))?;
        let tmp = path.with_extension("json.tmp");
        {
            let mut file = File::create(&tmp).map_err(store_err(&tmp))?;
            file.write_all(&bytes).map_err(store_err(&tmp))?;
            file.sync_all().map_err(store_err(&tmp))?;
        }
        fs::rename(&tmp, &path).map_err(store_err(&path))?;
        debug!(
            graph = %checkpoint.graph,
            partition = checkpoint.partition,
            validations = checkpoint.validations_offset,
            entities = checkpoint.entities_offset,
            "checkpoint written"
        );
        Ok(())
    }

    fn clear(&self) -> Result<(), EngineError> {
        for graph in GraphKind::ALL {
            let dir = self.root.join(graph.as_str());
            match fs::remove_dir_all(&dir) {
                Ok(()) => {}
                Err(err) if err.kind() == ErrorKind::NotFound => {}
                Err(err) => return Err(store_err(&dir)(err)),
            }
        }
        info!(root = %self.root.display(), "local state cleared");
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn checkpoint(partition: u32) -> Checkpoint {
        Checkpoint {
            version: CHECKPOINT_VERSION,
            graph: GraphKind::Fail,
            partition,
            validations_offset: 4,
            entities_offset: 2,
            state: serde_json::json!({"kind": "fail"}),
        }
    }

    #[test]
    fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStateStore::open(dir.path()).unwrap();
        assert!(store.load(GraphKind::Fail, 1).unwrap().is_none());
        store.save(&checkpoint(1)).unwrap();
        assert_eq!(store.load(GraphKind::Fail, 1).unwrap(), Some(checkpoint(1)));
        assert!(store.load(GraphKind::Pass, 1).unwrap().is_none());
        assert!(!store.path_for(GraphKind::Fail, 1).with_extension("json.tmp").exists());
    }

    #[test]
    fn garbage_is_corrupt_state() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStateStore::open(dir.path()).unwrap();
        let path = store.path_for(GraphKind::Pass, 0);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, b"{").unwrap();
        let err = store.load(GraphKind::Pass, 0).unwrap_err();
        assert!(matches!(err, EngineError::CorruptState { partition: 0, .. }));
        assert!(!err.is_retryable());
    }

    #[test]
    fn clear_removes_everything() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStateStore::open(dir.path()).unwrap();
        store.save(&checkpoint(0)).unwrap();
        store.clear().unwrap();
        assert!(store.load(GraphKind::Fail, 0).unwrap().is_none());
        store.clear().unwrap();
    }
}
