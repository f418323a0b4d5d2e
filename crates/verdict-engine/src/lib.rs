// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Verdict engine driver.
//!
//! [`Engine::start`] spawns one supervised worker per (graph, partition). Each
//! worker restores its checkpoint, replays both input partitions from the
//! checkpointed offsets, and then follows the log's change feed. Transitions
//! are written back to the lifecycle topic through [`LogSink`].
//!
//! # Delivery
//!
//! Output is written before the checkpoint that covers its inputs. A crash
//! between the two replays those inputs and re-emits the same overwrite
//! records, which consumers of the lifecycle feed cannot tell apart from the
//! originals.
#![forbid(unsafe_code)]

mod checkpoint;
mod engine;
mod error;
mod sink;
mod status;
mod supervisor;
mod worker;

pub use checkpoint::{Checkpoint, FsStateStore, StateStore, CHECKPOINT_VERSION};
pub use engine::{Engine, EngineStats};
pub use error::EngineError;
pub use sink::LogSink;
pub use status::{PartitionStatus, WorkerId};
