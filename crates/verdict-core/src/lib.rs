// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Verdict core: stateful, windowed correlation of validation verdicts with
//! order lifecycle records.
//!
//! The crate is sans-IO. A partition worker feeds records into a [`Graph`] and
//! hands the returned transitions to an [`Emitter`]; checkpointing and transport
//! live in `verdict-engine` and `verdict-log`.
//!
//! # Determinism Invariant
//!
//! All state is held in ordered maps and every output is produced in a fixed
//! order. Replaying the same per-partition input sequence against fresh state
//! yields the same transitions, the same stats and the same snapshot.
#![forbid(unsafe_code)]

pub mod config;
pub mod dedup;
pub mod emit;
mod error;
pub mod gate;
pub mod graph;
pub mod join;
pub mod session;
mod stats;

pub use config::EngineConfig;
pub use dedup::FirstSeen;
pub use emit::{Emitter, EntityTable, TransitionSink};
pub use error::CoreError;
pub use gate::{PassSignal, ThresholdGate};
pub use graph::{build_graph, FailGraph, Graph, GraphKind, PassGraph};
pub use join::{JoinWindow, WindowedJoin};
pub use session::{AggregateUpdate, SessionAggregator, SessionWindow};
pub use stats::GraphStats;
