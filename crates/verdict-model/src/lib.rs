// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Domain records for the verdict validation aggregator.
//!
//! Two unbounded feeds meet in this crate's types:
//!
//! - [`ValidationResult`]: one verdict per (entity, rule), keyed by entity id.
//! - [`Entity`]: the order lifecycle record, overwritten by id.
//!
//! The aggregator derives a [`StateTransition`] from them and writes it back
//! onto the lifecycle feed as a full [`Entity`] record.
//!
//! # Partitioning Invariant
//!
//! Both feeds are sharded with [`partition_for`]. The same key always lands in
//! the same partition of either feed, so every grouping and join stays local to
//! one partition.
#![forbid(unsafe_code)]

mod entity;
mod id;
mod partition;
mod time;
mod transition;
mod validation;

pub use entity::{Entity, EntityState};
pub use id::EntityId;
pub use partition::partition_for;
pub use time::EventTime;
pub use transition::{StateTransition, TransitionKind};
pub use validation::{RuleOutcome, ValidationCheck, ValidationResult};

/// Errors raised while constructing or parsing domain records.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ModelError {
    /// Entity ids must be non-empty.
    #[error("entity id must not be empty")]
    EmptyEntityId,
    /// A lifecycle state string did not name a known state.
    #[error("unknown entity state: {0}")]
    UnknownState(String),
    /// A verdict outcome string was neither PASS nor FAIL.
    #[error("unknown rule outcome: {0}")]
    UnknownOutcome(String),
}
