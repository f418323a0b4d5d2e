// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Shared test doubles and fixtures for verdict crates.
#![forbid(unsafe_code)]
// Fixtures fail loudly on malformed literals.
#![allow(clippy::expect_used)]
//!
//! # Modules
//!
//! - [`config`] - In-memory config store fake for testing without filesystem
//! - [`records`] - Id, order and verdict builders
//! - [`scenario`] - Timelines replayed through both graphs
//! - [`state`] - In-memory checkpoint store fake with failure injection

pub mod config;
pub mod records;
pub mod scenario;
pub mod state;

pub use config::InMemoryConfigStore;
pub use records::{fail, id, minutes, order, pass, MINUTE_MS, RULES};
pub use scenario::{Outcome, Scenario, Step};
pub use state::MemoryStateStore;
