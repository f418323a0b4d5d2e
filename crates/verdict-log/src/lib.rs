// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Partitioned keyed log for the verdict aggregator.
//!
//! A [`Topic`] is a fixed set of append-only partitions. Records are placed by
//! key with [`verdict_model::partition_for`], so two topics opened with the
//! same partition count are co-partitioned. Each partition exposes a change
//! feed over its end offset that readers await instead of polling.
//!
//! Consumer groups commit offsets per partition; the overwrite-by-key view
//! ([`Topic::latest`], [`Topic::snapshot`]) and [`Topic::compact`] give the
//! lifecycle feed its table semantics.
#![forbid(unsafe_code)]

mod broker;
mod error;
mod record;
mod segment;
mod topic;

pub use broker::{Broker, BrokerLocation, ORDERS, ORDER_VALIDATIONS};
pub use error::LogError;
pub use record::{Payload, Record};
pub use topic::Topic;
