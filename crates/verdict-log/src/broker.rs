// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! The two feeds the aggregator runs over, opened together.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use tracing::info;
use verdict_model::{Entity, ValidationResult};

use crate::{LogError, Topic};

/// Topic carrying one verdict per (order, rule).
pub const ORDER_VALIDATIONS: &str = "order-validations";
/// Topic carrying order lifecycle records, overwritten by id.
pub const ORDERS: &str = "orders";

/// Where a broker keeps its topics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrokerLocation {
    /// Process memory; lost on exit.
    Memory,
    /// Directory holding one subdirectory per topic.
    Dir(PathBuf),
}

impl FromStr for BrokerLocation {
    type Err = LogError;

    /// `memory:` selects in-memory topics; `file://<path>` or a bare path
    /// selects a directory.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s == "memory:" || s == "memory" {
            return Ok(Self::Memory);
        }
        let path = s.strip_prefix("file://").unwrap_or(s);
        if path.is_empty() {
            return Err(LogError::InvalidBootstrap(s.to_owned()));
        }
        Ok(Self::Dir(PathBuf::from(path)))
    }
}

impl fmt::Display for BrokerLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Memory => f.write_str("memory:"),
            Self::Dir(path) => write!(f, "file://{}", path.display()),
        }
    }
}

/// Handle on the verdict and lifecycle topics. Clones share the topics.
#[derive(Debug, Clone)]
pub struct Broker {
    location: BrokerLocation,
    validations: Topic<ValidationResult>,
    orders: Topic<Entity>,
}

impl Broker {
    /// Open both topics at `location` with `partitions` partitions each.
    ///
    /// # Errors
    /// See [`Topic::open`].
    pub fn open(location: BrokerLocation, partitions: u32) -> Result<Self, LogError> {
        let (validations, orders) = match &location {
            BrokerLocation::Memory => (
                Topic::in_memory(ORDER_VALIDATIONS, partitions),
                Topic::in_memory(ORDERS, partitions),
            ),
            BrokerLocation::Dir(root) => (
                Topic::open(root, ORDER_VALIDATIONS, partitions)?,
                Topic::open(root, ORDERS, partitions)?,
            ),
        };
        info!(%location, partitions, "broker connected");
        Ok(Self {
            location,
            validations,
            orders,
        })
    }

    /// Parse `bootstrap` and open it.
    ///
    /// # Errors
    /// Invalid bootstrap string or see [`Broker::open`].
    pub fn connect(bootstrap: &str, partitions: u32) -> Result<Self, LogError> {
        Self::open(bootstrap.parse()?, partitions)
    }

    /// In-memory broker.
    pub fn in_memory(partitions: u32) -> Self {
        Self {
            location: BrokerLocation::Memory,
            validations: Topic::in_memory(ORDER_VALIDATIONS, partitions),
            orders: Topic::in_memory(ORDERS, partitions),
        }
    }

    /// Where the topics live.
    pub fn location(&self) -> &BrokerLocation {
        &self.location
    }

    /// Verdict topic.
    pub fn validations(&self) -> &Topic<ValidationResult> {
        &self.validations
    }

    /// Lifecycle topic.
    pub fn orders(&self) -> &Topic<Entity> {
        &self.orders
    }

    /// Partition count shared by both topics.
    pub fn partitions(&self) -> u32 {
        self.validations.partitions()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn parses_bootstrap_strings() {
        assert_eq!("memory:".parse::<BrokerLocation>().unwrap(), BrokerLocation::Memory);
        assert_eq!(
            "file:///var/lib/verdict".parse::<BrokerLocation>().unwrap(),
            BrokerLocation::Dir(PathBuf::from("/var/lib/verdict"))
        );
        assert_eq!(
            "./data".parse::<BrokerLocation>().unwrap(),
            BrokerLocation::Dir(PathBuf::from("./data"))
        );
        assert!("file://".parse::<BrokerLocation>().is_err());
        assert!("  ".parse::<BrokerLocation>().is_err());
    }

    #[test]
    fn topics_are_co_partitioned() {
        let broker = Broker::in_memory(8);
        let key = verdict_model::EntityId::new("o-42").unwrap();
        assert_eq!(
            broker.validations().partition_of(&key),
            broker.orders().partition_of(&key)
        );
    }
}
