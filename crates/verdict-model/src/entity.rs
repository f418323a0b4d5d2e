// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::{EntityId, ModelError};

/// Lifecycle state of an order.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntityState {
    /// Freshly placed, awaiting validation.
    Created,
    /// Every required rule passed.
    Validated,
    /// At least one rule failed.
    Failed,
    /// Downstream fulfilment; never produced or consumed by the aggregator.
    Shipped,
}

impl EntityState {
    /// Wire name of the state.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Created => "CREATED",
            Self::Validated => "VALIDATED",
            Self::Failed => "FAILED",
            Self::Shipped => "SHIPPED",
        }
    }
}

impl fmt::Display for EntityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityState {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "CREATED" => Ok(Self::Created),
            "VALIDATED" => Ok(Self::Validated),
            "FAILED" => Ok(Self::Failed),
            "SHIPPED" => Ok(Self::Shipped),
            _ => Err(ModelError::UnknownState(s.to_owned())),
        }
    }
}

/// An order record on the lifecycle feed.
///
/// The payload is opaque to the aggregator: it is carried through joins and
/// written back unchanged, only `state` is replaced.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct Entity {
    /// Record key.
    pub id: EntityId,
    /// Current lifecycle state.
    pub state: EntityState,
    /// Opaque business payload.
    #[serde(default)]
    pub payload: Value,
}

impl Entity {
    /// Build a record in the given state.
    pub fn new(id: EntityId, state: EntityState, payload: Value) -> Self {
        Self { id, state, payload }
    }

    /// Build a CREATED order with the usual order fields as payload.
    pub fn order(
        id: EntityId,
        customer_id: u64,
        product: &str,
        quantity: u32,
        price: f64,
    ) -> Self {
        Self::new(
            id,
            EntityState::Created,
            json!({
                "customer_id": customer_id,
                "product": product,
                "quantity": quantity,
                "price": price,
            }),
        )
    }

    /// Whether this record is eligible for validation joins.
    pub fn is_created(&self) -> bool {
        self.state == EntityState::Created
    }

    /// Copy of the record with a new state and the payload untouched.
    #[must_use]
    pub fn with_state(&self, state: EntityState) -> Self {
        Self {
            id: self.id.clone(),
            state,
            payload: self.payload.clone(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn state_round_trips_through_wire_names() {
        for state in [
            EntityState::Created,
            EntityState::Validated,
            EntityState::Failed,
            EntityState::Shipped,
        ] {
            assert_eq!(state.as_str().parse::<EntityState>().unwrap(), state);
            let json = serde_json::to_string(&state).unwrap();
            assert_eq!(json, format!("\"{}\"", state.as_str()));
        }
        assert!("PENDING".parse::<EntityState>().is_err());
    }

    #[test]
    fn with_state_keeps_payload() {
        let order = Entity::order(EntityId::new("o-1").unwrap(), 7, "JUMPERS", 2, 10.5);
        let validated = order.with_state(EntityState::Validated);
        assert_eq!(validated.payload, order.payload);
        assert_eq!(validated.state, EntityState::Validated);
        assert!(order.is_created());
        assert!(!validated.is_created());
    }
}
