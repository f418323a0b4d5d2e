// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{EntityId, ModelError};

/// Verdict of a single validation rule.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RuleOutcome {
    /// The rule accepted the order.
    Pass,
    /// The rule rejected the order.
    Fail,
}

impl FromStr for RuleOutcome {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "PASS" => Ok(Self::Pass),
            "FAIL" => Ok(Self::Fail),
            _ => Err(ModelError::UnknownOutcome(s.to_owned())),
        }
    }
}

/// The rule that produced a verdict.
#[derive(Clone, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ValidationCheck {
    /// Stock is available for the ordered quantity.
    InventoryCheck,
    /// Customer spend is within fraud limits.
    FraudCheck,
    /// Order fields are well formed.
    OrderDetailsCheck,
    /// Any other rule, named by its producer.
    Other(String),
}

impl fmt::Display for ValidationCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InventoryCheck => f.write_str("INVENTORY_CHECK"),
            Self::FraudCheck => f.write_str("FRAUD_CHECK"),
            Self::OrderDetailsCheck => f.write_str("ORDER_DETAILS_CHECK"),
            Self::Other(name) => f.write_str(name),
        }
    }
}

/// One rule's verdict for one order. Immutable once produced.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct ValidationResult {
    /// Order the verdict applies to; also the record key.
    pub entity_id: EntityId,
    /// Rule that produced the verdict.
    pub check: ValidationCheck,
    /// PASS or FAIL.
    pub outcome: RuleOutcome,
}

impl ValidationResult {
    /// Build a verdict.
    pub fn new(entity_id: EntityId, check: ValidationCheck, outcome: RuleOutcome) -> Self {
        Self {
            entity_id,
            check,
            outcome,
        }
    }

    /// Whether this verdict counts towards the pass threshold.
    pub fn is_pass(&self) -> bool {
        self.outcome == RuleOutcome::Pass
    }

    /// Whether this verdict fails the order outright.
    pub fn is_fail(&self) -> bool {
        self.outcome == RuleOutcome::Fail
    }
}
