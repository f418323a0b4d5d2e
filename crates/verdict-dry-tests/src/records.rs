// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Record builders.

use verdict_model::{Entity, EntityId, EventTime, RuleOutcome, ValidationCheck, ValidationResult};

/// One minute in event-time milliseconds.
pub const MINUTE_MS: i64 = 60_000;

/// The three checks an order passes through.
pub const RULES: [ValidationCheck; 3] = [
    ValidationCheck::InventoryCheck,
    ValidationCheck::FraudCheck,
    ValidationCheck::OrderDetailsCheck,
];

/// Event time `n` minutes after the epoch.
pub fn minutes(n: i64) -> EventTime {
    EventTime::from_millis(n * MINUTE_MS)
}

/// Entity id from a non-empty literal.
pub fn id(key: &str) -> EntityId {
    EntityId::new(key).expect("fixture ids are non-empty")
}

/// CREATED order for `key`.
pub fn order(key: &str) -> Entity {
    Entity::order(id(key), 1, "JUMPERS", 2, 12.5)
}

/// PASS verdict from `check` for `key`.
pub fn pass(key: &str, check: ValidationCheck) -> ValidationResult {
    ValidationResult::new(id(key), check, RuleOutcome::Pass)
}

/// FAIL verdict from `check` for `key`.
pub fn fail(key: &str, check: ValidationCheck) -> ValidationResult {
    ValidationResult::new(id(key), check, RuleOutcome::Fail)
}
