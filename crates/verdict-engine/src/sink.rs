// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
use verdict_core::TransitionSink;
use verdict_log::{LogError, Topic};
use verdict_model::{Entity, EntityId, EventTime};

/// Publishes transition records onto the lifecycle topic, keyed by entity id.
#[derive(Debug, Clone)]
pub struct LogSink {
    orders: Topic<Entity>,
}

impl LogSink {
    /// Sink writing to `orders`.
    pub fn new(orders: Topic<Entity>) -> Self {
        Self { orders }
    }
}

impl TransitionSink for LogSink {
    type Error = LogError;

    fn publish(&mut self, key: &EntityId, record: &Entity, at: EventTime) -> Result<(), LogError> {
        self.orders.send(key.clone(), record.clone(), at)?;
        Ok(())
    }
}
