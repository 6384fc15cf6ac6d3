//! # Broker Link Management
//!
//! Self-healing RabbitMQ connectivity for the worker:
//!
//! - **Consumer**: long-lived consume loop on the task queue with
//!   acknowledge-on-enqueue semantics and automatic reconnect
//! - **Publisher**: lazily connected result publisher with durable queue
//!   declaration and persistent delivery
//!
//! Both sides treat a lost connection the same way: log, back off with a
//! doubling delay capped by configuration, and rebuild the connection from
//! scratch. No AMQP object outlives the connection it came from.

mod consumer;
mod publisher;

pub use consumer::TaskConsumer;
pub use publisher::ResultPublisher;

use std::time::Duration;

use crate::config::BrokerConfig;

/// Doubling reconnect delay, reset on every successful connect.
#[derive(Debug)]
pub(crate) struct ReconnectBackoff {
    current: Duration,
    initial: Duration,
    max: Duration,
}

impl ReconnectBackoff {
    pub(crate) fn new(config: &BrokerConfig) -> Self {
        let initial = Duration::from_millis(config.reconnect_delay_ms);
        Self {
            current: initial,
            initial,
            max: Duration::from_millis(config.max_reconnect_delay_ms),
        }
    }

    pub(crate) fn reset(&mut self) {
        self.current = self.initial;
    }

    /// Delay to sleep before the next attempt, doubling for the one after.
    pub(crate) fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.max);
        delay
    }
}
