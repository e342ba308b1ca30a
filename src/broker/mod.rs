//! Broker client abstraction.
//!
//! The subscription manager only needs three things from a broker: open a
//! bound, consuming connection; pull the next delivery; close it again.
//! [`AmqpBroker`] talks to a real RabbitMQ server, [`ScriptedBroker`] plays
//! back scripted deliveries and failures in memory.

mod amqp;
mod scripted;

use crate::subscriptions::SubscriptionSettings;
use std::time::Duration;
use thiserror::Error;

pub use amqp::AmqpBroker;
pub use scripted::ScriptedBroker;

/// Failures reported by a broker client.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum BrokerError {
    #[error("broker unreachable: {0}")]
    Unreachable(String),

    #[error("binding failed: {0}")]
    Binding(String),

    #[error("connection lost: {0}")]
    ConnectionLost(String),
}

/// Opens consuming connections.
pub trait Broker: Send + Sync {
    /// Connect, declare the private queue, bind it to the exchange and start
    /// consuming. Returns once deliveries can be pulled.
    fn open(&self, settings: &SubscriptionSettings)
        -> Result<Box<dyn BrokerConnection>, BrokerError>;
}

/// A live, bound consumer.
pub trait BrokerConnection: Send {
    /// Wait up to `timeout` for the next delivery body.
    ///
    /// `Ok(None)` means nothing arrived in time. An error means the
    /// connection is gone and must be reopened.
    fn next_delivery(&mut self, timeout: Duration) -> Result<Option<Vec<u8>>, BrokerError>;

    /// Unbind and close.
    fn close(self: Box<Self>);
}
