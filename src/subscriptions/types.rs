//! Subscription types.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Marker placed between the exchange name and the unique suffix of
/// generated queue names.
const QUEUE_NAME_TAG: &str = "exchange-tap";

/// Everything needed to open and maintain a subscription.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubscriptionSettings {
    /// Broker connection string.
    pub connection_string: String,

    /// Exchange the queue is bound to.
    pub exchange_name: String,

    /// Private queue name, unique per process instance.
    pub queue_name: String,

    /// Binding routing key.
    pub routing_key: String,

    /// Whether the queue survives a broker restart. Always false here.
    pub durable: bool,

    /// Fixed delay between reconnection attempts.
    pub reconnect_delay: Duration,

    /// Consecutive failures before an alarm (<= 0 = never).
    pub reconnect_alarm_threshold: i32,
}

impl SubscriptionSettings {
    /// `<exchange>.exchange-tap-<uuid>`
    pub fn generate_queue_name(exchange_name: &str) -> String {
        format!(
            "{}.{}-{}",
            exchange_name,
            QUEUE_NAME_TAG,
            uuid::Uuid::new_v4()
        )
    }
}

/// Lifecycle of a subscription.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubscriberState {
    /// Created, not started.
    Idle,
    /// Opening the initial connection.
    Connecting,
    /// Bound and receiving deliveries.
    Consuming,
    /// Connection lost, retrying.
    Reconnecting,
    /// Stop requested, finishing the in-flight delivery.
    Stopping,
    /// Connection closed. Terminal.
    Stopped,
}

/// Connection health events.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SubscriberEvent {
    /// Initial connection established.
    Connected { queue: String },

    /// The live connection dropped.
    Disconnected { error: String },

    /// A reconnection attempt failed.
    ReconnectFailed { attempt: u32, error: String },

    /// Consecutive failures reached the configured threshold. Retrying
    /// continues regardless.
    ReconnectAlarm { consecutive_failures: u32 },

    /// Connection restored.
    Reconnected { after_failures: u32 },

    /// Subscription stopped.
    Stopped,
}

/// Receives raw delivery bodies.
///
/// Called from the delivery thread, one delivery at a time, in broker order.
pub trait MessageHandler: Send + Sync {
    fn handle(&self, payload: &[u8]);
}

impl<F> MessageHandler for F
where
    F: Fn(&[u8]) + Send + Sync,
{
    fn handle(&self, payload: &[u8]) {
        self(payload)
    }
}

/// Counters shared between the delivery thread and the handle.
#[derive(Debug, Default)]
pub struct SubscriptionStats {
    deliveries: AtomicU64,
    disconnects: AtomicU64,
    reconnects: AtomicU64,
    reconnect_failures: AtomicU64,
    alarms: AtomicU64,
}

impl SubscriptionStats {
    pub fn deliveries(&self) -> u64 {
        self.deliveries.load(Ordering::Relaxed)
    }

    pub fn disconnects(&self) -> u64 {
        self.disconnects.load(Ordering::Relaxed)
    }

    pub fn reconnects(&self) -> u64 {
        self.reconnects.load(Ordering::Relaxed)
    }

    pub fn reconnect_failures(&self) -> u64 {
        self.reconnect_failures.load(Ordering::Relaxed)
    }

    pub fn alarms(&self) -> u64 {
        self.alarms.load(Ordering::Relaxed)
    }

    pub(crate) fn record_delivery(&self) {
        self.deliveries.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_disconnect(&self) {
        self.disconnects.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_reconnect(&self) {
        self.reconnects.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_reconnect_failure(&self) {
        self.reconnect_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_alarm(&self) {
        self.alarms.fetch_add(1, Ordering::Relaxed);
    }
}
