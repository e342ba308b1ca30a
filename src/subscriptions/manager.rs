//! Subscription manager: connection, delivery thread and reconnection.

use crate::broker::{Broker, BrokerConnection};
use crate::error::{Result, ReaderError};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TryRecvError};
use parking_lot::RwLock;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::policy::ReconnectPolicy;
use super::types::{
    MessageHandler, SubscriberEvent, SubscriberState, SubscriptionSettings, SubscriptionStats,
};

/// Default wait per delivery poll. Bounds how long `stop` can take when idle.
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Max buffered health events before new ones are dropped.
const EVENT_BUFFER_SIZE: usize = 256;

/// Opens a subscription and hands it to a delivery thread.
///
/// `start` consumes the manager, so one manager drives at most one
/// subscription.
pub struct SubscriptionManager {
    broker: Arc<dyn Broker>,
    settings: SubscriptionSettings,
    poll_interval: Duration,
    state: Arc<RwLock<SubscriberState>>,
    stats: Arc<SubscriptionStats>,
    events_tx: Sender<SubscriberEvent>,
    events_rx: Receiver<SubscriberEvent>,
}

impl SubscriptionManager {
    /// Create a manager in the `Idle` state.
    pub fn new(broker: Arc<dyn Broker>, settings: SubscriptionSettings) -> Self {
        let (events_tx, events_rx) = bounded(EVENT_BUFFER_SIZE);
        Self {
            broker,
            settings,
            poll_interval: DEFAULT_POLL_INTERVAL,
            state: Arc::new(RwLock::new(SubscriberState::Idle)),
            stats: Arc::new(SubscriptionStats::default()),
            events_tx,
            events_rx,
        }
    }

    /// Override the delivery poll interval.
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn settings(&self) -> &SubscriptionSettings {
        &self.settings
    }

    pub fn state(&self) -> SubscriberState {
        *self.state.read()
    }

    /// Receiver for health events. Take it before `start` to see `Connected`.
    pub fn events(&self) -> Receiver<SubscriberEvent> {
        self.events_rx.clone()
    }

    /// Connect, bind and start delivering to `handler`.
    ///
    /// The initial connection is attempted exactly once; failure is returned
    /// as [`ReaderError::Connect`] and nothing keeps running.
    pub fn start<H>(self, handler: H) -> Result<SubscriptionHandle>
    where
        H: MessageHandler + 'static,
    {
        *self.state.write() = SubscriberState::Connecting;
        info!(
            exchange = %self.settings.exchange_name,
            queue = %self.settings.queue_name,
            "connecting"
        );

        let connection = match self.broker.open(&self.settings) {
            Ok(connection) => connection,
            Err(e) => {
                *self.state.write() = SubscriberState::Stopped;
                return Err(ReaderError::Connect(e.to_string()));
            }
        };

        *self.state.write() = SubscriberState::Consuming;
        emit(
            &self.events_tx,
            SubscriberEvent::Connected {
                queue: self.settings.queue_name.clone(),
            },
        );

        let (shutdown_tx, shutdown_rx) = bounded::<()>(0);
        let queue_name = self.settings.queue_name.clone();
        let state = Arc::clone(&self.state);
        let stats = Arc::clone(&self.stats);
        let events = self.events_rx.clone();

        let worker = DeliveryWorker {
            policy: ReconnectPolicy::from_settings(&self.settings),
            broker: self.broker,
            settings: self.settings,
            connection: Some(connection),
            handler,
            shutdown: shutdown_rx,
            poll_interval: self.poll_interval,
            state: Arc::clone(&state),
            stats: Arc::clone(&stats),
            events: self.events_tx,
        };

        let thread = thread::Builder::new()
            .name("exchange-tap-delivery".to_string())
            .spawn(move || worker.run())?;

        Ok(SubscriptionHandle {
            queue_name,
            shutdown: Some(shutdown_tx),
            thread: Some(thread),
            state,
            stats,
            events,
        })
    }
}

/// A running subscription.
///
/// Dropping the handle stops the subscription.
pub struct SubscriptionHandle {
    queue_name: String,
    /// Dropped to request shutdown.
    shutdown: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
    state: Arc<RwLock<SubscriberState>>,
    stats: Arc<SubscriptionStats>,
    events: Receiver<SubscriberEvent>,
}

impl SubscriptionHandle {
    pub fn queue_name(&self) -> &str {
        &self.queue_name
    }

    pub fn state(&self) -> SubscriberState {
        *self.state.read()
    }

    pub fn stats(&self) -> &SubscriptionStats {
        &self.stats
    }

    pub fn events(&self) -> Receiver<SubscriberEvent> {
        self.events.clone()
    }

    /// Stop consuming and close the connection.
    ///
    /// A delivery already being handled runs to completion; no handler call
    /// starts after this returns. Safe to call more than once.
    pub fn stop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            {
                let mut state = self.state.write();
                if *state != SubscriberState::Stopped {
                    *state = SubscriberState::Stopping;
                }
            }
            drop(shutdown);
        }

        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("delivery thread panicked");
                *self.state.write() = SubscriberState::Stopped;
            }
        }
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

/// State owned by the delivery thread.
struct DeliveryWorker<H> {
    broker: Arc<dyn Broker>,
    settings: SubscriptionSettings,
    /// `None` while disconnected.
    connection: Option<Box<dyn BrokerConnection>>,
    handler: H,
    policy: ReconnectPolicy,
    shutdown: Receiver<()>,
    poll_interval: Duration,
    state: Arc<RwLock<SubscriberState>>,
    stats: Arc<SubscriptionStats>,
    events: Sender<SubscriberEvent>,
}

impl<H: MessageHandler> DeliveryWorker<H> {
    fn run(mut self) {
        while !self.stop_requested() {
            let delivery = match self.connection.as_mut() {
                Some(connection) => connection.next_delivery(self.poll_interval),
                None => {
                    if !self.reconnect() {
                        break;
                    }
                    continue;
                }
            };

            match delivery {
                Ok(Some(payload)) => {
                    if self.stop_requested() {
                        break;
                    }
                    self.stats.record_delivery();
                    self.handler.handle(&payload);
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(error = %e, "connection lost, reconnecting");
                    self.stats.record_disconnect();
                    self.set_state(SubscriberState::Reconnecting);
                    emit(
                        &self.events,
                        SubscriberEvent::Disconnected {
                            error: e.to_string(),
                        },
                    );
                    if let Some(connection) = self.connection.take() {
                        connection.close();
                    }
                }
            }
        }

        self.set_state(SubscriberState::Stopping);
        if let Some(connection) = self.connection.take() {
            connection.close();
        }
        self.set_state(SubscriberState::Stopped);
        emit(&self.events, SubscriberEvent::Stopped);
        info!(queue = %self.settings.queue_name, "subscription stopped");
    }

    /// One reconnection attempt after the fixed delay.
    ///
    /// Returns false if stop was requested while waiting.
    fn reconnect(&mut self) -> bool {
        match self.shutdown.recv_timeout(self.policy.delay()) {
            Err(RecvTimeoutError::Timeout) => {}
            _ => return false,
        }

        match self.broker.open(&self.settings) {
            Ok(connection) => {
                let after_failures = self.policy.record_success();
                self.connection = Some(connection);
                self.stats.record_reconnect();
                self.set_state(SubscriberState::Consuming);
                info!(after_failures, "reconnected");
                emit(&self.events, SubscriberEvent::Reconnected { after_failures });
            }
            Err(e) => {
                let alarm = self.policy.record_failure();
                let attempt = self.policy.consecutive_failures();
                self.stats.record_reconnect_failure();
                warn!(attempt, error = %e, "reconnect failed");
                emit(
                    &self.events,
                    SubscriberEvent::ReconnectFailed {
                        attempt,
                        error: e.to_string(),
                    },
                );
                if alarm {
                    self.stats.record_alarm();
                    error!(
                        consecutive_failures = attempt,
                        exchange = %self.settings.exchange_name,
                        "reconnect alarm"
                    );
                    emit(
                        &self.events,
                        SubscriberEvent::ReconnectAlarm {
                            consecutive_failures: attempt,
                        },
                    );
                }
            }
        }
        true
    }

    fn stop_requested(&self) -> bool {
        matches!(self.shutdown.try_recv(), Err(TryRecvError::Disconnected))
    }

    fn set_state(&self, next: SubscriberState) {
        let mut state = self.state.write();
        debug!(from = ?*state, to = ?next, "subscriber state");
        *state = next;
    }
}

/// Send an event, dropping it if nobody is keeping up.
fn emit(events: &Sender<SubscriberEvent>, event: SubscriberEvent) {
    let _ = events.try_send(event);
}
