//! In-memory broker that replays a script.
//!
//! Payloads and disconnects are queued on the broker and consumed by
//! whichever connection is live, in order. Opening can be made to fail a
//! number of times to exercise the reconnect path.

use super::{Broker, BrokerConnection, BrokerError};
use crate::subscriptions::SubscriptionSettings;
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

enum ScriptEvent {
    Payload(Vec<u8>),
    Disconnect,
}

#[derive(Default)]
struct ScriptState {
    /// Remaining `open` calls that fail.
    refusals: usize,
    /// Every `open` call, successful or not.
    open_attempts: usize,
    /// Queue names of successful opens, in order.
    declared_queues: Vec<String>,
    /// Connections closed through `BrokerConnection::close`.
    closed: usize,
}

/// Scripted broker for tests and demos. Clones share the same script.
#[derive(Clone)]
pub struct ScriptedBroker {
    events: Sender<ScriptEvent>,
    receiver: Receiver<ScriptEvent>,
    state: Arc<Mutex<ScriptState>>,
}

impl ScriptedBroker {
    pub fn new() -> Self {
        let (events, receiver) = unbounded();
        Self {
            events,
            receiver,
            state: Arc::new(Mutex::new(ScriptState::default())),
        }
    }

    /// Queue a delivery body.
    pub fn publish(&self, payload: impl Into<Vec<u8>>) {
        let _ = self.events.send(ScriptEvent::Payload(payload.into()));
    }

    /// Queue a JSON delivery.
    pub fn publish_json(&self, value: &serde_json::Value) {
        self.publish(value.to_string());
    }

    /// Drop the live connection once everything queued before it was delivered.
    pub fn disconnect(&self) {
        let _ = self.events.send(ScriptEvent::Disconnect);
    }

    /// Make the next `count` open attempts fail.
    pub fn refuse_next(&self, count: usize) {
        self.state.lock().refusals += count;
    }

    /// Number of queued events not yet consumed.
    pub fn pending(&self) -> usize {
        self.receiver.len()
    }

    pub fn open_attempts(&self) -> usize {
        self.state.lock().open_attempts
    }

    pub fn declared_queues(&self) -> Vec<String> {
        self.state.lock().declared_queues.clone()
    }

    pub fn closed_connections(&self) -> usize {
        self.state.lock().closed
    }
}

impl Default for ScriptedBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl Broker for ScriptedBroker {
    fn open(
        &self,
        settings: &SubscriptionSettings,
    ) -> Result<Box<dyn BrokerConnection>, BrokerError> {
        let mut state = self.state.lock();
        state.open_attempts += 1;
        if state.refusals > 0 {
            state.refusals -= 1;
            return Err(BrokerError::Unreachable(format!(
                "connection to {} refused",
                settings.connection_string
            )));
        }
        state.declared_queues.push(settings.queue_name.clone());

        Ok(Box::new(ScriptedConnection {
            events: self.receiver.clone(),
            state: Arc::clone(&self.state),
            alive: true,
        }))
    }
}

struct ScriptedConnection {
    events: Receiver<ScriptEvent>,
    state: Arc<Mutex<ScriptState>>,
    alive: bool,
}

impl BrokerConnection for ScriptedConnection {
    fn next_delivery(&mut self, timeout: Duration) -> Result<Option<Vec<u8>>, BrokerError> {
        if !self.alive {
            return Err(BrokerError::ConnectionLost("disconnected".to_string()));
        }
        match self.events.recv_timeout(timeout) {
            Ok(ScriptEvent::Payload(body)) => Ok(Some(body)),
            Ok(ScriptEvent::Disconnect) => {
                self.alive = false;
                Err(BrokerError::ConnectionLost("scripted disconnect".to_string()))
            }
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => Ok(None),
        }
    }

    fn close(self: Box<Self>) {
        self.state.lock().closed += 1;
    }
}
