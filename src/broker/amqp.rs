//! RabbitMQ backend built on `amiquip`.
//!
//! amiquip consumers borrow their channel, so each connection runs on its
//! own thread that owns the whole connection/channel/queue/consumer stack
//! and forwards delivery bodies over a channel.

use super::{Broker, BrokerConnection, BrokerError};
use crate::subscriptions::SubscriptionSettings;
use amiquip::{
    Connection, ConsumerMessage, ConsumerOptions, FieldTable, QueueDeclareOptions,
};
use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};

/// How often the consumer thread checks for shutdown.
const CONSUMER_POLL: Duration = Duration::from_millis(100);

type DeliveryResult = Result<Vec<u8>, BrokerError>;

/// Connects to an AMQP 0-9-1 server.
#[derive(Clone, Debug, Default)]
pub struct AmqpBroker;

impl AmqpBroker {
    pub fn new() -> Self {
        Self
    }
}

impl Broker for AmqpBroker {
    fn open(
        &self,
        settings: &SubscriptionSettings,
    ) -> Result<Box<dyn BrokerConnection>, BrokerError> {
        let (ready_tx, ready_rx) = bounded(1);
        let (delivery_tx, delivery_rx) = unbounded();
        let (shutdown_tx, shutdown_rx) = bounded::<()>(0);
        let settings = settings.clone();

        let worker = thread::Builder::new()
            .name("amqp-consumer".to_string())
            .spawn(move || {
                let mut session = ConsumerSession {
                    ready: Some(ready_tx),
                    deliveries: delivery_tx,
                    shutdown: shutdown_rx,
                };
                session.run(&settings);
            })
            .map_err(|e| BrokerError::Unreachable(e.to_string()))?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Box::new(AmqpConnection {
                deliveries: delivery_rx,
                shutdown: Some(shutdown_tx),
                worker: Some(worker),
            })),
            Ok(Err(e)) => {
                let _ = worker.join();
                Err(e)
            }
            Err(_) => {
                let _ = worker.join();
                Err(BrokerError::Unreachable(
                    "consumer thread exited before connecting".to_string(),
                ))
            }
        }
    }
}

/// State owned by the consumer thread.
struct ConsumerSession {
    /// Startup result channel, consumed once the binding is live.
    ready: Option<Sender<Result<(), BrokerError>>>,
    deliveries: Sender<DeliveryResult>,
    shutdown: Receiver<()>,
}

impl ConsumerSession {
    fn run(&mut self, settings: &SubscriptionSettings) {
        let mut connection = match Connection::insecure_open(&settings.connection_string) {
            Ok(connection) => connection,
            Err(e) => {
                self.fail(BrokerError::Unreachable(e.to_string()));
                return;
            }
        };

        if let Err(e) = self.consume(&mut connection, settings) {
            if self.ready.is_some() {
                self.fail(BrokerError::Binding(e.to_string()));
            } else {
                self.fail(BrokerError::ConnectionLost(e.to_string()));
            }
        }

        if let Err(e) = connection.close() {
            debug!(error = %e, "error closing AMQP connection");
        }
    }

    fn consume(
        &mut self,
        connection: &mut Connection,
        settings: &SubscriptionSettings,
    ) -> amiquip::Result<()> {
        let channel = connection.open_channel(None)?;
        let exchange = channel.exchange_declare_passive(settings.exchange_name.clone())?;
        let queue = channel.queue_declare(
            settings.queue_name.clone(),
            QueueDeclareOptions {
                durable: settings.durable,
                exclusive: true,
                auto_delete: true,
                ..QueueDeclareOptions::default()
            },
        )?;
        queue.bind(&exchange, settings.routing_key.clone(), FieldTable::new())?;
        let consumer = queue.consume(ConsumerOptions {
            no_ack: true,
            exclusive: true,
            ..ConsumerOptions::default()
        })?;

        info!(
            exchange = %settings.exchange_name,
            queue = %settings.queue_name,
            "bound queue to exchange"
        );
        if let Some(ready) = self.ready.take() {
            let _ = ready.send(Ok(()));
        }

        loop {
            if matches!(self.shutdown.try_recv(), Err(TryRecvError::Disconnected)) {
                break;
            }
            match consumer.receiver().recv_timeout(CONSUMER_POLL) {
                Ok(ConsumerMessage::Delivery(delivery)) => {
                    if self.deliveries.send(Ok(delivery.body)).is_err() {
                        break;
                    }
                }
                Ok(other) => {
                    self.fail(BrokerError::ConnectionLost(format!("{:?}", other)));
                    return Ok(());
                }
                Err(e) if e.is_timeout() => {}
                Err(_) => {
                    self.fail(BrokerError::ConnectionLost(
                        "consumer channel closed".to_string(),
                    ));
                    return Ok(());
                }
            }
        }

        consumer.cancel()?;
        queue.unbind(&exchange, settings.routing_key.clone(), FieldTable::new())?;
        debug!(queue = %settings.queue_name, "unbound queue");
        Ok(())
    }

    /// Report an error to whoever is waiting: the opener before the binding
    /// is live, the delivery reader after.
    fn fail(&mut self, error: BrokerError) {
        match self.ready.take() {
            Some(ready) => {
                let _ = ready.send(Err(error));
            }
            None => {
                warn!(error = %error, "AMQP consumer stopped");
                let _ = self.deliveries.send(Err(error));
            }
        }
    }
}

/// Handle to a consumer thread.
struct AmqpConnection {
    deliveries: Receiver<DeliveryResult>,
    shutdown: Option<Sender<()>>,
    worker: Option<JoinHandle<()>>,
}

impl AmqpConnection {
    fn shutdown(&mut self) {
        drop(self.shutdown.take());
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("AMQP consumer thread panicked");
            }
        }
    }
}

impl BrokerConnection for AmqpConnection {
    fn next_delivery(&mut self, timeout: Duration) -> Result<Option<Vec<u8>>, BrokerError> {
        match self.deliveries.recv_timeout(timeout) {
            Ok(Ok(body)) => Ok(Some(body)),
            Ok(Err(e)) => Err(e),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(BrokerError::ConnectionLost(
                "consumer thread exited".to_string(),
            )),
        }
    }

    fn close(mut self: Box<Self>) {
        self.shutdown();
    }
}

impl Drop for AmqpConnection {
    fn drop(&mut self) {
        self.shutdown();
    }
}
