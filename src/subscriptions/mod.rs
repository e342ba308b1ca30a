//! Subscription to a broker exchange.
//!
//! This module owns the consuming side of the reader:
//! - Opening the broker connection and binding the private queue
//! - Pulling deliveries on a dedicated thread, in broker order
//! - Reconnecting on a fixed delay, with an optional alarm
//! - Stopping cleanly so no delivery is handled after `stop` returns
//!
//! # Example
//!
//! ```ignore
//! let manager = SubscriptionManager::new(Arc::new(AmqpBroker::new()), settings);
//! let events = manager.events();
//!
//! let mut handle = manager.start(|payload: &[u8]| {
//!     println!("{} bytes", payload.len());
//! })?;
//!
//! // Watch connection health
//! while let Ok(event) = events.recv() {
//!     if let SubscriberEvent::ReconnectAlarm { consecutive_failures } = event {
//!         eprintln!("still disconnected after {} attempts", consecutive_failures);
//!     }
//! }
//!
//! handle.stop();
//! ```

mod manager;
mod pipeline;
mod policy;
mod types;

pub use manager::{SubscriptionHandle, SubscriptionManager};
pub use pipeline::{DeliveryOutcome, DeliveryPipeline, PipelineStats};
pub use policy::ReconnectPolicy;
pub use types::{
    MessageHandler, SubscriberEvent, SubscriberState, SubscriptionSettings, SubscriptionStats,
};
