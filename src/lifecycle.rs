//! Reader lifecycle: startup, wait, shutdown.
//!
//! Startup fails fast, in order: configuration, filter, output file,
//! initial connection. Shutdown always stops the subscription before the
//! sinks are flushed and closed, so no message write races the close.

use crate::broker::Broker;
use crate::codec::Codec;
use crate::config::ReaderConfig;
use crate::error::Result;
use crate::filter::MessageFilter;
use crate::sinks::{FileSink, Sink, SinkFanOut};
use crate::subscriptions::{
    DeliveryPipeline, PipelineStats, SubscriberEvent, SubscriberState, SubscriptionHandle,
    SubscriptionManager,
};
use crossbeam_channel::Receiver;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Whether the reader is consuming.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReaderState {
    Running,
    Stopped,
}

/// Counters collected at shutdown.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Deliveries handed to the pipeline.
    pub deliveries: u64,
    /// Messages written to every sink.
    pub written: u64,
    /// Messages that did not match the filter.
    pub filtered_out: u64,
    /// Payloads that failed to decode.
    pub decode_failures: u64,
    /// Messages where at least one sink write failed.
    pub sink_failures: u64,
    /// Connection drops while running.
    pub disconnects: u64,
    /// Error from the final flush, if any.
    pub flush_error: Option<String>,
}

/// A configured, not yet started reader.
pub struct Reader {
    config: ReaderConfig,
    broker: Arc<dyn Broker>,
    display: Box<dyn Sink>,
    poll_interval: Option<Duration>,
}

impl Reader {
    /// `display` receives every message and all status lines.
    pub fn new(config: ReaderConfig, broker: Arc<dyn Broker>, display: impl Sink + 'static) -> Self {
        Self {
            config,
            broker,
            display: Box::new(display),
            poll_interval: None,
        }
    }

    /// Override how often the delivery thread checks for shutdown.
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = Some(poll_interval);
        self
    }

    pub fn config(&self) -> &ReaderConfig {
        &self.config
    }

    /// Run the startup sequence and begin consuming.
    pub fn start(self) -> Result<RunningReader> {
        self.config.validate()?;

        let codec = Codec::for_format(self.config.format);
        let filter = MessageFilter::from_option(self.config.filter.as_deref())?;

        let mut sinks =
            SinkFanOut::new(self.display).with_separator(self.config.separator.clone());
        if let Some(path) = self.config.output_path() {
            sinks = sinks.with_sink(FileSink::open(path, self.config.append_output)?);
        }
        let sinks = Arc::new(sinks);

        if let Some(pattern) = filter.pattern() {
            notice(&sinks, &format!("Filter: \"{}\"", pattern));
        }
        notice(&sinks, "Subscribing...");

        let settings = self.config.subscription_settings();
        let pipeline = DeliveryPipeline::new(codec, filter, Arc::clone(&sinks));
        let pipeline_stats = pipeline.stats();

        let mut manager = SubscriptionManager::new(self.broker, settings);
        if let Some(poll_interval) = self.poll_interval {
            manager = manager.with_poll_interval(poll_interval);
        }

        let subscription = match manager.start(pipeline) {
            Ok(subscription) => subscription,
            Err(e) => {
                // Nothing was written yet; release the output file.
                if let Err(close_error) = sinks.flush_and_close() {
                    warn!(error = %close_error, "failed to close output");
                }
                return Err(e);
            }
        };

        notice(&sinks, "Subscriber is started");
        info!(
            exchange = %self.config.exchange_name,
            queue = subscription.queue_name(),
            format = %codec.format(),
            sinks = ?sinks.sink_names(),
            "reader started"
        );

        Ok(RunningReader {
            subscription,
            sinks,
            pipeline_stats,
            state: ReaderState::Running,
            report: None,
        })
    }

    /// Start, block until `stop` fires, then shut down.
    pub fn run(self, stop: &Receiver<()>) -> Result<ShutdownReport> {
        let mut running = self.start()?;
        running.wait(stop);
        Ok(running.shutdown())
    }
}

/// A started reader.
///
/// Dropping it without calling [`shutdown`](Self::shutdown) shuts it down.
pub struct RunningReader {
    subscription: SubscriptionHandle,
    sinks: Arc<SinkFanOut>,
    pipeline_stats: Arc<PipelineStats>,
    state: ReaderState,
    report: Option<ShutdownReport>,
}

impl RunningReader {
    pub fn state(&self) -> ReaderState {
        self.state
    }

    pub fn queue_name(&self) -> &str {
        self.subscription.queue_name()
    }

    pub fn subscription_state(&self) -> SubscriberState {
        self.subscription.state()
    }

    pub fn events(&self) -> Receiver<SubscriberEvent> {
        self.subscription.events()
    }

    pub fn pipeline_stats(&self) -> &PipelineStats {
        &self.pipeline_stats
    }

    /// Write a status line to the display sink.
    pub fn notice(&self, text: &str) {
        notice(&self.sinks, text);
    }

    /// Block until `stop` receives a value or all its senders are gone.
    pub fn wait(&self, stop: &Receiver<()>) {
        let _ = stop.recv();
    }

    /// Stop the subscription, then flush and close the sinks.
    ///
    /// Only the first call does any work; later calls return the same report.
    pub fn shutdown(&mut self) -> ShutdownReport {
        if let Some(report) = &self.report {
            return report.clone();
        }

        info!(queue = self.subscription.queue_name(), "stopping reader");
        self.subscription.stop();

        let flush_error = match self.sinks.flush_and_close() {
            Ok(()) => None,
            Err(e) => {
                warn!(error = %e, "failed to flush output");
                Some(e.to_string())
            }
        };
        self.state = ReaderState::Stopped;

        let stats = self.subscription.stats();
        let report = ShutdownReport {
            deliveries: stats.deliveries(),
            written: self.pipeline_stats.written(),
            filtered_out: self.pipeline_stats.filtered_out(),
            decode_failures: self.pipeline_stats.decode_failures(),
            sink_failures: self.pipeline_stats.sink_failures(),
            disconnects: stats.disconnects(),
            flush_error,
        };
        info!(?report, "reader stopped");
        self.report = Some(report.clone());
        report
    }
}

impl Drop for RunningReader {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn notice(sinks: &SinkFanOut, text: &str) {
    if let Err(e) = sinks.notice(text) {
        warn!(error = %e, "failed to write status line");
    }
}
