//! Per-delivery processing: decode, render, filter, write.

use super::MessageHandler;
use crate::codec::Codec;
use crate::filter::MessageFilter;
use crate::sinks::SinkFanOut;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// What happened to one delivery.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Written to the sinks.
    Written,
    /// Written, but at least one sink failed.
    PartiallyWritten,
    /// Rendering did not match the filter.
    FilteredOut,
    /// Payload could not be decoded; dropped.
    DecodeFailed,
}

/// Per-outcome counters.
#[derive(Debug, Default)]
pub struct PipelineStats {
    written: AtomicU64,
    filtered_out: AtomicU64,
    decode_failures: AtomicU64,
    sink_failures: AtomicU64,
}

impl PipelineStats {
    pub fn written(&self) -> u64 {
        self.written.load(Ordering::Relaxed)
    }

    pub fn filtered_out(&self) -> u64 {
        self.filtered_out.load(Ordering::Relaxed)
    }

    pub fn decode_failures(&self) -> u64 {
        self.decode_failures.load(Ordering::Relaxed)
    }

    /// Deliveries where some sink rejected the write.
    pub fn sink_failures(&self) -> u64 {
        self.sink_failures.load(Ordering::Relaxed)
    }

    fn record(&self, outcome: DeliveryOutcome) {
        let counter = match outcome {
            DeliveryOutcome::Written => &self.written,
            DeliveryOutcome::PartiallyWritten => &self.sink_failures,
            DeliveryOutcome::FilteredOut => &self.filtered_out,
            DeliveryOutcome::DecodeFailed => &self.decode_failures,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// The delivery callback used by the reader.
pub struct DeliveryPipeline {
    codec: Codec,
    filter: MessageFilter,
    sinks: Arc<SinkFanOut>,
    stats: Arc<PipelineStats>,
}

impl DeliveryPipeline {
    pub fn new(codec: Codec, filter: MessageFilter, sinks: Arc<SinkFanOut>) -> Self {
        Self {
            codec,
            filter,
            sinks,
            stats: Arc::new(PipelineStats::default()),
        }
    }

    pub fn stats(&self) -> Arc<PipelineStats> {
        Arc::clone(&self.stats)
    }

    /// Run one payload through the pipeline.
    ///
    /// Neither decode nor sink failures escape: the message is logged and
    /// the subscription carries on with the next delivery.
    pub fn process(&self, payload: &[u8]) -> DeliveryOutcome {
        let outcome = self.process_inner(payload);
        self.stats.record(outcome);
        outcome
    }

    fn process_inner(&self, payload: &[u8]) -> DeliveryOutcome {
        let text = match self.codec.decode(payload) {
            Ok(message) => message.render(),
            Err(e) => {
                warn!(
                    format = %self.codec.format(),
                    bytes = payload.len(),
                    error = %e,
                    "dropping undecodable message"
                );
                return DeliveryOutcome::DecodeFailed;
            }
        };

        if !self.filter.matches(&text) {
            debug!("message filtered out");
            return DeliveryOutcome::FilteredOut;
        }

        match self.sinks.write_message(&text) {
            Ok(()) => DeliveryOutcome::Written,
            // Already logged per sink by the fan-out.
            Err(_) => DeliveryOutcome::PartiallyWritten,
        }
    }
}

impl MessageHandler for DeliveryPipeline {
    fn handle(&self, payload: &[u8]) {
        self.process(payload);
    }
}
