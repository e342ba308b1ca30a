//! Ordered, serialized fan-out to every sink.

use super::Sink;
use crate::error::{Result, ReaderError};
use parking_lot::Mutex;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, warn};

struct FanOutState {
    /// Sinks in registration order. The display sink is always first.
    sinks: Vec<Box<dyn Sink>>,
    closed: bool,
}

/// Writes each message to all sinks in order.
///
/// A single lock covers the whole message (text line plus separator line
/// across every sink), so concurrent writers never interleave.
pub struct SinkFanOut {
    state: Mutex<FanOutState>,
    separator: Option<String>,
    messages_written: AtomicU64,
    write_failures: AtomicU64,
}

impl SinkFanOut {
    /// Create a fan-out whose first sink is the live display.
    pub fn new(display: impl Sink + 'static) -> Self {
        Self {
            state: Mutex::new(FanOutState {
                sinks: vec![Box::new(display)],
                closed: false,
            }),
            separator: None,
            messages_written: AtomicU64::new(0),
            write_failures: AtomicU64::new(0),
        }
    }

    /// Register another sink after the existing ones.
    pub fn with_sink(mut self, sink: impl Sink + 'static) -> Self {
        self.state.get_mut().sinks.push(Box::new(sink));
        self
    }

    /// Line written after every message.
    pub fn with_separator(mut self, separator: Option<String>) -> Self {
        self.separator = separator;
        self
    }

    pub fn separator(&self) -> Option<&str> {
        self.separator.as_deref()
    }

    /// Names of the registered sinks, in write order.
    pub fn sink_names(&self) -> Vec<String> {
        self.state
            .lock()
            .sinks
            .iter()
            .map(|s| s.name().to_string())
            .collect()
    }

    /// Write one rendered message (and the separator) to every sink.
    ///
    /// A failing sink does not stop the others. The first failure is
    /// returned after all sinks were attempted.
    pub fn write_message(&self, text: &str) -> Result<()> {
        let mut state = self.state.lock();
        if state.closed {
            debug!("sinks closed, dropping message");
            return Ok(());
        }

        let mut first_error = None;
        let mut accepted = 0usize;
        for sink in state.sinks.iter_mut() {
            if let Err(source) = write_one(&mut **sink, text, self.separator.as_deref()) {
                self.write_failures.fetch_add(1, Ordering::Relaxed);
                warn!(sink = sink.name(), error = %source, "sink write failed");
                if first_error.is_none() {
                    first_error = Some(ReaderError::SinkWrite {
                        sink: sink.name().to_string(),
                        source,
                    });
                }
            } else {
                accepted += 1;
            }
        }
        if accepted > 0 {
            self.messages_written.fetch_add(1, Ordering::Relaxed);
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Write a status line to the display sink only.
    pub fn notice(&self, text: &str) -> Result<()> {
        let mut state = self.state.lock();
        if state.closed {
            return Ok(());
        }
        let Some(display) = state.sinks.first_mut() else {
            return Ok(());
        };
        write_one(&mut **display, text, None).map_err(|source| ReaderError::SinkWrite {
            sink: display.name().to_string(),
            source,
        })
    }

    /// Flush and close every sink. Later calls are no-ops.
    pub fn flush_and_close(&self) -> Result<()> {
        let mut state = self.state.lock();
        if state.closed {
            return Ok(());
        }
        state.closed = true;

        let mut first_error = None;
        for sink in state.sinks.iter_mut() {
            if let Err(source) = sink.close() {
                warn!(sink = sink.name(), error = %source, "failed to close sink");
                if first_error.is_none() {
                    first_error = Some(ReaderError::SinkWrite {
                        sink: sink.name().to_string(),
                        source,
                    });
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }
    /// Messages accepted by at least one sink.
    /// Messages handed to the sinks.
    pub fn messages_written(&self) -> u64 {
        self.messages_written.load(Ordering::Relaxed)
    }

    /// Individual sink writes that failed.
    pub fn write_failures(&self) -> u64 {
        self.write_failures.load(Ordering::Relaxed)
    }
}

fn write_one(sink: &mut dyn Sink, text: &str, separator: Option<&str>) -> io::Result<()> {
    sink.write_line(text)?;
    if let Some(sep) = separator {
        sink.write_line(sep)?;
    }
    sink.flush()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sinks::MemorySink;
    use proptest::prelude::*;
    use std::sync::Arc;
    use std::thread;

    struct BrokenSink;

    impl Sink for BrokenSink {
        fn name(&self) -> &str {
            "broken"
        }

        fn write_line(&mut self, _line: &str) -> io::Result<()> {
            Err(io::Error::new(io::ErrorKind::Other, "disk full"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_writes_to_every_sink_in_order() {
        let display = MemorySink::new("display");
        let file = MemorySink::new("file");
        let fanout = SinkFanOut::new(display.clone()).with_sink(file.clone());

        fanout.write_message("one").unwrap();
        fanout.write_message("two").unwrap();

        assert_eq!(display.lines(), vec!["one", "two"]);
        assert_eq!(file.lines(), vec!["one", "two"]);
        assert_eq!(fanout.sink_names(), vec!["display", "file"]);
        assert_eq!(fanout.messages_written(), 2);
    }

    #[test]
    fn test_separator_follows_each_message() {
        let display = MemorySink::new("display");
        let file = MemorySink::new("file");
        let fanout = SinkFanOut::new(display.clone())
            .with_sink(file.clone())
            .with_separator(Some("---".to_string()));

        fanout.write_message("a").unwrap();
        fanout.write_message("b").unwrap();

        assert_eq!(display.contents(), "a\n---\nb\n---\n");
        assert_eq!(file.contents(), "a\n---\nb\n---\n");
    }

    #[test]
    fn test_notice_goes_to_display_only() {
        let display = MemorySink::new("display");
        let file = MemorySink::new("file");
        let fanout = SinkFanOut::new(display.clone()).with_sink(file.clone());

        fanout.notice("Subscribing...").unwrap();

        assert_eq!(display.lines(), vec!["Subscribing..."]);
        assert!(file.lines().is_empty());
        assert_eq!(fanout.messages_written(), 0);
    }

    #[test]
    fn test_failing_sink_does_not_block_others() {
        let display = MemorySink::new("display");
        let file = MemorySink::new("file");
        let fanout = SinkFanOut::new(display.clone())
            .with_sink(BrokenSink)
            .with_sink(file.clone());

        let result = fanout.write_message("m1");
        assert!(matches!(result, Err(ReaderError::SinkWrite { ref sink, .. }) if sink == "broken"));

        fanout.write_message("m2").unwrap_err();

        assert_eq!(display.lines(), vec!["m1", "m2"]);
        assert_eq!(file.lines(), vec!["m1", "m2"]);
        assert_eq!(fanout.write_failures(), 2);
        assert_eq!(fanout.messages_written(), 2);
    }

    #[test]
    fn test_message_rejected_by_every_sink_is_not_counted() {
        let fanout = SinkFanOut::new(BrokenSink).with_sink(BrokenSink);

        fanout.write_message("lost").unwrap_err();

        assert_eq!(fanout.messages_written(), 0);
        assert_eq!(fanout.write_failures(), 2);
    }

    #[test]
    fn test_close_is_idempotent_and_final() {
        let display = MemorySink::new("display");
        let fanout = SinkFanOut::new(display.clone());

        fanout.write_message("before").unwrap();
        fanout.flush_and_close().unwrap();
        fanout.flush_and_close().unwrap();
        fanout.write_message("after").unwrap();

        assert!(fanout.is_closed());
        assert!(display.is_closed());
        assert_eq!(display.lines(), vec!["before"]);
    }

    #[test]
    fn test_concurrent_writers_never_interleave() {
        let file = MemorySink::new("file");
        let fanout = Arc::new(
            SinkFanOut::new(MemorySink::new("display"))
                .with_sink(file.clone())
                .with_separator(Some("--".to_string())),
        );

        let workers: Vec<_> = (0..4)
            .map(|w| {
                let fanout = Arc::clone(&fanout);
                thread::spawn(move || {
                    for i in 0..50 {
                        fanout.write_message(&format!("w{}-{}", w, i)).unwrap();
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }

        let lines = file.lines();
        assert_eq!(lines.len(), 400);
        for pair in lines.chunks(2) {
            assert!(pair[0].starts_with('w'));
            assert_eq!(pair[1], "--");
        }
    }

    proptest! {
        #[test]
        fn prop_file_order_matches_write_order(messages in prop::collection::vec("[a-z0-9]{1,12}", 0..40)) {
            let file = MemorySink::new("file");
            let fanout = SinkFanOut::new(MemorySink::new("display")).with_sink(file.clone());
            for m in &messages {
                fanout.write_message(m).unwrap();
            }
            prop_assert_eq!(file.lines(), messages);
        }
    }
}
