//! In-memory sink.

use super::{closed_error, Sink};
use parking_lot::Mutex;
use std::io;
use std::sync::Arc;

#[derive(Default)]
struct Buffer {
    lines: Vec<String>,
    flushes: usize,
    closed: bool,
}

/// Collects lines in memory. Clones share the same buffer, so a test can
/// keep one clone and hand the other to the reader.
#[derive(Clone)]
pub struct MemorySink {
    name: String,
    buffer: Arc<Mutex<Buffer>>,
}

impl MemorySink {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            buffer: Arc::new(Mutex::new(Buffer::default())),
        }
    }

    /// Lines written so far.
    pub fn lines(&self) -> Vec<String> {
        self.buffer.lock().lines.clone()
    }

    /// Everything written, joined the way a file would hold it.
    pub fn contents(&self) -> String {
        self.buffer
            .lock()
            .lines
            .iter()
            .map(|line| format!("{}\n", line))
            .collect()
    }

    pub fn flush_count(&self) -> usize {
        self.buffer.lock().flushes
    }

    pub fn is_closed(&self) -> bool {
        self.buffer.lock().closed
    }
}

impl Default for MemorySink {
    fn default() -> Self {
        Self::new("memory")
    }
}

impl Sink for MemorySink {
    fn name(&self) -> &str {
        &self.name
    }

    fn write_line(&mut self, line: &str) -> io::Result<()> {
        let mut buffer = self.buffer.lock();
        if buffer.closed {
            return Err(closed_error(&self.name));
        }
        buffer.lines.push(line.to_string());
        Ok(())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.buffer.lock().flushes += 1;
        Ok(())
    }

    fn close(&mut self) -> io::Result<()> {
        let mut buffer = self.buffer.lock();
        if !buffer.closed {
            buffer.flushes += 1;
            buffer.closed = true;
        }
        Ok(())
    }
}
