//! Output sinks for rendered messages.
//!
//! Every message that passes the filter is written to each registered sink
//! in registration order: the console first, then the optional output file.
//! [`SinkFanOut`] serializes all writes so two messages never interleave.

mod console;
mod fanout;
mod file;
mod memory;

use std::io;

pub use console::ConsoleSink;
pub use fanout::SinkFanOut;
pub use file::FileSink;
pub use memory::MemorySink;

/// An append-only text destination.
pub trait Sink: Send {
    /// Short name used in logs and errors.
    fn name(&self) -> &str;

    /// Write `line` followed by a line terminator.
    fn write_line(&mut self, line: &str) -> io::Result<()>;

    /// Push buffered data to the underlying target.
    fn flush(&mut self) -> io::Result<()>;

    /// Flush and release the target. Later writes fail.
    fn close(&mut self) -> io::Result<()> {
        self.flush()
    }
}

impl<S: Sink + ?Sized> Sink for Box<S> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn write_line(&mut self, line: &str) -> io::Result<()> {
        (**self).write_line(line)
    }

    fn flush(&mut self) -> io::Result<()> {
        (**self).flush()
    }

    fn close(&mut self) -> io::Result<()> {
        (**self).close()
    }
}

pub(crate) fn closed_error(name: &str) -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, format!("sink {} is closed", name))
}
