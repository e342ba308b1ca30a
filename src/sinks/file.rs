//! Persisted log file sink.

use super::{closed_error, Sink};
use crate::error::Result;
use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Append-only output file.
///
/// The handle is write-only and is released exactly once, by [`Sink::close`].
pub struct FileSink {
    /// Path to the output file.
    path: PathBuf,

    /// Display name ("file:<path>").
    name: String,

    /// Buffered handle, `None` once closed.
    writer: Option<BufWriter<File>>,
}

impl FileSink {
    /// Open `path`, truncating it unless `append` is set.
    pub fn open(path: impl AsRef<Path>, append: bool) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let mut options = OpenOptions::new();
        options.write(true).create(true);
        if append {
            options.append(true);
        } else {
            options.truncate(true);
        }
        let file = options.open(&path)?;

        debug!(path = %path.display(), append, "opened output file");

        Ok(Self {
            name: format!("file:{}", path.display()),
            path,
            writer: Some(BufWriter::new(file)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_closed(&self) -> bool {
        self.writer.is_none()
    }
}

impl Sink for FileSink {
    fn name(&self) -> &str {
        &self.name
    }

    fn write_line(&mut self, line: &str) -> io::Result<()> {
        let writer = self.writer.as_mut().ok_or_else(|| closed_error(&self.name))?;
        writer.write_all(line.as_bytes())?;
        writer.write_all(b"\n")
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.writer.as_mut() {
            Some(writer) => writer.flush(),
            None => Ok(()),
        }
    }

    fn close(&mut self) -> io::Result<()> {
        let Some(mut writer) = self.writer.take() else {
            return Ok(());
        };
        writer.flush()?;
        writer.get_ref().sync_all()?;
        debug!(path = %self.path.display(), "closed output file");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_truncate_mode() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.log");
        fs::write(&path, "A\n").unwrap();

        let mut sink = FileSink::open(&path, false).unwrap();
        sink.write_line("B").unwrap();
        sink.close().unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "B\n");
    }

    #[test]
    fn test_append_mode() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.log");
        fs::write(&path, "A\n").unwrap();

        let mut sink = FileSink::open(&path, true).unwrap();
        sink.write_line("B").unwrap();
        sink.close().unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "A\nB\n");
    }

    #[test]
    fn test_creates_missing_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("new.log");

        let mut sink = FileSink::open(&path, true).unwrap();
        sink.write_line("first").unwrap();
        sink.close().unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "first\n");
    }

    #[test]
    fn test_write_after_close_fails() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.log");

        let mut sink = FileSink::open(&path, false).unwrap();
        sink.close().unwrap();
        assert!(sink.is_closed());

        assert!(sink.write_line("late").is_err());
        // Closing twice is a no-op
        sink.close().unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "");
    }

    #[test]
    fn test_open_in_missing_directory_fails() {
        let dir = TempDir::new().unwrap();
        let result = FileSink::open(dir.path().join("nope").join("out.log"), false);
        assert!(result.is_err());
    }
}
