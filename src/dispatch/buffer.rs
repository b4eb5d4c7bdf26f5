use std::io;
use std::sync::{Arc, Mutex, PoisonError};
use tracing_subscriber::fmt::MakeWriter;

/// Output collected for the mail report.
///
/// Shared by every job and by the logging layer; each append takes the
/// lock once so lines of concurrent jobs never tear.
#[derive(Debug, Clone, Default)]
pub struct ReportBuffer {
    inner: Arc<Mutex<String>>,
}

impl ReportBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `lines`, each preceded by `prefix` and followed by a newline
    pub fn append_lines(&self, prefix: &str, lines: &[String]) {
        if lines.is_empty() {
            return;
        }
        let mut buf = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        for line in lines {
            buf.push_str(prefix);
            buf.push_str(line);
            buf.push('\n');
        }
    }

    pub fn append(&self, text: &str) {
        let mut buf = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        buf.push_str(text);
    }

    pub fn contents(&self) -> String {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_empty(&self) -> bool {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_empty()
    }
}

/// `io::Write` handle used by the mail logging layer
pub struct ReportWriter {
    buffer: ReportBuffer,
}

impl io::Write for ReportWriter {
    fn write(&mut self, bytes: &[u8]) -> io::Result<usize> {
        self.buffer.append(&String::from_utf8_lossy(bytes));
        Ok(bytes.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for ReportBuffer {
    type Writer = ReportWriter;

    fn make_writer(&'a self) -> Self::Writer {
        ReportWriter {
            buffer: self.clone(),
        }
    }
}
