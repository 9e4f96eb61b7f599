//! Human-readable report output.
//!
//! Check findings go through [`CheckOutput`] rather than the process logger
//! so embedding callers and tests can capture the report. Diagnostics that
//! are not part of the report use `tracing`.

use std::io::{self, Write};
use std::sync::{Arc, Mutex};

/// Clonable handle to the report sink. Writes are line-buffered under a
/// mutex so concurrent workers never interleave partial lines.
#[derive(Clone)]
pub struct CheckOutput {
    sink: Arc<Mutex<Box<dyn Write + Send>>>,
}

impl CheckOutput {
    pub fn stderr() -> Self {
        Self::to_writer(io::stderr())
    }

    pub fn to_writer<W: Write + Send + 'static>(writer: W) -> Self {
        Self {
            sink: Arc::new(Mutex::new(Box::new(writer))),
        }
    }

    /// Report sink plus a handle that reads everything written to it.
    pub fn capture() -> (Self, CapturedReport) {
        let captured = CapturedReport::default();
        (Self::to_writer(captured.clone()), captured)
    }

    pub fn info(&self, msg: impl AsRef<str>) {
        self.write_line("INFO: ", msg.as_ref());
    }

    pub fn warn(&self, msg: impl AsRef<str>) {
        self.write_line("WARNING: ", msg.as_ref());
    }

    pub fn error(&self, msg: impl AsRef<str>) {
        self.write_line("ERROR: ", msg.as_ref());
    }

    /// Unprefixed line, used for checksum result blocks and delimiters.
    pub fn line(&self, msg: impl AsRef<str>) {
        self.write_line("", msg.as_ref());
    }

    fn write_line(&self, prefix: &str, msg: &str) {
        let mut sink = self.sink.lock().unwrap_or_else(|e| e.into_inner());
        let _ = writeln!(sink, "{prefix}{msg}");
    }
}

/// In-memory report buffer returned by [`CheckOutput::capture`].
#[derive(Clone, Default)]
pub struct CapturedReport {
    buf: Arc<Mutex<Vec<u8>>>,
}

impl CapturedReport {
    pub fn contents(&self) -> String {
        let buf = self.buf.lock().unwrap_or_else(|e| e.into_inner());
        String::from_utf8_lossy(&buf).into_owned()
    }
}

impl Write for CapturedReport {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        let mut buf = self.buf.lock().unwrap_or_else(|e| e.into_inner());
        buf.extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Format a byte count with IEC units, one decimal place from KiB up.
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit + 1 < UNITS.len() {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes}B")
    } else {
        format!("{value:.1}{}", UNITS[unit])
    }
}
