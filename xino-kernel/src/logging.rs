//! Kernel logging
//!
//! A `log` facade implementation over the early console. Records are
//! formatted into a fixed stack buffer first so a single locked console
//! write emits the whole line; oversized records are truncated rather
//! than split.

use core::fmt::{self, Write};

use log::{Level, LevelFilter, Log, Metadata, Record};

/// Fixed-capacity formatter. Overflow is dropped and flagged; the
/// reported `written` is what *would* have been needed, so callers can
/// detect truncation the `snprintf` way (`written >= capacity`).
pub struct TruncatingWriter<'a> {
    buf: &'a mut [u8],
    len: usize,
    written: usize,
}

impl<'a> TruncatingWriter<'a> {
    pub fn new(buf: &'a mut [u8]) -> Self {
        Self {
            buf,
            len: 0,
            written: 0,
        }
    }

    /// Bytes actually stored.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf[..self.len]
    }

    /// Bytes the full output needed (≥ capacity means truncated).
    #[allow(dead_code)]
    #[must_use]
    pub fn written(&self) -> usize {
        self.written
    }
}

impl Write for TruncatingWriter<'_> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        let bytes = s.as_bytes();
        self.written += bytes.len();

        let room = self.buf.len() - self.len;
        let n = bytes.len().min(room);
        self.buf[self.len..self.len + n].copy_from_slice(&bytes[..n]);
        self.len += n;
        Ok(())
    }
}

struct KernelLogger;

impl Log for KernelLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= Level::Debug
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        let mut buf = [0u8; 256];
        let mut w = TruncatingWriter::new(&mut buf);
        let _ = write!(w, "[{:5}] {}\n", record.level(), record.args());

        xino_pal::console::write_bytes(w.as_bytes());
    }

    fn flush(&self) {}
}

static LOGGER: KernelLogger = KernelLogger;

/// Install the kernel logger. Called once, right after the console is
/// up; later calls are ignored.
pub fn init() {
    if log::set_logger(&LOGGER).is_ok() {
        log::set_max_level(LevelFilter::Debug);
    }
}
