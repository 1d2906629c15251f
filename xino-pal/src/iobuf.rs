//! Buffered output
//!
//! [`BufferedTx`] batches bytes in front of a [`TxSink`] with the three
//! classic disciplines: fully buffered, line buffered (flush through
//! the last newline of each write), and unbuffered (write-through).
//! The console runs its sinks unbuffered; the buffered modes exist for
//! bulk writers that would otherwise pay the TX busy-wait per byte.

use core::fmt;

use crate::uart::TxSink;

/// Internal buffer capacity.
const BUF_SIZE: usize = 256;

/// Buffering discipline.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum BufMode {
    /// Write-through; every write is pushed and flushed immediately.
    #[default]
    Unbuffered,
    /// Buffer, but flush through the last newline of each write.
    Line,
    /// Buffer until full (or an explicit flush).
    Full,
}

/// A buffering front-end over a TX sink.
pub struct BufferedTx<S: TxSink> {
    sink: S,
    mode: BufMode,
    buf: [u8; BUF_SIZE],
    /// Fill level of `buf`.
    out: usize,
}

impl<S: TxSink> BufferedTx<S> {
    #[must_use]
    pub const fn new(sink: S, mode: BufMode) -> Self {
        Self {
            sink,
            mode,
            buf: [0; BUF_SIZE],
            out: 0,
        }
    }

    /// The sink, for reconfiguration (`init`, `set_base`).
    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    /// Push all buffered bytes to the sink.
    pub fn flush(&mut self) {
        for i in 0..self.out {
            self.sink.putc(self.buf[i]);
        }
        self.out = 0;
    }

    /// Buffer `bytes`, spilling to the sink as the buffer fills; writes
    /// at least a buffer's worth bypass the copy entirely.
    fn write_no_flush(&mut self, bytes: &[u8]) {
        let mut bytes = bytes;

        while !bytes.is_empty() {
            if self.out == BUF_SIZE {
                self.flush();
            }

            if self.out == 0 && bytes.len() >= BUF_SIZE {
                // Bypass the buffer for large writes.
                for &b in bytes {
                    self.sink.putc(b);
                }
                return;
            }

            let n = bytes.len().min(BUF_SIZE - self.out);
            self.buf[self.out..self.out + n].copy_from_slice(&bytes[..n]);
            self.out += n;
            bytes = &bytes[n..];
        }
    }

    /// Write `bytes` under the configured discipline.
    pub fn write(&mut self, bytes: &[u8]) {
        let (flush_len, rest_len) = match self.mode {
            BufMode::Full => (0, bytes.len()),
            BufMode::Line => {
                // Flush through the last newline; buffer the tail.
                let cut = bytes
                    .iter()
                    .rposition(|&b| b == b'\n')
                    .map_or(0, |p| p + 1);
                (cut, bytes.len() - cut)
            }
            BufMode::Unbuffered => (bytes.len(), 0),
        };

        if flush_len > 0 {
            self.write_no_flush(&bytes[..flush_len]);
            self.flush();
        }

        if rest_len > 0 {
            self.write_no_flush(&bytes[bytes.len() - rest_len..]);
        }
    }
}

impl<S: TxSink> fmt::Write for BufferedTx<S> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.write(s.as_bytes());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    use xino_common::VirtAddr;

    /// Recording sink.
    #[derive(Default)]
    struct Recorder {
        bytes: RefCell<Vec<u8>>,
    }

    impl TxSink for Recorder {
        fn init(&mut self, _base: VirtAddr, _fifo: bool) {}

        fn putc(&self, c: u8) {
            self.bytes.borrow_mut().push(c);
        }

        fn set_base(&mut self, _base: VirtAddr) {}
    }

    fn seen(b: &BufferedTx<Recorder>) -> Vec<u8> {
        b.sink.bytes.borrow().clone()
    }

    #[test]
    fn unbuffered_writes_through() {
        let mut b = BufferedTx::new(Recorder::default(), BufMode::Unbuffered);
        b.write(b"abc");
        assert_eq!(seen(&b), b"abc");
    }

    #[test]
    fn full_mode_holds_until_flush() {
        let mut b = BufferedTx::new(Recorder::default(), BufMode::Full);
        b.write(b"hold");
        assert!(seen(&b).is_empty());
        b.flush();
        assert_eq!(seen(&b), b"hold");
    }

    #[test]
    fn full_mode_spills_when_full() {
        let mut b = BufferedTx::new(Recorder::default(), BufMode::Full);
        let chunk = [b'x'; BUF_SIZE];
        b.write(&chunk);
        b.write(b"y");
        // The first buffer-full spilled to make room for the tail.
        assert_eq!(seen(&b).len(), BUF_SIZE);
    }

    #[test]
    fn line_mode_flushes_through_last_newline() {
        let mut b = BufferedTx::new(Recorder::default(), BufMode::Line);
        b.write(b"one\ntwo\npartial");
        assert_eq!(seen(&b), b"one\ntwo\n");
        b.write(b" line\n");
        assert_eq!(seen(&b), b"one\ntwo\npartial line\n");
    }

    #[test]
    fn line_mode_buffers_without_newline() {
        let mut b = BufferedTx::new(Recorder::default(), BufMode::Line);
        b.write(b"no newline yet");
        assert!(seen(&b).is_empty());
        b.flush();
        assert_eq!(seen(&b), b"no newline yet");
    }

    #[test]
    fn large_write_bypasses_the_buffer() {
        let mut b = BufferedTx::new(Recorder::default(), BufMode::Full);
        let big = vec![b'z'; 3 * BUF_SIZE];
        b.write(&big);
        assert_eq!(seen(&b), big);
    }

    #[test]
    fn fmt_write_plumbs_through() {
        use core::fmt::Write;

        let mut b = BufferedTx::new(Recorder::default(), BufMode::Unbuffered);
        write!(b, "v{}.{}", 1, 2).unwrap();
        assert_eq!(seen(&b), b"v1.2");
    }
}
