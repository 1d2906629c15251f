//! Early console
//!
//! A single locked console over the build-time UART backend, fed
//! through an unbuffered [`BufferedTx`] front-end (stdout-style sinks
//! stay unbuffered; newline translation happens in the driver).
//! Provides `core::fmt::Write` plumbing and the `print!`/`println!`
//! macros used before (and by) the kernel logger.

use core::fmt::{self, Write};

use xino_arch::SpinLock;
use xino_common::VirtAddr;

use crate::iobuf::{BufMode, BufferedTx};
use crate::uart::{Driver, TxSink};

struct Console {
    tx: BufferedTx<Driver>,
    initialized: bool,
}

impl Console {
    const fn new() -> Self {
        Self {
            tx: BufferedTx::new(Driver::new(), BufMode::Unbuffered),
            initialized: false,
        }
    }
}

impl Write for Console {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        if self.initialized {
            self.tx.write(s.as_bytes());
        }
        Ok(())
    }
}

static CONSOLE: SpinLock<Console> = SpinLock::new(Console::new());

/// Bring up the console on the UART at `base`.
pub fn init(base: VirtAddr) {
    let mut c = CONSOLE.lock();
    c.tx.sink_mut().init(base, true);
    c.initialized = true;
}

/// Retarget the console after a VA remap of the device window.
pub fn set_base(base: VirtAddr) {
    CONSOLE.lock().tx.sink_mut().set_base(base);
}

/// Write formatted output to the console (used by the macros and the
/// kernel logger; cheap no-op before `init`).
pub fn write_fmt(args: fmt::Arguments) {
    // Output is best-effort; the sink never fails.
    let _ = CONSOLE.lock().write_fmt(args);
}

/// Write raw bytes to the console.
pub fn write_bytes(bytes: &[u8]) {
    let mut c = CONSOLE.lock();
    if c.initialized {
        c.tx.write(bytes);
    }
}

#[macro_export]
macro_rules! print {
    ($($arg:tt)*) => {
        $crate::console::write_fmt(core::format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! println {
    () => { $crate::print!("\n") };
    ($($arg:tt)*) => {
        $crate::console::write_fmt(core::format_args!("{}\n", core::format_args!($($arg)*)))
    };
}
