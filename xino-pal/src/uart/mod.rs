//! Boot UART backends
//!
//! Each backend is a tiny TX-only driver suitable for early boot:
//! `init` selects the MMIO base and programs line/FIFO control, `putc`
//! busy-waits for TX space and translates `'\n'` to CRLF, `set_base`
//! retargets the driver after a pure VA remap without reprogramming the
//! device.
//!
//! Neither backend touches baud rate or clocking: platform firmware is
//! expected to have configured the line before handoff.

pub mod dw8250;
pub mod pl011;

pub use dw8250::Dw8250;
pub use pl011::Pl011;

use xino_common::VirtAddr;

/// A byte sink backed by a transmit-only UART.
pub trait TxSink {
    /// Bring up the device at `base`. Baud rate and clock are left as
    /// firmware configured them.
    fn init(&mut self, base: VirtAddr, fifo: bool);

    /// Blocking TX of one byte; `'\n'` is sent as `"\r\n"`.
    fn putc(&self, c: u8);

    /// Change the MMIO base without reprogramming (pure VA remap).
    fn set_base(&mut self, base: VirtAddr);
}

/// The backend selected at build time.
#[cfg(feature = "uart-dw8250")]
pub type Driver = Dw8250;
#[cfg(not(feature = "uart-dw8250"))]
pub type Driver = Pl011;
