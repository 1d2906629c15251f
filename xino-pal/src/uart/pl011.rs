//! Arm PL011 UART (TX-only)
//!
//! Register layout per the PL011 TRM, section 3.2.

use xino_common::VirtAddr;
use xino_mmio::{readl, writel};

use super::TxSink;

// Register offsets.
const UARTDR: u64 = 0x000; // Data
const UARTFR: u64 = 0x018; // Flags
const UARTLCR_H: u64 = 0x02c; // Line control
const UARTCR: u64 = 0x030; // Control
const UARTIMSC: u64 = 0x038; // Interrupt mask set/clear
const UARTICR: u64 = 0x044; // Interrupt clear

// Bitfields.
const UARTFR_TXFF: u32 = 1 << 5; // TX FIFO full
const UARTCR_UARTEN: u32 = 1 << 0;
const UARTCR_TXE: u32 = 1 << 8;
const UARTLCR_H_WLEN_8: u32 = 3 << 5;
const UARTLCR_H_FEN: u32 = 1 << 4;

/// PL011 backend. Zero base means "not initialized"; output is dropped.
pub struct Pl011 {
    base: VirtAddr,
}

impl Pl011 {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            base: VirtAddr::null(),
        }
    }

    #[inline]
    fn reg(&self, off: u64) -> VirtAddr {
        self.base + off
    }

    /// Busy-wait until the TX FIFO has space.
    fn wait_tx_space(&self) {
        // SAFETY: `base` points at a live PL011 register window.
        while unsafe { readl(self.reg(UARTFR)) } & UARTFR_TXFF != 0 {
            core::hint::spin_loop();
        }
    }

    fn tx(&self, c: u8) {
        self.wait_tx_space();
        // SAFETY: `base` points at a live PL011 register window.
        unsafe { writel(c as u32, self.reg(UARTDR)) };
    }
}

impl TxSink for Pl011 {
    fn init(&mut self, base: VirtAddr, fifo: bool) {
        self.base = base;

        // SAFETY: the caller hands us the device's register window.
        unsafe {
            writel(0x0, self.reg(UARTCR)); // disable UART
            writel(0x0, self.reg(UARTIMSC)); // mask interrupts
            writel(0x7ff, self.reg(UARTICR)); // clear pending interrupts
            writel(
                UARTLCR_H_WLEN_8 | if fifo { UARTLCR_H_FEN } else { 0 },
                self.reg(UARTLCR_H),
            );
            writel(UARTCR_UARTEN | UARTCR_TXE, self.reg(UARTCR));
        }
    }

    fn putc(&self, c: u8) {
        if self.base.is_null() {
            return;
        }

        if c == b'\n' {
            self.tx(b'\r');
        }
        self.tx(c);
    }

    fn set_base(&mut self, base: VirtAddr) {
        self.base = base;
    }
}

impl Default for Pl011 {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // A zeroed register window stands in for the device: FR reads as
    // "TX FIFO empty", so the driver never spins.
    fn reg_at(regs: &mut [u32; 18], off: u64) -> u32 {
        // Read back through a volatile load so the test observes the
        // same memory the driver wrote through raw pointers.
        unsafe { core::ptr::read_volatile(regs.as_mut_ptr().add((off / 4) as usize)) }
    }

    #[test]
    fn init_programs_line_and_control() {
        let mut regs = [0u32; 18];
        let base = VirtAddr::from_ptr(regs.as_mut_ptr());

        let mut uart = Pl011::new();
        uart.init(base, true);

        assert_eq!(reg_at(&mut regs, UARTLCR_H), UARTLCR_H_WLEN_8 | UARTLCR_H_FEN);
        assert_eq!(reg_at(&mut regs, UARTCR), UARTCR_UARTEN | UARTCR_TXE);
        assert_eq!(reg_at(&mut regs, UARTIMSC), 0);
        assert_eq!(reg_at(&mut regs, UARTICR), 0x7ff);
    }

    #[test]
    fn putc_writes_the_data_register() {
        let mut regs = [0u32; 18];
        let mut uart = Pl011::new();
        uart.init(VirtAddr::from_ptr(regs.as_mut_ptr()), false);

        uart.putc(b'x');
        assert_eq!(reg_at(&mut regs, UARTDR), b'x' as u32);
    }

    #[test]
    fn uninitialized_driver_drops_output() {
        let uart = Pl011::new();
        uart.putc(b'x'); // must not touch memory
    }
}
