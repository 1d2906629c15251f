//! Synopsys DesignWare APB UART (NS16550-like, TX-only)
//!
//! Standard 8250 register map with 4-byte stride, as found on Rockchip
//! RK3588 and similar SoCs.

use xino_common::VirtAddr;
use xino_mmio::{readl, writel};

use super::TxSink;

// Register offsets (4-byte stride).
const THR: u64 = 0x0000; // Transmit holding
const IER: u64 = 0x0004; // Interrupt enable
const FCR: u64 = 0x0008; // FIFO control
const LCR: u64 = 0x000c; // Line control
const MCR: u64 = 0x0010; // Modem control
const LSR: u64 = 0x0014; // Line status

// Bitfields.
const LCR_WLEN8: u32 = 3;
const FCR_FIFOE: u32 = 1 << 0; // FIFO enable
const FCR_RFIFOR: u32 = 1 << 1; // RX FIFO reset
const FCR_XFIFOR: u32 = 1 << 2; // TX FIFO reset
const LSR_THRE: u32 = 1 << 5; // TX holding register empty

/// DW-APB backend. Zero base means "not initialized"; output is dropped.
pub struct Dw8250 {
    base: VirtAddr,
}

impl Dw8250 {
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

    /// Busy-wait until the TX holding register is empty.
    fn wait_tx_space(&self) {
        // SAFETY: `base` points at a live DW-APB register window.
        while unsafe { readl(self.reg(LSR)) } & LSR_THRE == 0 {
            core::hint::spin_loop();
        }
    }

    fn tx(&self, c: u8) {
        self.wait_tx_space();
        // SAFETY: `base` points at a live DW-APB register window.
        unsafe { writel(c as u32, self.reg(THR)) };
    }
}

impl TxSink for Dw8250 {
    fn init(&mut self, base: VirtAddr, fifo: bool) {
        self.base = base;

        // SAFETY: the caller hands us the device's register window.
        unsafe {
            writel(0x0, self.reg(IER)); // disable interrupts
            writel(LCR_WLEN8, self.reg(LCR)); // 8N1, no parity
            writel(
                if fifo { FCR_FIFOE | FCR_RFIFOR | FCR_XFIFOR } else { 0 },
                self.reg(FCR),
            );
            writel(0x0, self.reg(MCR)); // no modem control
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

impl Default for Dw8250 {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reg_at(regs: &mut [u32; 8], off: u64) -> u32 {
        unsafe { core::ptr::read_volatile(regs.as_mut_ptr().add((off / 4) as usize)) }
    }

    fn set_reg(regs: &mut [u32; 8], off: u64, v: u32) {
        unsafe { core::ptr::write_volatile(regs.as_mut_ptr().add((off / 4) as usize), v) };
    }

    #[test]
    fn init_programs_the_line() {
        let mut regs = [0u32; 8];
        let mut uart = Dw8250::new();
        uart.init(VirtAddr::from_ptr(regs.as_mut_ptr()), true);

        assert_eq!(reg_at(&mut regs, IER), 0);
        assert_eq!(reg_at(&mut regs, LCR), LCR_WLEN8);
        assert_eq!(reg_at(&mut regs, FCR), FCR_FIFOE | FCR_RFIFOR | FCR_XFIFOR);
        assert_eq!(reg_at(&mut regs, MCR), 0);
    }

    #[test]
    fn putc_waits_on_thre_then_writes() {
        let mut regs = [0u32; 8];
        let mut uart = Dw8250::new();
        uart.init(VirtAddr::from_ptr(regs.as_mut_ptr()), false);

        // Report "holding register empty" so TX proceeds.
        set_reg(&mut regs, LSR, LSR_THRE);
        uart.putc(b'z');
        assert_eq!(reg_at(&mut regs, THR), b'z' as u32);
    }
}
