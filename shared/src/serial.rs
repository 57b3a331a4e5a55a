use core::fmt;

#[cfg(all(target_os = "none", target_arch = "x86"))]
mod port {
    use core::{
        arch::asm,
        fmt,
        sync::atomic::{AtomicBool, Ordering},
    };

    const IO_BASE: u16 = 0x3f8;
    const THR: u16 = IO_BASE; // Transmitter Holding Reg (write-only)
    const IER: u16 = IO_BASE + 1; // Interrupt Enable Reg
    const FCR: u16 = IO_BASE + 2; // FIFO Control Reg (write-only)
    const LCR: u16 = IO_BASE + 3; // Line Control Register
    const MCR: u16 = IO_BASE + 4; // MODEM Control Register
    const LSR: u16 = IO_BASE + 5; // Line Status Register (read-only)

    static INITIALIZED: AtomicBool = AtomicBool::new(false);

    unsafe fn outb(port: u16, byte: u8) {
        asm!("out dx, al", in("dx") port, in("al") byte)
    }

    unsafe fn inb(port: u16) -> u8 {
        let res: u8;
        asm!("in al, dx", in("dx") port, out("al") res);
        res
    }

    pub struct SerialWriter;

    impl SerialWriter {
        fn ensure_initialized(&self) {
            if INITIALIZED.swap(true, Ordering::AcqRel) {
                return;
            }

            // SAFETY: 115200 baud, 8N1, FIFO enabled; standard COM1 bring-up.
            unsafe {
                outb(IER, 0x00);
                outb(LCR, 0x80);
                outb(THR, 0x01);
                outb(IER, 0x00);
                outb(LCR, 0x03);
                outb(FCR, 0xC7);
                outb(MCR, 0x0B);
            }
        }
    }

    impl fmt::Write for SerialWriter {
        fn write_str(&mut self, s: &str) -> fmt::Result {
            self.ensure_initialized();

            for b in s.bytes() {
                // SAFETY: Waits for the transmit buffer to drain first.
                unsafe {
                    while inb(LSR) & 0x20 == 0 {}
                    outb(THR, b);
                }
            }

            Ok(())
        }
    }
}

#[doc(hidden)]
pub fn _print(args: fmt::Arguments) {
    #[cfg(all(target_os = "none", target_arch = "x86"))]
    {
        use core::fmt::Write;
        let _ = port::SerialWriter.write_fmt(args);
    }
    #[cfg(not(target_os = "none"))]
    std::print!("{args}");
    #[cfg(all(target_os = "none", not(target_arch = "x86")))]
    let _ = args;
}

/// The serial line has no separate error channel, so on bare metal this is
/// the same as [`_print`].
#[doc(hidden)]
pub fn _eprint(args: fmt::Arguments) {
    #[cfg(not(target_os = "none"))]
    std::eprint!("{args}");
    #[cfg(target_os = "none")]
    _print(args);
}
