//! 16550A serial port driver, used for the early console and as the
//! backend for [`crate::log`].

use core::fmt;

use spin::Mutex;
use x86_64::instructions::port::Port;

pub struct SerialPort {
    data: Port<u8>,
    int_enable: Port<u8>,
    fifo_ctrl: Port<u8>,
    line_ctrl: Port<u8>,
    modem_ctrl: Port<u8>,
    line_status: Port<u8>,
}

impl SerialPort {
    /// # Safety
    /// `base` must be the I/O port base of a real, unshared 16550A-compatible
    /// UART (or QEMU's emulation of one).
    pub const unsafe fn new(base: u16) -> Self {
        SerialPort {
            data: Port::new(base),
            int_enable: Port::new(base + 1),
            fifo_ctrl: Port::new(base + 2),
            line_ctrl: Port::new(base + 3),
            modem_ctrl: Port::new(base + 4),
            line_status: Port::new(base + 5),
        }
    }

    pub fn init(&mut self) {
        unsafe {
            self.int_enable.write(0x00);
            self.line_ctrl.write(0x80); // enable DLAB
            self.data.write(0x03); // divisor low byte: 38400 baud
            self.int_enable.write(0x00); // divisor high byte
            self.line_ctrl.write(0x03); // 8 bits, no parity, one stop bit
            self.fifo_ctrl.write(0xC7); // enable FIFO, clear, 14-byte threshold
            self.modem_ctrl.write(0x0B); // RTS/DSR set
            self.int_enable.write(0x01);
        }
    }

    fn is_transmit_empty(&mut self) -> bool {
        unsafe { self.line_status.read() & 0x20 != 0 }
    }

    pub fn send(&mut self, data: u8) {
        while !self.is_transmit_empty() {
            core::hint::spin_loop();
        }
        unsafe {
            self.data.write(data);
        }
    }

    pub fn send_string(&mut self, s: &str) {
        for byte in s.bytes() {
            match byte {
                0x20..=0x7e | b'\n' => self.send(byte),
                _ => self.send(b'.'),
            }
        }
    }
}

impl fmt::Write for SerialPort {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.send_string(s);
        Ok(())
    }
}

static SERIAL1: Mutex<Option<SerialPort>> = Mutex::new(None);

/// Bring up COM1. Must run before anything calls [`writer`] or installs
/// [`crate::log`].
pub fn init() {
    let mut serial = unsafe { SerialPort::new(0x3F8) };
    serial.init();
    *SERIAL1.lock() = Some(serial);
}

/// A zero-sized `fmt::Write` handle onto COM1. Each write locks the
/// underlying port for the duration of that single `write_str` call, so
/// it is safe to construct fresh per log line rather than held across
/// calls. Silently drops output if `init` has not run yet (e.g. a log
/// line emitted before boot reaches `serial::init`).
pub struct SerialWriter;

impl fmt::Write for SerialWriter {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        if let Some(serial) = SERIAL1.lock().as_mut() {
            serial.write_str(s)
        } else {
            Ok(())
        }
    }
}

pub fn writer() -> SerialWriter {
    SerialWriter
}
