/// Baud rates accepted by [`SerialPortOptions::baud_rate`].
///
/// Every backend validates membership in this set before touching the OS;
/// a rate outside it fails with [`Error::Convert`](crate::Error::Convert)
/// instead of being clamped.
pub const SUPPORTED_BAUD_RATES: [u32; 19] = [
    0, 50, 75, 110, 134, 150, 200, 300, 600, 1200, 1800, 2400, 4800, 9600, 19200, 38400, 57600,
    115200, 230400,
];

/// Parity bit configuration.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Parity {
    #[default]
    None,
    Odd,
    Even,
}

/// Line settings applied when a port is opened.
///
/// Immutable once passed to [`SerialPort::new`](crate::SerialPort::new);
/// reconfiguring requires closing and reopening the port.
///
/// The timeouts are applied through `SetCommTimeouts` on Windows and are
/// advisory on the POSIX backends, which run the device non-blocking.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SerialPortOptions {
    /// Numeric baud rate; must belong to [`SUPPORTED_BAUD_RATES`].
    pub baud_rate: u32,

    /// Data bits per character: 5, 6, 7 or 8.
    pub byte_size: u8,

    /// Stop bits: 1 or 2.
    pub stop_bits: u8,

    pub parity: Parity,

    /// Read timeout in milliseconds.
    pub read_timeout: u32,

    /// Write timeout in milliseconds.
    pub write_timeout: u32,
}

impl Default for SerialPortOptions {
    fn default() -> Self {
        Self {
            baud_rate: 9600,
            byte_size: 8,
            stop_bits: 1,
            parity: Parity::None,
            read_timeout: 50,
            write_timeout: 50,
        }
    }
}
