use std::fmt;
use std::io;

/// Errors surfaced by [`SerialPort`](crate::SerialPort) operations.
///
/// Transient OS conditions (would-block, interrupted calls, pending
/// overlapped I/O) are retried internally and never appear here. Write
/// failures that happen on the worker thread after a write was queued are
/// reported through the entry's completion callback, not through this type.
#[derive(Debug)]
pub enum Error {
    /// The device could not be acquired (missing path, permissions,
    /// already held exclusively).
    Open(io::Error),

    /// The OS rejected the requested line settings, or the settings are
    /// outside the accepted range (e.g. stop bits other than 1 or 2).
    Config(io::Error),

    /// The requested baud rate or byte size is not in the supported set.
    Convert { what: &'static str, value: u32 },

    /// A write failed terminally.
    Write(io::Error),

    /// The operation requires an open port.
    NotOpen,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Open(err) => write!(f, "failed to open serial port: {err}"),
            Error::Config(err) => write!(f, "failed to configure serial port: {err}"),
            Error::Convert { what, value } => {
                write!(f, "unsupported {what}: {value}")
            }
            Error::Write(err) => write!(f, "failed to write to serial port: {err}"),
            Error::NotOpen => write!(f, "serial port is not open"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Open(err) | Error::Config(err) | Error::Write(err) => Some(err),
            Error::Convert { .. } | Error::NotOpen => None,
        }
    }
}
