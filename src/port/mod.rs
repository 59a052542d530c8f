//! Per-platform serial port engines behind one public type.
//!
//! Every backend provides the same `SerialPort` surface: the lifecycle
//! controller (`open`/`close`/`is_open`), the write entry points, and the
//! listener registry. The POSIX backends drive a readiness worker over the
//! platform poller; the Windows backend drives a completion-port worker
//! over overlapped operations.

#[cfg(unix)]
mod unix;

#[cfg(unix)]
pub use unix::SerialPort;

#[cfg(windows)]
mod windows;

#[cfg(windows)]
pub use windows::SerialPort;
