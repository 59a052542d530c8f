//! Device transport: opening the raw device handle and applying line
//! settings (baud rate, byte size, stop bits, parity) at open time.
//!
//! Configuration translation is a pure lookup: numeric rates map to OS
//! symbolic constants through a fixed table, and a value outside the table
//! fails hard instead of being clamped.

#[cfg(unix)]
pub(crate) mod unix;

#[cfg(unix)]
pub(crate) use unix as platform;

#[cfg(windows)]
pub(crate) mod windows;

#[cfg(windows)]
pub(crate) use windows as platform;
