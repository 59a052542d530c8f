//! Platform syscall shims and owned-handle guards.
//!
//! The concrete implementation is selected at compile time depending on
//! the target operating system.

#[cfg(unix)]
pub(crate) mod unix;

#[cfg(unix)]
pub(crate) use unix as platform;

#[cfg(windows)]
pub(crate) mod windows;

#[cfg(windows)]
pub(crate) use windows as platform;
