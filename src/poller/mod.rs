//! Platform-specific I/O poller abstraction (POSIX backends).
//!
//! The poller gives the engine worker one interface over the OS readiness
//! multiplexer:
//!
//! - register the device descriptor with read (and later write) interest,
//! - block waiting for readiness with no timeout,
//! - wake the blocked wait call from another thread on shutdown.
//!
//! The wake channel is part of the poller: an `eventfd` on Linux, a
//! self-pipe on macOS. Its activity is reported as the boolean result of
//! [`poll`](Poller::poll) rather than as an event, because the only
//! thing it ever signals is engine shutdown.
//!
//! The concrete implementation is selected at compile time depending on
//! the target operating system.

#[cfg(target_os = "linux")]
mod epoll;

#[cfg(target_os = "macos")]
mod kqueue;

#[cfg(target_os = "linux")]
pub(crate) use epoll::EpollPoller as Poller;

#[cfg(target_os = "macos")]
pub(crate) use kqueue::KqueuePoller as Poller;

/// Reserved token for the wake channel.
///
/// Device registrations use small tokens; `usize::MAX` can never collide.
pub(crate) const WAKE_TOKEN: usize = usize::MAX;

/// Readiness directions a registration subscribes to.
#[derive(Clone, Copy)]
pub(crate) struct Interest {
    pub(crate) read: bool,
    pub(crate) write: bool,
}

impl Interest {
    pub(crate) const READ: Self = Self {
        read: true,
        write: false,
    };

    pub(crate) const READ_WRITE: Self = Self {
        read: true,
        write: true,
    };
}

/// One readiness event delivered by [`Poller::poll`].
pub(crate) struct Event {
    pub(crate) token: usize,
    pub(crate) readable: bool,
    pub(crate) writable: bool,
}
