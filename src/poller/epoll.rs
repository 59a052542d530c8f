//! Linux `epoll`-based poller implementation.
//!
//! Functionally equivalent to the macOS `kqueue` poller and exposes the
//! same interface to the engine worker.
//!
//! Responsibilities:
//! - Register the device descriptor with read/write interests
//! - Block waiting for I/O readiness with no timeout
//! - Wake the blocked wait call when the engine must shut down
//!
//! The wake channel is an `eventfd` registered under [`WAKE_TOKEN`];
//! writing to it makes `epoll_wait` return even though no device I/O
//! occurred. This backend is selected automatically on Linux targets.

use super::{Event, Interest, WAKE_TOKEN};
use crate::sys::platform::Fd;

use libc::{
    EPOLL_CLOEXEC, EPOLL_CTL_ADD, EPOLL_CTL_MOD, EPOLLERR, EPOLLHUP, EPOLLIN, EPOLLOUT,
    epoll_create1, epoll_ctl, epoll_event, epoll_wait,
};
use std::io;
use std::mem;
use std::os::fd::RawFd;

const EVENT_CAPACITY: usize = 64;

fn interest_flags(interest: Interest) -> u32 {
    let mut flags = 0;

    if interest.read {
        flags |= EPOLLIN as u32;
    }
    if interest.write {
        flags |= EPOLLOUT as u32;
    }

    flags
}

/// Linux `epoll` poller.
///
/// Owns the epoll instance and the `eventfd` wake channel; both close when
/// the poller drops.
pub(crate) struct EpollPoller {
    epoll: Fd,
    wake: Fd,
}

impl EpollPoller {
    /// Creates the epoll instance and registers a non-blocking `eventfd`
    /// as the persistent wake source.
    pub(crate) fn new() -> io::Result<Self> {
        let epoll = unsafe { epoll_create1(EPOLL_CLOEXEC) };
        if epoll < 0 {
            return Err(io::Error::last_os_error());
        }
        let epoll = Fd::new(epoll);

        let eventfd = unsafe { libc::eventfd(0, libc::EFD_NONBLOCK | libc::EFD_CLOEXEC) };
        if eventfd < 0 {
            return Err(io::Error::last_os_error());
        }
        let wake = Fd::new(eventfd);

        let mut event = epoll_event {
            events: EPOLLIN as u32,
            u64: WAKE_TOKEN as u64,
        };

        let rc = unsafe { epoll_ctl(epoll.raw(), EPOLL_CTL_ADD, wake.raw(), &mut event) };
        if rc != 0 {
            return Err(io::Error::last_os_error());
        }

        Ok(Self { epoll, wake })
    }

    /// Registers a file descriptor with the poller.
    pub(crate) fn register(&self, fd: RawFd, token: usize, interest: Interest) -> io::Result<()> {
        let mut event = epoll_event {
            events: interest_flags(interest),
            u64: token as u64,
        };

        let rc = unsafe { epoll_ctl(self.epoll.raw(), EPOLL_CTL_ADD, fd, &mut event) };
        if rc != 0 {
            return Err(io::Error::last_os_error());
        }

        Ok(())
    }

    /// Updates interest flags for an already registered descriptor.
    ///
    /// Callable from any thread while another thread is blocked in
    /// [`poll`](Self::poll); the kernel applies the change immediately.
    pub(crate) fn set_interest(
        &self,
        fd: RawFd,
        token: usize,
        interest: Interest,
    ) -> io::Result<()> {
        let mut event = epoll_event {
            events: interest_flags(interest),
            u64: token as u64,
        };

        let rc = unsafe { epoll_ctl(self.epoll.raw(), EPOLL_CTL_MOD, fd, &mut event) };
        if rc != 0 {
            return Err(io::Error::last_os_error());
        }

        Ok(())
    }

    /// Wakes the poller.
    ///
    /// Writes to the internal `eventfd`, causing a blocked `epoll_wait`
    /// to return with wake-channel activity.
    pub(crate) fn wake(&self) {
        let buf: u64 = 1;
        unsafe {
            libc::write(self.wake.raw(), &buf as *const _ as *const _, 8);
        }
    }

    /// Polls for I/O readiness events, blocking with no timeout.
    ///
    /// Returns `true` if wake-channel activity was observed. An
    /// interrupted wait (`EINTR`) is retried transparently by returning an
    /// empty, un-woken result so the caller re-enters the wait.
    pub(crate) fn poll(&self, events: &mut Vec<Event>) -> io::Result<bool> {
        let mut buffer: [epoll_event; EVENT_CAPACITY] = unsafe { mem::zeroed() };

        let n = unsafe {
            epoll_wait(
                self.epoll.raw(),
                buffer.as_mut_ptr(),
                EVENT_CAPACITY as i32,
                -1,
            )
        };

        events.clear();

        if n < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(false);
            }
            return Err(err);
        }

        let mut woken = false;

        for ev in &buffer[..n as usize] {
            if ev.u64 == WAKE_TOKEN as u64 {
                let mut buf = 0u64;
                unsafe {
                    libc::read(self.wake.raw(), &mut buf as *mut _ as *mut _, 8);
                }
                woken = true;
                continue;
            }

            let readable = ev.events & ((EPOLLIN | EPOLLERR | EPOLLHUP) as u32) != 0;
            let writable = ev.events & (EPOLLOUT as u32) != 0;

            events.push(Event {
                token: ev.u64 as usize,
                readable,
                writable,
            });
        }

        Ok(woken)
    }
}
