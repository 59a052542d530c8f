//! macOS `kqueue`-based poller implementation.
//!
//! Functionally equivalent to the Linux `epoll` poller and exposes the
//! same interface to the engine worker.
//!
//! The wake channel is a self-pipe: the read end is registered under
//! [`WAKE_TOKEN`], and writing a byte to the write end makes a blocked
//! `kevent` call return even though no device I/O occurred. Write
//! interest is expressed as an `EVFILT_WRITE` filter added and deleted on
//! demand. This backend is selected automatically on macOS targets.

use super::{Event, Interest, WAKE_TOKEN};
use crate::sys::platform::Fd;

use libc::{EV_ADD, EV_DELETE, EV_ENABLE, EVFILT_READ, EVFILT_WRITE, kevent};
use std::io;
use std::mem;
use std::os::fd::RawFd;
use std::ptr;

const EVENT_CAPACITY: usize = 64;

fn set_nonblocking_cloexec(fd: RawFd) -> io::Result<()> {
    unsafe {
        let flags = libc::fcntl(fd, libc::F_GETFL);
        if flags < 0 || libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) < 0 {
            return Err(io::Error::last_os_error());
        }
        if libc::fcntl(fd, libc::F_SETFD, libc::FD_CLOEXEC) < 0 {
            return Err(io::Error::last_os_error());
        }
    }

    Ok(())
}

fn change(kq: RawFd, ident: RawFd, filter: i16, flags: u16, token: usize) -> io::Result<()> {
    let ev = kevent {
        ident: ident as usize,
        filter,
        flags,
        fflags: 0,
        data: 0,
        udata: token as *mut _,
    };

    let rc = unsafe { kevent(kq, &ev, 1, ptr::null_mut(), 0, ptr::null()) };
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }

    Ok(())
}

/// macOS `kqueue` poller.
///
/// Owns the kqueue descriptor and both ends of the wake pipe; all three
/// close when the poller drops.
pub(crate) struct KqueuePoller {
    kq: Fd,
    wake_rx: Fd,
    wake_tx: Fd,
}

impl KqueuePoller {
    /// Creates the kqueue and registers the read end of a non-blocking
    /// pipe as the persistent wake source.
    pub(crate) fn new() -> io::Result<Self> {
        let kq = unsafe { libc::kqueue() };
        if kq < 0 {
            return Err(io::Error::last_os_error());
        }
        let kq = Fd::new(kq);

        let mut ends: [RawFd; 2] = [0; 2];
        if unsafe { libc::pipe(ends.as_mut_ptr()) } != 0 {
            return Err(io::Error::last_os_error());
        }
        let wake_rx = Fd::new(ends[0]);
        let wake_tx = Fd::new(ends[1]);

        set_nonblocking_cloexec(wake_rx.raw())?;
        set_nonblocking_cloexec(wake_tx.raw())?;

        change(
            kq.raw(),
            wake_rx.raw(),
            EVFILT_READ,
            EV_ADD | EV_ENABLE,
            WAKE_TOKEN,
        )?;

        Ok(Self { kq, wake_rx, wake_tx })
    }

    /// Registers a file descriptor with the poller.
    pub(crate) fn register(&self, fd: RawFd, token: usize, interest: Interest) -> io::Result<()> {
        if interest.read {
            change(self.kq.raw(), fd, EVFILT_READ, EV_ADD | EV_ENABLE, token)?;
        }
        if interest.write {
            change(self.kq.raw(), fd, EVFILT_WRITE, EV_ADD | EV_ENABLE, token)?;
        }

        Ok(())
    }

    /// Updates interest flags for an already registered descriptor.
    ///
    /// Read interest is persistent; write interest maps to adding or
    /// deleting the `EVFILT_WRITE` filter. Deleting a filter that is not
    /// present is a no-op.
    pub(crate) fn set_interest(
        &self,
        fd: RawFd,
        token: usize,
        interest: Interest,
    ) -> io::Result<()> {
        if interest.write {
            change(self.kq.raw(), fd, EVFILT_WRITE, EV_ADD | EV_ENABLE, token)?;
        } else if let Err(err) = change(self.kq.raw(), fd, EVFILT_WRITE, EV_DELETE, token) {
            if err.raw_os_error() != Some(libc::ENOENT) {
                return Err(err);
            }
        }

        Ok(())
    }

    /// Wakes the poller by writing a byte to the self-pipe.
    pub(crate) fn wake(&self) {
        let buf: u8 = 1;
        unsafe {
            libc::write(self.wake_tx.raw(), &buf as *const _ as *const _, 1);
        }
    }

    /// Polls for I/O readiness events, blocking with no timeout.
    ///
    /// Returns `true` if wake-channel activity was observed. An
    /// interrupted wait (`EINTR`) is retried transparently by returning an
    /// empty, un-woken result so the caller re-enters the wait.
    pub(crate) fn poll(&self, events: &mut Vec<Event>) -> io::Result<bool> {
        let mut buffer: [kevent; EVENT_CAPACITY] = unsafe { mem::zeroed() };

        let n = unsafe {
            kevent(
                self.kq.raw(),
                ptr::null(),
                0,
                buffer.as_mut_ptr(),
                EVENT_CAPACITY as i32,
                ptr::null(),
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
            if ev.udata as usize == WAKE_TOKEN {
                let mut drain = [0u8; 8];
                while unsafe {
                    libc::read(self.wake_rx.raw(), drain.as_mut_ptr() as *mut _, drain.len())
                } > 0
                {}
                woken = true;
                continue;
            }

            events.push(Event {
                token: ev.udata as usize,
                readable: ev.filter == EVFILT_READ,
                writable: ev.filter == EVFILT_WRITE,
            });
        }

        Ok(woken)
    }
}
