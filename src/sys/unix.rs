use std::io;
use std::os::fd::RawFd;

/// Owning wrapper around a raw file descriptor.
///
/// The descriptor is closed when the guard drops, so every early-return
/// path out of `open` releases whatever it acquired. The raw value never
/// escapes the crate.
pub(crate) struct Fd(RawFd);

impl Fd {
    pub(crate) fn new(fd: RawFd) -> Self {
        Self(fd)
    }

    pub(crate) fn raw(&self) -> RawFd {
        self.0
    }
}

impl Drop for Fd {
    fn drop(&mut self) {
        sys_close(self.0);
    }
}

pub(crate) fn sys_read(fd: RawFd, buf: &mut [u8]) -> isize {
    unsafe { libc::read(fd, buf.as_mut_ptr() as *mut _, buf.len()) }
}

pub(crate) fn sys_write(fd: RawFd, buf: &[u8]) -> isize {
    unsafe { libc::write(fd, buf.as_ptr() as *const _, buf.len()) }
}

pub(crate) fn sys_close(fd: RawFd) {
    unsafe { libc::close(fd) };
}

/// Classifies an OS error as a retry signal rather than a terminal failure.
///
/// Covers `EAGAIN`/`EWOULDBLOCK` and `EINTR`; everything else is terminal.
pub(crate) fn is_transient(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    )
}
