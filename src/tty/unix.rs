use crate::error::Error;
use crate::options::{Parity, SerialPortOptions};
use crate::sys::platform::Fd;

use std::ffi::CString;
use std::io;
use std::mem;
use std::os::fd::RawFd;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;

/// Maps a numeric baud rate to its termios constant.
///
/// Rates outside the fixed table fail with `Error::Convert`; this is the
/// hard validation step performed once at configure time.
fn baud_constant(rate: u32) -> Result<libc::speed_t, Error> {
    let speed = match rate {
        0 => libc::B0,
        50 => libc::B50,
        75 => libc::B75,
        110 => libc::B110,
        134 => libc::B134,
        150 => libc::B150,
        200 => libc::B200,
        300 => libc::B300,
        600 => libc::B600,
        1200 => libc::B1200,
        1800 => libc::B1800,
        2400 => libc::B2400,
        4800 => libc::B4800,
        9600 => libc::B9600,
        19200 => libc::B19200,
        38400 => libc::B38400,
        57600 => libc::B57600,
        115200 => libc::B115200,
        230400 => libc::B230400,
        _ => {
            return Err(Error::Convert {
                what: "baud rate",
                value: rate,
            });
        }
    };

    Ok(speed)
}

fn byte_size_flag(byte_size: u8) -> Result<libc::tcflag_t, Error> {
    let flag = match byte_size {
        5 => libc::CS5,
        6 => libc::CS6,
        7 => libc::CS7,
        8 => libc::CS8,
        _ => {
            return Err(Error::Convert {
                what: "byte size",
                value: byte_size as u32,
            });
        }
    };

    Ok(flag)
}

/// Opens the device read-write, non-blocking, without becoming its
/// controlling terminal.
pub(crate) fn open_port(path: &Path) -> Result<Fd, Error> {
    let c_path = CString::new(path.as_os_str().as_bytes())
        .map_err(|_| Error::Open(io::Error::from(io::ErrorKind::InvalidInput)))?;

    let fd: RawFd = unsafe {
        libc::open(
            c_path.as_ptr(),
            libc::O_RDWR | libc::O_NOCTTY | libc::O_NONBLOCK | libc::O_CLOEXEC,
        )
    };

    if fd < 0 {
        return Err(Error::Open(io::Error::last_os_error()));
    }

    Ok(Fd::new(fd))
}

/// Applies the line settings to an open device.
///
/// Raw mode: no line discipline processing, no software or hardware flow
/// control, receiver enabled, modem control lines ignored.
pub(crate) fn configure(fd: RawFd, options: &SerialPortOptions) -> Result<(), Error> {
    let mut tty: libc::termios = unsafe { mem::zeroed() };

    if unsafe { libc::tcgetattr(fd, &mut tty) } != 0 {
        return Err(Error::Config(io::Error::last_os_error()));
    }

    let speed = baud_constant(options.baud_rate)?;

    unsafe {
        libc::cfsetospeed(&mut tty, speed);
        libc::cfsetispeed(&mut tty, speed);
    }

    tty.c_cflag = (tty.c_cflag & !libc::CSIZE) | byte_size_flag(options.byte_size)?;
    tty.c_iflag &= !libc::IGNBRK;
    tty.c_lflag = 0;
    tty.c_oflag = 0;

    // Deliver reads as soon as a single byte is available; the engine
    // relies on the multiplexer for timing, not on VTIME.
    tty.c_cc[libc::VMIN] = 1;
    tty.c_cc[libc::VTIME] = 0;

    tty.c_iflag &= !(libc::IXON | libc::IXOFF | libc::IXANY);
    tty.c_cflag |= libc::CLOCAL | libc::CREAD;

    tty.c_cflag &= !(libc::PARENB | libc::PARODD);
    match options.parity {
        Parity::None => {}
        Parity::Odd => tty.c_cflag |= libc::PARENB | libc::PARODD,
        Parity::Even => tty.c_cflag |= libc::PARENB,
    }

    match options.stop_bits {
        1 => tty.c_cflag &= !libc::CSTOPB,
        2 => tty.c_cflag |= libc::CSTOPB,
        _ => {
            return Err(Error::Config(io::Error::new(
                io::ErrorKind::InvalidInput,
                "stop bits must be 1 or 2",
            )));
        }
    }

    tty.c_cflag &= !libc::CRTSCTS;

    if unsafe { libc::tcsetattr(fd, libc::TCSANOW, &tty) } != 0 {
        return Err(Error::Config(io::Error::last_os_error()));
    }

    Ok(())
}
