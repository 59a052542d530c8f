use crate::error::Error;
use crate::options::{Parity, SUPPORTED_BAUD_RATES, SerialPortOptions};
use crate::sys::platform::Handle;

use std::io;
use std::mem;
use std::os::windows::ffi::OsStrExt;
use std::path::Path;
use std::ptr;

use windows_sys::Win32::Devices::Communication::{
    COMMTIMEOUTS, EVENPARITY, GetCommState, NOPARITY, ODDPARITY, ONESTOPBIT, SetCommState,
    SetCommTimeouts, TWOSTOPBITS, DCB,
};
use windows_sys::Win32::Foundation::{GENERIC_READ, GENERIC_WRITE, INVALID_HANDLE_VALUE};
use windows_sys::Win32::Storage::FileSystem::{
    CreateFileW, FILE_FLAG_OVERLAPPED, OPEN_EXISTING,
};

/// Opens the device for overlapped I/O in exclusive-session mode
/// (share mode 0, as the original engine requires).
pub(crate) fn open_port(path: &Path) -> Result<Handle, Error> {
    let wide: Vec<u16> = path
        .as_os_str()
        .encode_wide()
        .chain(std::iter::once(0))
        .collect();

    let handle = unsafe {
        CreateFileW(
            wide.as_ptr(),
            GENERIC_READ | GENERIC_WRITE,
            0,
            ptr::null(),
            OPEN_EXISTING,
            FILE_FLAG_OVERLAPPED,
            ptr::null_mut(),
        )
    };

    if handle == INVALID_HANDLE_VALUE {
        return Err(Error::Open(io::Error::last_os_error()));
    }

    Ok(Handle::new(handle))
}

/// Applies the line settings through the device control block.
///
/// The baud rate and byte size are validated against the same fixed sets
/// as the POSIX backend before the OS sees them, so an unsupported value
/// fails identically on every platform.
pub(crate) fn configure(handle: &Handle, options: &SerialPortOptions) -> Result<(), Error> {
    if !SUPPORTED_BAUD_RATES.contains(&options.baud_rate) {
        return Err(Error::Convert {
            what: "baud rate",
            value: options.baud_rate,
        });
    }

    if !(5..=8).contains(&options.byte_size) {
        return Err(Error::Convert {
            what: "byte size",
            value: options.byte_size as u32,
        });
    }

    let stop_bits = match options.stop_bits {
        1 => ONESTOPBIT,
        2 => TWOSTOPBITS,
        _ => {
            return Err(Error::Config(io::Error::new(
                io::ErrorKind::InvalidInput,
                "stop bits must be 1 or 2",
            )));
        }
    };

    let parity = match options.parity {
        Parity::None => NOPARITY,
        Parity::Odd => ODDPARITY,
        Parity::Even => EVENPARITY,
    };

    let mut dcb: DCB = unsafe { mem::zeroed() };
    dcb.DCBlength = mem::size_of::<DCB>() as u32;

    if unsafe { GetCommState(handle.raw(), &mut dcb) } == 0 {
        return Err(Error::Config(io::Error::last_os_error()));
    }

    dcb.BaudRate = options.baud_rate;
    dcb.ByteSize = options.byte_size;
    dcb.StopBits = stop_bits;
    dcb.Parity = parity;

    if unsafe { SetCommState(handle.raw(), &dcb) } == 0 {
        return Err(Error::Config(io::Error::last_os_error()));
    }

    Ok(())
}

/// Applies the advisory read/write timeouts.
pub(crate) fn set_timeouts(handle: &Handle, options: &SerialPortOptions) -> Result<(), Error> {
    let timeouts = COMMTIMEOUTS {
        ReadIntervalTimeout: 50,
        ReadTotalTimeoutMultiplier: 10,
        ReadTotalTimeoutConstant: options.read_timeout,
        WriteTotalTimeoutMultiplier: 10,
        WriteTotalTimeoutConstant: options.write_timeout,
    };

    if unsafe { SetCommTimeouts(handle.raw(), &timeouts) } == 0 {
        return Err(Error::Config(io::Error::last_os_error()));
    }

    Ok(())
}
