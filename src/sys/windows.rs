use windows_sys::Win32::Foundation::{CloseHandle, HANDLE};

/// Owning wrapper around a Win32 handle.
///
/// The handle is closed when the guard drops; the raw value never escapes
/// the crate.
pub(crate) struct Handle(HANDLE);

unsafe impl Send for Handle {}

impl Handle {
    pub(crate) fn new(handle: HANDLE) -> Self {
        Self(handle)
    }

    pub(crate) fn raw(&self) -> HANDLE {
        self.0
    }
}

impl Drop for Handle {
    fn drop(&mut self) {
        unsafe {
            CloseHandle(self.0);
        }
    }
}
