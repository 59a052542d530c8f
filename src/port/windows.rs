//! Windows serial port engine.
//!
//! One background worker thread blocks on an I/O completion port for the
//! results of overlapped operations on the device. The worker keeps one
//! overlapped read posted at all times; each completed read publishes a
//! `Data` event and reposts. Writes are issued as overlapped operations
//! directly from the caller thread, each carrying its completion callback
//! in a heap-allocated operation record that the worker reclaims when the
//! completion packet arrives.
//!
//! Shutdown posts a packet under a reserved completion key. Cancellation
//! is asynchronous: the packets of cancelled operations carry no ordering
//! guarantee against the wake packet, so the worker counts operations in
//! flight and keeps dequeuing after the wake packet until every record
//! has been reclaimed. Cancelled writes complete with
//! [`WriteStatus::Failure`]; no completion is ever dropped.

use crate::error::Error;
use crate::event::{EventEmitter, EventKind, ListenerHandle, SerialEvent};
use crate::options::SerialPortOptions;
use crate::queue::{Completion, WriteStatus};
use crate::sys::platform::Handle;
use crate::tty;

use std::io;
use std::mem;
use std::path::PathBuf;
use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, mpsc};
use std::thread;

use windows_sys::Win32::Foundation::{ERROR_IO_PENDING, GetLastError, HANDLE};
use windows_sys::Win32::Storage::FileSystem::{ReadFile, WriteFile};
use windows_sys::Win32::System::IO::{
    CancelIoEx, CreateIoCompletionPort, GetQueuedCompletionStatus, OVERLAPPED,
    PostQueuedCompletionStatus,
};

/// Completion key for packets originating from the device handle.
const DEVICE_KEY: usize = 0;

/// Reserved completion key for the shutdown packet.
const WAKE_KEY: usize = 1;

const READ_BUFFER_SIZE: usize = 1024;

enum OperationKind {
    Read,
    Write,
}

/// One in-flight overlapped operation.
///
/// The `OVERLAPPED` header must stay the first field: the pointer handed
/// to the OS is the pointer to the whole record, recovered by casting the
/// `lpOverlapped` the completion packet returns.
#[repr(C)]
struct Operation {
    overlapped: OVERLAPPED,
    kind: OperationKind,
    buffer: Vec<u8>,
    completion: Option<Completion>,
}

impl Operation {
    fn read() -> Box<Self> {
        Box::new(Self {
            overlapped: unsafe { mem::zeroed() },
            kind: OperationKind::Read,
            buffer: vec![0; READ_BUFFER_SIZE],
            completion: None,
        })
    }

    fn write(data: Vec<u8>, completion: Completion) -> Box<Self> {
        Box::new(Self {
            overlapped: unsafe { mem::zeroed() },
            kind: OperationKind::Write,
            buffer: data,
            completion: Some(completion),
        })
    }
}

/// Posts an overlapped read of `op`'s buffer.
///
/// Ownership of the record passes to the OS until the completion packet
/// arrives. `inflight` is incremented before the operation is issued and
/// decremented again on immediate non-pending failure, in which case the
/// record is reclaimed and `false` is returned.
fn issue_read(device: HANDLE, mut op: Box<Operation>, inflight: &AtomicUsize) -> bool {
    op.overlapped = unsafe { mem::zeroed() };
    let raw = Box::into_raw(op);

    // Counted before issuing: a synchronously completed operation still
    // posts a packet, and the worker may reclaim it (and decrement)
    // before this call returns.
    inflight.fetch_add(1, Ordering::AcqRel);

    let ok = unsafe {
        ReadFile(
            device,
            (*raw).buffer.as_mut_ptr(),
            (*raw).buffer.len() as u32,
            ptr::null_mut(),
            raw as *mut OVERLAPPED,
        )
    };

    if ok == 0 && unsafe { GetLastError() } != ERROR_IO_PENDING {
        inflight.fetch_sub(1, Ordering::AcqRel);
        drop(unsafe { Box::from_raw(raw) });
        return false;
    }

    true
}

/// An asynchronous, event-driven serial port.
///
/// Inbound data is pushed to listeners registered with [`on`](Self::on);
/// outbound writes complete through per-call callbacks. All methods are
/// callable from any thread.
pub struct SerialPort {
    path: PathBuf,
    options: SerialPortOptions,
    emitter: Arc<EventEmitter>,
    opened: AtomicBool,
    state: Mutex<Option<Active>>,
}

/// Resources owned while the port is open.
struct Active {
    device: Handle,
    port: Handle,
    inflight: Arc<AtomicUsize>,
    running: Arc<AtomicBool>,
    worker: thread::JoinHandle<()>,
}

impl SerialPort {
    /// Creates a port for `path` with the given line settings.
    ///
    /// No OS resource is touched until [`open`](Self::open).
    pub fn new(path: impl Into<PathBuf>, options: SerialPortOptions) -> Self {
        Self {
            path: path.into(),
            options,
            emitter: Arc::new(EventEmitter::new()),
            opened: AtomicBool::new(false),
            state: Mutex::new(None),
        }
    }

    /// Opens and configures the device, then starts the engine worker.
    ///
    /// Acquisition order: device handle, line configuration, timeouts,
    /// completion port, worker thread. Any failing step releases
    /// everything acquired before it and leaves the port closed and
    /// reusable. Opening an already-open port is a no-op.
    pub fn open(&self) -> Result<(), Error> {
        let mut state = self.state.lock().unwrap();

        if state.is_some() {
            return Ok(());
        }

        let device = tty::platform::open_port(&self.path)?;
        tty::platform::configure(&device, &self.options)?;
        tty::platform::set_timeouts(&device, &self.options)?;

        let port =
            unsafe { CreateIoCompletionPort(device.raw(), ptr::null_mut(), DEVICE_KEY, 0) };
        if port.is_null() {
            return Err(Error::Open(io::Error::last_os_error()));
        }
        let port = Handle::new(port);

        let inflight = Arc::new(AtomicUsize::new(0));
        let running = Arc::new(AtomicBool::new(true));

        let worker = Worker {
            device: device.raw(),
            port: port.raw(),
            emitter: self.emitter.clone(),
            inflight: inflight.clone(),
            running: running.clone(),
        };

        let worker = thread::Builder::new()
            .name("evserial-worker".into())
            .spawn(move || worker.run())
            .map_err(Error::Open)?;

        *state = Some(Active {
            device,
            port,
            inflight,
            running,
            worker,
        });
        self.opened.store(true, Ordering::Release);

        Ok(())
    }

    /// Whether the port is currently open.
    pub fn is_open(&self) -> bool {
        self.opened.load(Ordering::Acquire)
    }

    /// Shuts the engine down and releases the device.
    ///
    /// Cancels in-flight I/O, posts the wake packet, joins the worker,
    /// then releases the device and completion-port handles. The worker
    /// stays in its loop after the wake packet until every in-flight
    /// operation's packet has been reclaimed, so cancelled writes complete
    /// with [`WriteStatus::Failure`] before the worker exits. Idempotent:
    /// closing a closed port is a no-op.
    pub fn close(&self) {
        let active = self.state.lock().unwrap().take();

        let Some(active) = active else {
            return;
        };

        self.opened.store(false, Ordering::Release);

        unsafe {
            CancelIoEx(active.device.raw(), ptr::null());
            PostQueuedCompletionStatus(active.port.raw(), 0, WAKE_KEY, ptr::null());
        }

        let _ = active.worker.join();
        debug_assert!(!active.running.load(Ordering::Acquire));
        debug_assert_eq!(active.inflight.load(Ordering::Acquire), 0);
    }

    /// Issues an overlapped write of `data`, completing through
    /// `completion` when the OS reports the transfer finished.
    ///
    /// If the port is not open, `completion` is invoked synchronously with
    /// [`WriteStatus::NotOpen`] and no operation is issued. Completion
    /// order for concurrently issued writes follows OS completion delivery
    /// order; the engine does not reorder.
    pub fn write_with(
        &self,
        data: impl Into<Vec<u8>>,
        completion: impl FnOnce(WriteStatus) + Send + 'static,
    ) {
        let data = data.into();
        let state = self.state.lock().unwrap();

        let Some(active) = state.as_ref() else {
            drop(state);
            completion(WriteStatus::NotOpen);
            return;
        };

        let op = Operation::write(data, Box::new(completion));
        let raw = Box::into_raw(op);

        active.inflight.fetch_add(1, Ordering::AcqRel);

        let ok = unsafe {
            WriteFile(
                active.device.raw(),
                (*raw).buffer.as_ptr(),
                (*raw).buffer.len() as u32,
                ptr::null_mut(),
                raw as *mut OVERLAPPED,
            )
        };

        if ok == 0 && unsafe { GetLastError() } != ERROR_IO_PENDING {
            active.inflight.fetch_sub(1, Ordering::AcqRel);
            let mut op = unsafe { Box::from_raw(raw) };
            drop(state);

            if let Some(completion) = op.completion.take() {
                completion(WriteStatus::Failure);
            }
        }
    }

    /// Writes `data`, blocking until its completion is delivered.
    pub fn write(&self, data: impl Into<Vec<u8>>) -> Result<(), Error> {
        let (sender, receiver) = mpsc::channel();

        self.write_with(data, move |status| {
            let _ = sender.send(status);
        });

        match receiver.recv() {
            Ok(WriteStatus::Success) => Ok(()),
            Ok(WriteStatus::NotOpen) => Err(Error::NotOpen),
            Ok(WriteStatus::Failure) | Err(_) => {
                Err(Error::Write(io::Error::other("write failed")))
            }
        }
    }

    /// Registers `listener` for `kind` and returns its removal handle.
    ///
    /// Listeners run synchronously on the engine worker thread, in
    /// registration order.
    pub fn on(
        &self,
        kind: EventKind,
        listener: impl Fn(&SerialEvent) + Send + Sync + 'static,
    ) -> ListenerHandle {
        self.emitter.on(kind, listener)
    }

    /// Removes a listener previously registered with [`on`](Self::on).
    pub fn remove_listener(&self, kind: EventKind, handle: ListenerHandle) {
        self.emitter.remove_listener(kind, handle);
    }
}

impl Drop for SerialPort {
    fn drop(&mut self) {
        self.close();
    }
}

/// State moved onto the engine worker thread.
///
/// Raw handle values only; the owning guards stay in `Active`, and `close`
/// joins this worker before they drop.
struct Worker {
    device: HANDLE,
    port: HANDLE,
    emitter: Arc<EventEmitter>,
    inflight: Arc<AtomicUsize>,
    running: Arc<AtomicBool>,
}

unsafe impl Send for Worker {}

impl Worker {
    fn run(self) {
        // One read is in flight at all times until it fails or is
        // cancelled at shutdown.
        let _ = issue_read(self.device, Operation::read(), &self.inflight);

        let mut draining = false;

        loop {
            // Cancellation packets carry no ordering guarantee against
            // the wake packet, so the loop keeps dequeuing after the wake
            // until every issued operation has been reclaimed. `close`
            // holds the state lock while taking `Active` out, so no new
            // operation can be issued once the wake packet is posted.
            if draining && self.inflight.load(Ordering::Acquire) == 0 {
                break;
            }

            let mut bytes: u32 = 0;
            let mut key: usize = 0;
            let mut overlapped: *mut OVERLAPPED = ptr::null_mut();

            let ok = unsafe {
                GetQueuedCompletionStatus(self.port, &mut bytes, &mut key, &mut overlapped, u32::MAX)
            };

            if key == WAKE_KEY {
                draining = true;

                // A read reposted between `close`'s cancellation and this
                // packet would otherwise stay pending with nothing left to
                // complete it. Nothing new can be issued once `draining`
                // is set, so this cancel covers every remaining operation.
                unsafe {
                    CancelIoEx(self.device, ptr::null());
                }

                continue;
            }

            if overlapped.is_null() {
                // No packet was dequeued: a port-level failure, since the
                // wait is infinite. Nothing can be recovered here.
                if ok == 0 {
                    break;
                }
                continue;
            }

            let mut op = unsafe { Box::from_raw(overlapped as *mut Operation) };
            self.inflight.fetch_sub(1, Ordering::AcqRel);

            match op.kind {
                OperationKind::Read => {
                    if ok != 0 && !draining {
                        if bytes > 0 {
                            self.emitter.emit(
                                EventKind::Data,
                                &SerialEvent::Data(op.buffer[..bytes as usize].to_vec()),
                            );
                        }

                        issue_read(self.device, op, &self.inflight);
                    }
                    // A failed or cancelled read is not reposted; while
                    // the port stays open, the worker keeps serving write
                    // completions until the wake packet arrives.
                }
                OperationKind::Write => {
                    let status = if ok != 0 && bytes as usize == op.buffer.len() {
                        WriteStatus::Success
                    } else {
                        WriteStatus::Failure
                    };

                    if let Some(completion) = op.completion.take() {
                        completion(status);
                    }
                }
            }
        }

        self.running.store(false, Ordering::Release);
    }
}
