//! POSIX serial port engine.
//!
//! One background worker thread blocks on the platform poller for
//! readiness on the device descriptor and the wake channel. Device-read
//! readiness drains all currently available input and publishes each read
//! as one `Data` event; device-write readiness drains the write queue;
//! wake-channel activity is the clean shutdown path. Peer hangup (end of
//! stream, or a terminal read error) also stops the worker, after failing
//! any still-queued writes.
//!
//! `open` either fully succeeds or fully rolls back: every descriptor
//! acquired during a failed attempt lives in an owning guard and is
//! released when the attempt unwinds, so no partial-open state is ever
//! observable.

use crate::error::Error;
use crate::event::{EventEmitter, EventKind, ListenerHandle, SerialEvent};
use crate::options::SerialPortOptions;
use crate::poller::{Event, Interest, Poller};
use crate::queue::{DrainOutcome, WriteAttempt, WriteQueue, WriteStatus};
use crate::sys::platform::{Fd, is_transient, sys_read, sys_write};
use crate::tty;

use std::io;
use std::os::fd::RawFd;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, mpsc};
use std::thread;

/// Token under which the device descriptor is registered.
const SERIAL_TOKEN: usize = 0;

/// Scratch buffer size for draining inbound data.
const READ_BUFFER_SIZE: usize = 1024;

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
///
/// Field order is drop order: the poller (wake channel + multiplexer)
/// goes before the device descriptor. By the time this drops the worker
/// has always been joined, so nothing else touches the descriptors.
struct Active {
    poller: Arc<Poller>,
    fd: Fd,
    queue: Arc<WriteQueue>,
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
    /// Acquisition order: device descriptor, line configuration,
    /// multiplexer + wake channel, device registration, worker thread.
    /// Any failing step releases everything acquired before it and leaves
    /// the port closed and reusable. Opening an already-open port is a
    /// no-op.
    pub fn open(&self) -> Result<(), Error> {
        let mut state = self.state.lock().unwrap();

        if state.is_some() {
            return Ok(());
        }

        let fd = tty::platform::open_port(&self.path)?;
        tty::platform::configure(fd.raw(), &self.options)?;

        let poller = Arc::new(Poller::new().map_err(Error::Open)?);
        poller
            .register(fd.raw(), SERIAL_TOKEN, Interest::READ)
            .map_err(Error::Open)?;

        let queue = Arc::new(WriteQueue::new());
        let running = Arc::new(AtomicBool::new(true));

        let worker = Worker {
            fd: fd.raw(),
            poller: poller.clone(),
            queue: queue.clone(),
            emitter: self.emitter.clone(),
            running: running.clone(),
        };

        let worker = thread::Builder::new()
            .name("evserial-worker".into())
            .spawn(move || worker.run())
            .map_err(Error::Open)?;

        *state = Some(Active {
            poller,
            fd,
            queue,
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
    /// Signals the wake channel, joins the worker, fails any still-queued
    /// writes, then releases the wake channel, multiplexer, and device
    /// descriptor. Idempotent: closing a closed port is a no-op.
    pub fn close(&self) {
        let active = self.state.lock().unwrap().take();

        let Some(active) = active else {
            return;
        };

        self.opened.store(false, Ordering::Release);

        active.poller.wake();
        let _ = active.worker.join();
        debug_assert!(!active.running.load(Ordering::Acquire));

        // Entries still queued at shutdown complete exactly once, as
        // failures; shutdown is not selective per write.
        active.queue.fail_all(WriteStatus::Failure);
    }

    /// Queues `data` for transmission and completes through `completion`.
    ///
    /// If the port is not open, `completion` is invoked synchronously with
    /// [`WriteStatus::NotOpen`] and nothing is queued. Otherwise the entry
    /// is appended to the write queue and write readiness is armed on the
    /// multiplexer; the worker drains entries in FIFO order.
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

        active.queue.push(data, Box::new(completion));

        if active
            .poller
            .set_interest(active.fd.raw(), SERIAL_TOKEN, Interest::READ_WRITE)
            .is_err()
        {
            // Arming failed: the multiplexer registration is broken, so
            // nothing would ever drain the queue. Fail it wholesale.
            let queue = active.queue.clone();
            drop(state);
            queue.fail_all(WriteStatus::Failure);
        }
    }

    /// Writes `data`, blocking until its completion is delivered.
    ///
    /// Shares the queue with [`write_with`](Self::write_with), so ordering
    /// against concurrent asynchronous writes is preserved.
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
struct Worker {
    fd: RawFd,
    poller: Arc<Poller>,
    queue: Arc<WriteQueue>,
    emitter: Arc<EventEmitter>,
    running: Arc<AtomicBool>,
}

impl Worker {
    fn run(self) {
        let mut events: Vec<Event> = Vec::with_capacity(4);
        let mut scratch = [0u8; READ_BUFFER_SIZE];

        'poll: loop {
            let woken = match self.poller.poll(&mut events) {
                Ok(woken) => woken,
                Err(_) => break,
            };

            if woken {
                break;
            }

            for event in &events {
                if event.token != SERIAL_TOKEN {
                    continue;
                }

                if event.readable && !self.drain_input(&mut scratch) {
                    // End of stream or a terminal read error: the peer
                    // hung up. The level-triggered registration would
                    // re-fire this condition forever, so the engine stops
                    // instead of spinning on it. Entries still queued can
                    // never drain on a dead channel.
                    self.queue.fail_all(WriteStatus::Failure);
                    break 'poll;
                }

                if event.writable {
                    self.drain_output();
                }
            }
        }

        self.running.store(false, Ordering::Release);
    }

    /// Drains all currently available input.
    ///
    /// Each successful read is published as one `Data` event carrying
    /// exactly the bytes read. A would-block read ends the pass; the
    /// level-triggered registration re-fires while data remains. Returns
    /// `false` on end of stream or a terminal read error, which the
    /// worker treats as peer hangup.
    fn drain_input(&self, scratch: &mut [u8]) -> bool {
        loop {
            let n = sys_read(self.fd, scratch);

            if n > 0 {
                self.emitter.emit(
                    EventKind::Data,
                    &SerialEvent::Data(scratch[..n as usize].to_vec()),
                );
            } else if n == 0 {
                return false;
            } else {
                return is_transient(&io::Error::last_os_error());
            }
        }
    }

    /// Drains the write queue while the device accepts data.
    ///
    /// A pass that empties or fails the queue drops write interest back to
    /// read-only; a blocked pass keeps it armed for the next readiness
    /// event.
    fn drain_output(&self) {
        let outcome = self.queue.drain_with(|chunk| {
            let n = sys_write(self.fd, chunk);

            if n >= 0 {
                WriteAttempt::Wrote(n as usize)
            } else {
                let err = io::Error::last_os_error();
                if is_transient(&err) {
                    WriteAttempt::WouldBlock
                } else {
                    WriteAttempt::Fatal
                }
            }
        });

        match outcome {
            DrainOutcome::Pending => {}
            DrainOutcome::Drained | DrainOutcome::Failed => {
                let _ = self
                    .poller
                    .set_interest(self.fd, SERIAL_TOKEN, Interest::READ);

                // A writer may have pushed and armed between the drain and
                // the disarm above. Re-arm rather than strand the entry.
                if !self.queue.is_empty() {
                    let _ = self.poller.set_interest(
                        self.fd,
                        SERIAL_TOKEN,
                        Interest::READ_WRITE,
                    );
                }
            }
        }
    }
}
