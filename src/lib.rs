//! # Evserial
//!
//! **Evserial** provides asynchronous, event-driven access to a serial (UART-class)
//! device: open, configure, read, write, and close, with inbound data pushed to
//! registered listeners and outbound writes completed through per-call callbacks.
//!
//! Each open port owns exactly one background worker thread that blocks on the
//! platform's native I/O multiplexer:
//!
//! - **Linux** — `epoll`, woken through an `eventfd` notification channel
//! - **macOS** — `kqueue`, woken through a self-pipe
//! - **Windows** — an I/O completion port driving overlapped reads and writes
//!
//! All three backends honor the same contract: inbound bytes are delivered in
//! arrival order as [`SerialEvent::Data`] events, every queued write completes
//! exactly once with a [`WriteStatus`], and `close` joins the worker before any
//! handle is released.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use evserial::{EventKind, SerialEvent, SerialPort, SerialPortOptions};
//!
//! let port = SerialPort::new("/dev/ttyUSB0", SerialPortOptions::default());
//!
//! port.on(EventKind::Data, |event| {
//!     let SerialEvent::Data(bytes) = event;
//!     println!("received {} bytes", bytes.len());
//! });
//!
//! port.open()?;
//! port.write(b"ping".to_vec())?;
//! port.close();
//! # Ok::<(), evserial::Error>(())
//! ```
//!
//! ## Modules
//!
//! - [`event`] — The listener registry shared by every backend

mod error;
mod options;
mod port;
mod queue;
mod sys;
mod tty;

#[cfg(unix)]
mod poller;

pub mod event;

pub use error::Error;
pub use event::{EventKind, ListenerHandle, SerialEvent};
pub use options::{Parity, SerialPortOptions, SUPPORTED_BAUD_RATES};
pub use port::SerialPort;
pub use queue::WriteStatus;
