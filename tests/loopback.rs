#![cfg(target_os = "linux")]

use evserial::{Error, EventKind, SerialEvent, SerialPort, SerialPortOptions, WriteStatus};
use std::ffi::CStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Allocates a pseudo-terminal pair and returns the master descriptor
/// (non-blocking) plus the slave device path.
fn open_pty_pair() -> (libc::c_int, String) {
    unsafe {
        let master = libc::posix_openpt(libc::O_RDWR | libc::O_NOCTTY);
        assert!(master >= 0, "posix_openpt failed");
        assert_eq!(libc::grantpt(master), 0, "grantpt failed");
        assert_eq!(libc::unlockpt(master), 0, "unlockpt failed");

        let mut name = [0 as libc::c_char; 128];
        assert_eq!(
            libc::ptsname_r(master, name.as_mut_ptr(), name.len()),
            0,
            "ptsname_r failed"
        );

        let flags = libc::fcntl(master, libc::F_GETFL);
        libc::fcntl(master, libc::F_SETFL, flags | libc::O_NONBLOCK);

        let path = CStr::from_ptr(name.as_ptr())
            .to_str()
            .expect("pty path is not valid UTF-8")
            .to_string();

        (master, path)
    }
}

fn master_write(master: libc::c_int, data: &[u8]) {
    let n = unsafe { libc::write(master, data.as_ptr() as *const _, data.len()) };
    assert_eq!(n, data.len() as isize, "Failed to write to pty master");
}

/// Polls the non-blocking master side until `expected` has arrived or
/// the timeout expires.
fn master_read_exact(master: libc::c_int, expected: usize) -> Vec<u8> {
    let deadline = Instant::now() + Duration::from_secs(2);
    let mut collected = Vec::new();
    let mut chunk = [0u8; 256];

    while collected.len() < expected {
        let n = unsafe { libc::read(master, chunk.as_mut_ptr() as *mut _, chunk.len()) };

        if n > 0 {
            collected.extend_from_slice(&chunk[..n as usize]);
        } else {
            assert!(
                Instant::now() < deadline,
                "Timed out waiting for data on the pty master"
            );
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    collected
}

fn wait_until(condition: impl Fn() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(2);

    while !condition() {
        assert!(Instant::now() < deadline, "Timed out waiting for condition");
        std::thread::sleep(Duration::from_millis(5));
    }
}

/// CPU time consumed by the whole process so far, user plus system.
fn process_cpu_time() -> Duration {
    let mut usage: libc::rusage = unsafe { std::mem::zeroed() };
    unsafe {
        libc::getrusage(libc::RUSAGE_SELF, &mut usage);
    }

    let part = |t: libc::timeval| Duration::new(t.tv_sec as u64, t.tv_usec as u32 * 1000);
    part(usage.ru_utime) + part(usage.ru_stime)
}

#[test]
fn inbound_bytes_surface_as_data_events() {
    let (master, slave_path) = open_pty_pair();

    let port = SerialPort::new(slave_path, SerialPortOptions::default());
    let received = Arc::new(Mutex::new(Vec::new()));

    let sink = received.clone();
    port.on(EventKind::Data, move |event| {
        let SerialEvent::Data(bytes) = event;
        sink.lock().unwrap().extend_from_slice(bytes);
    });

    port.open().expect("Failed to open pty slave");
    assert!(port.is_open());

    master_write(master, b"ping");
    wait_until(|| received.lock().unwrap().len() >= 4);
    assert_eq!(*received.lock().unwrap(), b"ping");

    port.close();
    unsafe {
        libc::close(master);
    }
}

#[test]
fn event_concatenation_preserves_arrival_order() {
    let (master, slave_path) = open_pty_pair();

    let port = SerialPort::new(slave_path, SerialPortOptions::default());
    let received = Arc::new(Mutex::new(Vec::new()));

    let sink = received.clone();
    port.on(EventKind::Data, move |event| {
        let SerialEvent::Data(bytes) = event;
        sink.lock().unwrap().extend_from_slice(bytes);
    });

    port.open().expect("Failed to open pty slave");

    let mut expected = Vec::new();
    for chunk in [&b"alpha"[..], b"beta", b"gamma", b"delta"] {
        master_write(master, chunk);
        expected.extend_from_slice(chunk);
    }

    // However the stream is sliced into events, the concatenation must
    // equal the bytes in arrival order.
    wait_until(|| received.lock().unwrap().len() >= expected.len());
    assert_eq!(*received.lock().unwrap(), expected);

    port.close();
    unsafe {
        libc::close(master);
    }
}

#[test]
fn port_write_reaches_peer() {
    let (master, slave_path) = open_pty_pair();

    let port = SerialPort::new(slave_path, SerialPortOptions::default());
    port.open().expect("Failed to open pty slave");

    port.write(b"pong".to_vec()).expect("Failed to write");

    assert_eq!(master_read_exact(master, 4), b"pong");

    port.close();
    unsafe {
        libc::close(master);
    }
}

#[test]
fn async_write_completes_exactly_once() {
    let (master, slave_path) = open_pty_pair();

    let port = SerialPort::new(slave_path, SerialPortOptions::default());
    port.open().expect("Failed to open pty slave");

    let completions = Arc::new(AtomicUsize::new(0));
    let counter = completions.clone();
    port.write_with(b"hello".to_vec(), move |status| {
        assert_eq!(status, WriteStatus::Success);
        counter.fetch_add(1, Ordering::SeqCst);
    });

    assert_eq!(master_read_exact(master, 5), b"hello");
    wait_until(|| completions.load(Ordering::SeqCst) == 1);

    // Give a misbehaving engine the chance to double-complete.
    std::thread::sleep(Duration::from_millis(20));
    assert_eq!(completions.load(Ordering::SeqCst), 1);

    port.close();
    unsafe {
        libc::close(master);
    }
}

#[test]
fn writes_complete_in_fifo_order() {
    let (master, slave_path) = open_pty_pair();

    let port = SerialPort::new(slave_path, SerialPortOptions::default());
    port.open().expect("Failed to open pty slave");

    let order = Arc::new(Mutex::new(Vec::new()));
    for id in 0..4u32 {
        let order = order.clone();
        port.write_with(vec![id as u8; 8], move |status| {
            assert_eq!(status, WriteStatus::Success);
            order.lock().unwrap().push(id);
        });
    }

    let _ = master_read_exact(master, 32);
    wait_until(|| order.lock().unwrap().len() == 4);
    assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3]);

    port.close();
    unsafe {
        libc::close(master);
    }
}

#[test]
fn peer_hangup_stops_engine_without_spinning() {
    let (master, slave_path) = open_pty_pair();

    let port = SerialPort::new(slave_path, SerialPortOptions::default());
    port.open().expect("Failed to open pty slave");

    // Closing the master hangs up the slave: reads fail terminally and
    // the readiness multiplexer reports the condition forever.
    unsafe {
        libc::close(master);
    }
    std::thread::sleep(Duration::from_millis(50));

    let before = process_cpu_time();
    std::thread::sleep(Duration::from_millis(400));
    let spent = process_cpu_time() - before;

    assert!(
        spent < Duration::from_millis(200),
        "Engine burned {spent:?} of CPU over an idle window after peer hangup"
    );

    // A write submitted after the hangup still completes exactly once,
    // at the latest when the port closes.
    let completions = Arc::new(AtomicUsize::new(0));
    let counter = completions.clone();
    port.write_with(b"late".to_vec(), move |status| {
        assert_eq!(status, WriteStatus::Failure);
        counter.fetch_add(1, Ordering::SeqCst);
    });

    port.close();
    assert!(!port.is_open());
    assert_eq!(completions.load(Ordering::SeqCst), 1);
}

#[test]
fn unsupported_baud_rate_fails_open() {
    let (master, slave_path) = open_pty_pair();

    let options = SerialPortOptions {
        baud_rate: 12345,
        ..SerialPortOptions::default()
    };

    let port = SerialPort::new(slave_path, options);
    assert!(matches!(
        port.open(),
        Err(Error::Convert {
            what: "baud rate",
            value: 12345
        })
    ));
    assert!(!port.is_open());

    unsafe {
        libc::close(master);
    }
}

#[test]
fn open_close_cycle_releases_descriptors() {
    let (master, slave_path) = open_pty_pair();

    let descriptors = || {
        std::fs::read_dir("/proc/self/fd")
            .expect("Failed to list /proc/self/fd")
            .count()
    };

    let before = descriptors();

    let port = SerialPort::new(slave_path, SerialPortOptions::default());
    port.open().expect("Failed to open pty slave");
    assert!(port.is_open());

    port.close();
    assert!(!port.is_open());
    port.close();
    assert!(!port.is_open());

    assert_eq!(
        descriptors(),
        before,
        "close must release the device, multiplexer, and wake channel"
    );

    // The port stays reusable after a full cycle.
    port.open().expect("Failed to reopen pty slave");
    assert!(port.is_open());
    port.close();

    unsafe {
        libc::close(master);
    }
}
