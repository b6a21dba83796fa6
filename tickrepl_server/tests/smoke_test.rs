// Integration smoke test for the tickrepl server.
//
// Starts a server on localhost with a `CooperativeScheduler`, drives the
// scheduler from the test thread the way a host would, and talks to it from
// plain TCP sockets: hand-written bencode requests out, decoded frames back.
// No client library involved, so this checks the wire format end to end.

use std::io::{BufReader, Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::rc::Rc;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tickrepl_lisp::Runtime;
use tickrepl_protocol::{Response, read_response, status};
use tickrepl_server::{CooperativeScheduler, ServerConfig, ServerLifecycle};

/// One server per process: tests in this binary take turns.
static SERIAL: Mutex<()> = Mutex::new(());

struct Started {
    scheduler: Rc<CooperativeScheduler>,
    lifecycle: ServerLifecycle,
    addr: SocketAddr,
    _serial: MutexGuard<'static, ()>,
}

fn start() -> Started {
    let serial = SERIAL.lock().unwrap_or_else(PoisonError::into_inner);
    let scheduler = Rc::new(CooperativeScheduler::new());
    let mut lifecycle = ServerLifecycle::new(scheduler.clone());
    let config = ServerConfig {
        port_file_path: None,
        tick_interval_seconds: 0.01,
        ..ServerConfig::default()
    };
    let addr = lifecycle.start(&config, Runtime::new()).unwrap().local_addr();
    Started {
        scheduler,
        lifecycle,
        addr,
        _serial: serial,
    }
}

/// Send raw request bytes and read frames until `done`.
fn raw_exchange(addr: SocketAddr, request: &'static [u8]) -> JoinHandle<Vec<Response>> {
    thread::spawn(move || {
        let mut stream = TcpStream::connect(addr).unwrap();
        stream.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        stream.write_all(request).unwrap();
        let mut reader = BufReader::new(stream);
        let mut frames = Vec::new();
        loop {
            let frame = read_response(&mut reader).unwrap();
            let done = frame.is_done();
            frames.push(frame);
            if done {
                return frames;
            }
        }
    })
}

/// Run the host loop until `handle` finishes.
fn drive<T>(scheduler: &CooperativeScheduler, handle: JoinHandle<T>) -> T {
    let start = Instant::now();
    while !handle.is_finished() {
        assert!(start.elapsed() < Duration::from_secs(5), "client timed out");
        scheduler.run_due(Instant::now());
        thread::sleep(Duration::from_millis(5));
    }
    handle.join().unwrap()
}

#[test]
fn eval_over_raw_bencode() {
    let Started {
        scheduler,
        mut lifecycle,
        addr,
        _serial,
    } = start();

    let frames = drive(
        &scheduler,
        raw_exchange(addr, b"d4:code7:(+ 1 2)2:idi7e2:op4:evale"),
    );
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].get_str("value"), Some("3"));
    // Integer ids are echoed as integers.
    assert_eq!(frames[0].id().and_then(|id| id.as_int()), Some(7));
    assert_eq!(frames[0].status(), vec![status::DONE]);

    lifecycle.shutdown();
    lifecycle.shutdown();
    assert!(scheduler.is_empty());
}

#[test]
fn malformed_frame_closes_only_that_connection() {
    let Started {
        scheduler,
        mut lifecycle,
        addr,
        _serial,
    } = start();

    // A list is valid bencode but not a request.
    let mut bad = TcpStream::connect(addr).unwrap();
    bad.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
    bad.write_all(b"li1ee").unwrap();
    let mut buf = [0u8; 16];
    assert_eq!(bad.read(&mut buf).unwrap_or(0), 0, "server should hang up");

    let frames = drive(
        &scheduler,
        raw_exchange(addr, b"d4:code5::fine2:id1:a2:op4:evale"),
    );
    assert_eq!(frames[0].get_str("value"), Some(":fine"));

    lifecycle.shutdown();
}
