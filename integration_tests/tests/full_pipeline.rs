// End-to-end tests for the nREPL bridge.
//
// Each test starts a real server inside a `TestHost`, connects real
// `NreplClient`s over localhost TCP, and checks the whole path:
// client → connection thread → work queue → host tick → evaluator → reply.

use std::io::Write;
use std::net::TcpStream;
use std::thread;
use std::time::{Duration, Instant};

use integration_tests::{POLL_TIMEOUT, TestHost, spawn_client};
use tickrepl_protocol::{Request, Value, status, write_request};
use tickrepl_server::client::{out_of, value_of};
use tickrepl_server::{ServerConfig, ServerLifecycle, ServerStatus, StartError};

/// Wait without ticking, for states that must be observed before the host
/// runs the queue.
fn wait_until(what: &str, mut cond: impl FnMut() -> bool) {
    let start = Instant::now();
    while !cond() {
        assert!(start.elapsed() < POLL_TIMEOUT, "timed out waiting for {what}");
        thread::sleep(Duration::from_millis(5));
    }
}

// ---------------------------------------------------------------------------
// Evaluation
// ---------------------------------------------------------------------------

#[test]
fn eval_round_trip() {
    let host = TestHost::start();
    let frames = host.with_client(|client| client.eval("(+ 1 2)", None).unwrap());

    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].get_str("value"), Some("3"));
    assert_eq!(frames[0].get_str("ns"), Some("user"));
    assert!(frames[0].is_done());
    assert!(frames[0].session().is_some());
    assert_eq!(host.server().stats().processed(), 1);
}

#[test]
fn output_precedes_value() {
    let host = TestHost::start();
    let frames = host.with_client(|client| client.eval(r#"(println "hi") 5"#, None).unwrap());

    assert_eq!(frames.len(), 2);
    assert_eq!(frames[0].get_str("out"), Some("hi\n"));
    assert!(!frames[0].is_done());
    assert_eq!(frames[1].get_str("value"), Some("5"));
    assert!(frames[1].is_done());
}

#[test]
fn eval_error_is_reported_and_session_survives() {
    let host = TestHost::start();
    let (failed, after) = host.with_client(|client| {
        let failed = client.eval("(/ 1 0)", None).unwrap();
        let after = client.eval("(* 6 7)", None).unwrap();
        (failed, after)
    });

    assert!(failed[0].get_str("err").is_some_and(|e| e.ends_with('\n')));
    let last = failed.last().unwrap();
    assert_eq!(last.get_str("ex"), Some("ArithmeticException"));
    assert!(last.has_status(status::EVAL_ERROR));
    assert!(last.is_done());
    assert_eq!(value_of(&after), Some("42"));
}

#[test]
fn load_file_evaluates_file_contents() {
    let host = TestHost::start();
    let frames = host.with_client(|client| {
        let request = Request::new("load-file")
            .with("file", "(def y 2)\n(print \"loading\")\n(* y 21)")
            .with("file-name", "scratch.clj");
        client.request(request).unwrap()
    });

    assert_eq!(out_of(&frames), "loading");
    assert_eq!(value_of(&frames), Some("42"));
}

#[test]
fn missing_code_and_unknown_op_are_errors() {
    let host = TestHost::start();
    let (missing, unknown) = host.with_client(|client| {
        let missing = client.request(Request::new("eval")).unwrap();
        let unknown = client.request(Request::new("interrupt")).unwrap();
        (missing, unknown)
    });

    assert!(missing[0].has_status(status::ERROR));
    assert!(missing[0].is_done());
    assert!(unknown[0].has_status(status::UNKNOWN_OP));
    assert!(unknown[0].is_done());
}

// ---------------------------------------------------------------------------
// Sessions
// ---------------------------------------------------------------------------

#[test]
fn cloned_session_keeps_namespace_and_definitions() {
    let host = TestHost::start();
    let (sum, switched, read_back, sessionless) = host.with_client(|client| {
        let session = client.clone_session(None).unwrap().unwrap();
        let sum = client.eval("(+ 4 3)", Some(&session)).unwrap();
        let switched = client.eval("(ns scratch) (def x 41)", Some(&session)).unwrap();
        let read_back = client.eval("(inc x)", Some(&session)).unwrap();
        let sessionless = client.eval("1", None).unwrap();
        (sum, switched, read_back, sessionless)
    });

    assert_eq!(value_of(&sum), Some("7"));
    assert_eq!(switched[0].get_str("ns"), Some("scratch"));
    assert_eq!(value_of(&read_back), Some("42"));
    assert_eq!(read_back[0].get_str("ns"), Some("scratch"));
    assert_eq!(sessionless[0].get_str("ns"), Some("user"));
}

#[test]
fn sessions_are_shared_across_connections() {
    let host = TestHost::start();
    let session = host.with_client(|client| {
        let session = client.clone_session(None).unwrap().unwrap();
        client.eval("(def shared 5)", Some(&session)).unwrap();
        session
    });
    let frames = {
        let session = session.clone();
        host.with_client(move |client| client.eval("(* shared 2)", Some(&session)).unwrap())
    };

    assert_eq!(value_of(&frames), Some("10"));
    assert_eq!(frames[0].session(), Some(session.as_str()));
}

#[test]
fn ls_sessions_and_close() {
    let host = TestHost::start();
    let (session, listed, closed, after, unknown) = host.with_client(|client| {
        let session = client.clone_session(None).unwrap().unwrap();
        let listed = client.ls_sessions().unwrap();
        let closed = client.close_session(&session).unwrap();
        let after = client.ls_sessions().unwrap();
        let unknown = client.close_session("no-such-session").unwrap();
        (session, listed, closed, after, unknown)
    });

    assert!(listed.contains(&session));
    assert!(closed[0].has_status(status::SESSION_CLOSED));
    assert!(!after.contains(&session));
    assert!(unknown[0].has_status(status::UNKNOWN_SESSION));
    assert!(unknown[0].is_done());
}

#[test]
fn stale_session_id_reuses_one_stand_in_until_disconnect() {
    let host = TestHost::start();
    let stale = "00000000-0000-4000-8000-000000000000";
    let named: Vec<Option<String>> = host.with_client(move |client| {
        (0..5)
            .map(|i| {
                let frames = client.eval(&i.to_string(), Some(stale)).unwrap();
                frames[0].session().map(str::to_owned)
            })
            .collect()
    });

    assert!(named[0].as_deref().is_some_and(|s| s != stale));
    assert!(named.iter().all(|s| *s == named[0]));
    host.tick_until("stand-in retired", |h| h.server().session_count() == 0);
}

#[test]
fn describe_lists_supported_ops() {
    let host = TestHost::start();
    let reply = host.with_client(|client| client.describe().unwrap());

    let ops = reply.get("ops").and_then(Value::as_dict).unwrap();
    for op in ["clone", "close", "describe", "eval", "load-file", "ls-sessions"] {
        assert!(ops.contains_key(op.as_bytes()), "describe is missing {op}");
    }
    assert!(reply.get("versions").and_then(Value::as_dict).is_some());
    assert!(reply.is_done());
}

// ---------------------------------------------------------------------------
// Concurrency and connection loss
// ---------------------------------------------------------------------------

#[test]
fn concurrent_clients_get_their_own_replies() {
    let host = TestHost::start();
    let addr = host.addr();
    let handles: Vec<_> = (0..4i64)
        .map(|t| {
            spawn_client(addr, move |client| {
                (0..20i64)
                    .map(|i| {
                        let frames = client.eval(&format!("(+ {} {})", t * 100, i), None).unwrap();
                        (t * 100 + i, value_of(&frames).map(str::to_owned))
                    })
                    .collect::<Vec<_>>()
            })
        })
        .collect();

    host.tick_until("all clients", |_| handles.iter().all(|h| h.is_finished()));
    for handle in handles {
        for (expected, got) in handle.join().unwrap() {
            assert_eq!(got, Some(expected.to_string()));
        }
    }
    assert_eq!(host.server().stats().processed(), 80);
}

#[test]
fn abandoned_request_is_skipped_and_others_unaffected() {
    let host = TestHost::start();
    {
        let mut stream = TcpStream::connect(host.addr()).unwrap();
        let request = Request::new("eval")
            .with_id("gone")
            .with("code", "(def side-effect 1)");
        write_request(&mut stream, &request).unwrap();
        stream.flush().unwrap();
        // Hang up before the host ever ticks.
    }
    wait_until("queued request", || host.server().queued() == 1);
    // Let the connection thread notice the hangup.
    thread::sleep(Duration::from_millis(300));
    host.tick();
    assert_eq!(host.server().stats().abandoned(), 1);
    assert_eq!(host.server().stats().processed(), 0);

    let frames = host.with_client(|client| client.eval("(+ 1 2)", None).unwrap());
    assert_eq!(value_of(&frames), Some("3"));
    let unset = host.with_client(|client| client.eval("side-effect", None).unwrap());
    assert_eq!(
        unset.last().and_then(|f| f.get_str("ex")),
        Some("UnresolvedSymbol")
    );
}

// ---------------------------------------------------------------------------
// Lifecycle
// ---------------------------------------------------------------------------

#[test]
fn port_file_tracks_the_running_server() {
    let mut host = TestHost::start();
    let path = host.port_file();
    let contents = std::fs::read_to_string(&path).unwrap();
    assert_eq!(contents, host.addr().port().to_string());

    host.lifecycle.shutdown();
    assert!(!path.exists());
    assert_eq!(host.lifecycle.status(), ServerStatus::Stopped);
}

#[test]
fn second_start_reports_already_running() {
    let mut host = TestHost::start();
    let addr = host.addr();
    match host.start_again() {
        Err(StartError::AlreadyRunning { addr: running }) => assert_eq!(running, addr),
        other => panic!("expected AlreadyRunning, got {other:?}"),
    }
    // The first server still answers.
    let frames = host.with_client(|client| client.eval("(+ 1 2)", None).unwrap());
    assert_eq!(value_of(&frames), Some("3"));
}

#[test]
fn second_lifecycle_in_the_process_is_refused() {
    let mut host = TestHost::start();
    let addr = host.addr();
    let mut other = ServerLifecycle::new(host.scheduler.clone());
    let config = ServerConfig {
        port_file_path: None,
        ..host.config()
    };
    match other.start(&config, tickrepl_lisp::Runtime::new()) {
        Err(StartError::AlreadyRunning { addr: running }) => assert_eq!(running, addr),
        Err(e) => panic!("expected AlreadyRunning, got {e}"),
        Ok(_) => panic!("a second server started in the same process"),
    }
    assert_eq!(other.status(), ServerStatus::Stopped);
    let frames = host.with_client(|client| client.eval("(+ 1 2)", None).unwrap());
    assert_eq!(value_of(&frames), Some("3"));

    // Once the first is down the other lifecycle may take over.
    host.lifecycle.shutdown();
    other.start(&config, tickrepl_lisp::Runtime::new()).unwrap();
    assert!(other.is_running());
}

#[test]
fn shutdown_is_repeatable_and_allows_restart() {
    let mut host = TestHost::start();
    host.lifecycle.shutdown();
    host.lifecycle.shutdown();
    assert!(host.scheduler.is_empty());

    host.start_again().unwrap();
    let frames = host.with_client(|client| client.eval("(str \"back\")", None).unwrap());
    assert_eq!(value_of(&frames), Some("\"back\""));
}

#[test]
fn shutdown_answers_queued_requests() {
    let mut host = TestHost::start();
    let addr = host.addr();
    let client = spawn_client(addr, |client| client.eval("(+ 1 2)", None).unwrap());

    // No tick: the request waits in the queue until shutdown cancels it.
    wait_until("queued request", || host.server().queued() == 1);
    host.lifecycle.shutdown();

    let frames = client.join().unwrap();
    assert_eq!(frames.len(), 1);
    assert!(frames[0].has_status(status::SERVER_SHUTDOWN));
    assert!(frames[0].has_status(status::ERROR));
    assert!(frames[0].is_done());
    assert!(TcpStream::connect(addr).is_err());
}

#[test]
fn server_starts_from_json_config_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tickrepl.json");
    let json = serde_json::json!({
        "host": "127.0.0.1",
        "port": 0,
        "port_file_path": null,
        "tick_interval_seconds": 0.02,
    });
    std::fs::write(&path, json.to_string()).unwrap();

    let config = ServerConfig::load(&path).unwrap();
    assert_eq!(config.port_file_path, None);

    let host = TestHost::idle();
    let mut lifecycle = ServerLifecycle::new(host.scheduler.clone());
    let server = lifecycle.start(&config, tickrepl_lisp::Runtime::new()).unwrap();
    assert!(server.port_file_path().is_none());
    assert!(server.url().starts_with("nrepl://127.0.0.1:"));
}
