// Test-only host for tickrepl integration tests.
//
// `TestHost` plays the host application: it owns a real
// `CooperativeScheduler` and `ServerLifecycle` on the test thread and runs
// the server's tick from there, exactly as an embedding host would. Clients
// are real `NreplClient`s on spawned threads, because the host thread has to
// keep ticking while they block on replies.
//
// The only test-specific code is the blocking wrappers here (tick until a
// client thread finishes, tick until a condition holds). Networking, queueing
// and evaluation all go through the production code paths.
//
// See also: `tests/full_pipeline.rs` for the scenarios.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::rc::Rc;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tempfile::TempDir;
use tickrepl_lisp::Runtime;
use tickrepl_server::{
    CooperativeScheduler, NreplClient, Server, ServerConfig, ServerLifecycle, StartError,
};

/// Default timeout for blocking waits.
pub const POLL_TIMEOUT: Duration = Duration::from_secs(5);

/// Sleep between ticks while waiting.
pub const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// A process runs at most one server, so hosts in one test binary take
/// turns.
static SERIAL: Mutex<()> = Mutex::new(());

pub struct TestHost {
    pub scheduler: Rc<CooperativeScheduler>,
    pub lifecycle: ServerLifecycle,
    /// Holds the port file; removed with the host.
    pub dir: TempDir,
    // Last, so the lifecycle has shut down before the next host may start.
    _serial: MutexGuard<'static, ()>,
}

impl TestHost {
    /// Start a server on a free localhost port with its port file in a
    /// fresh temp dir.
    pub fn start() -> Self {
        let mut host = Self::idle();
        let config = host.config();
        host.lifecycle
            .start(&config, Runtime::new())
            .expect("TestHost::start failed");
        host
    }

    /// A host with no server running yet.
    pub fn idle() -> Self {
        let serial = SERIAL.lock().unwrap_or_else(PoisonError::into_inner);
        let scheduler = Rc::new(CooperativeScheduler::new());
        Self {
            lifecycle: ServerLifecycle::new(scheduler.clone()),
            scheduler,
            dir: tempfile::tempdir().expect("tempdir failed"),
            _serial: serial,
        }
    }

    /// Config used by `start`: port 0, port file in `dir`, 10ms ticks.
    pub fn config(&self) -> ServerConfig {
        ServerConfig {
            port: 0,
            port_file_path: Some(self.port_file()),
            tick_interval_seconds: 0.01,
            ..ServerConfig::default()
        }
    }

    pub fn port_file(&self) -> PathBuf {
        self.dir.path().join(".nrepl-port")
    }

    pub fn server(&self) -> &Server {
        self.lifecycle.server().expect("no server running")
    }

    pub fn addr(&self) -> SocketAddr {
        self.server().local_addr()
    }

    pub fn start_again(&mut self) -> Result<SocketAddr, StartError> {
        let config = self.config();
        self.lifecycle
            .start(&config, Runtime::new())
            .map(Server::local_addr)
    }

    /// Run the server's tick once.
    pub fn tick(&self) -> usize {
        self.scheduler.run_all()
    }

    /// Tick until `cond` holds.
    pub fn tick_until(&self, what: &str, mut cond: impl FnMut(&Self) -> bool) {
        let start = Instant::now();
        while !cond(self) {
            assert!(start.elapsed() < POLL_TIMEOUT, "timed out waiting for {what}");
            self.tick();
            thread::sleep(POLL_INTERVAL);
        }
    }

    /// Tick until `handle`'s thread has finished, then return its result.
    pub fn run_until_finished<T>(&self, handle: JoinHandle<T>) -> T {
        self.tick_until("client thread", |_| handle.is_finished());
        match handle.join() {
            Ok(value) => value,
            Err(panic) => std::panic::resume_unwind(panic),
        }
    }

    /// Connect a client on its own thread, run `f` with it, and keep the
    /// host ticking until `f` returns.
    pub fn with_client<T, F>(&self, f: F) -> T
    where
        T: Send + 'static,
        F: FnOnce(&mut NreplClient) -> T + Send + 'static,
    {
        let handle = spawn_client(self.addr(), f);
        self.run_until_finished(handle)
    }
}

/// Connect to `addr` on a new thread and run `f` there.
pub fn spawn_client<T, F>(addr: SocketAddr, f: F) -> JoinHandle<T>
where
    T: Send + 'static,
    F: FnOnce(&mut NreplClient) -> T + Send + 'static,
{
    thread::spawn(move || {
        let mut client = NreplClient::connect(addr).expect("NreplClient::connect failed");
        client
            .set_timeout(Some(POLL_TIMEOUT))
            .expect("set_timeout failed");
        f(&mut client)
    })
}
