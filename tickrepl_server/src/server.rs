// One running nREPL server: start and ordered, fault-tolerant shutdown.
//
// `Server::start` wires the pieces together in this order: validate config,
// bind, write the port file, spawn the accept thread, register the `TickPump`
// with the host scheduler. Any failure unwinds what was already done, so a
// failed start leaves nothing behind.
//
// `Server::shutdown` runs each step even if an earlier one failed (a failed
// step is logged as a `ShutdownStepError` and returned to the caller):
//   1. stop accepting (clear `running`)
//   2. cancel queued work (each waiting client gets a shutdown error)
//   3. close live connection sockets and clear the set
//   4. unregister the tick (drops the pump and with it the evaluator)
//   5. join the accept thread, which closes the listening socket
//   6. remove the port file
//   7. clear the session registry
// Calling it again is a no-op. Dropping a `Server` shuts it down.
//
// A `Server` holds the host scheduler and must stay on the host thread.
// Uniqueness (one server per process) is enforced by `ServerLifecycle`, not
// here.

use std::io;
use std::net::SocketAddr;
use std::path::Path;
use std::rc::Rc;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;

use tracing::{debug, info, warn};

use crate::config::ServerConfig;
use crate::error::{ShutdownStepError, StartError};
use crate::evaluator::Evaluator;
use crate::listener::{self, ConnectionContext, ConnectionSet, SHUTDOWN_REASON};
use crate::port_file::PortFile;
use crate::pump::{PumpStats, TickPump};
use crate::queue::WorkQueue;
use crate::scheduler::{HostScheduler, TimerHandle};
use crate::session::SessionRegistry;

pub struct Server {
    addr: SocketAddr,
    host: String,
    running: Arc<AtomicBool>,
    queue: Arc<WorkQueue>,
    registry: Arc<SessionRegistry>,
    connections: Arc<ConnectionSet>,
    stats: Rc<PumpStats>,
    scheduler: Rc<dyn HostScheduler>,
    timer: Option<TimerHandle>,
    accept_thread: Option<JoinHandle<()>>,
    port_file: Option<PortFile>,
    shut_down: bool,
}

impl Server {
    pub(crate) fn start(
        config: &ServerConfig,
        evaluator: Box<dyn Evaluator>,
        scheduler: Rc<dyn HostScheduler>,
    ) -> Result<Self, StartError> {
        config.validate()?;
        let (tcp_listener, addr) = listener::bind(&config.host, config.port)?;

        let port_file = match &config.port_file_path {
            Some(path) => Some(PortFile::write(path, addr.port()).map_err(|source| {
                StartError::PortFile {
                    path: path.clone(),
                    source,
                }
            })?),
            None => None,
        };

        let running = Arc::new(AtomicBool::new(true));
        let queue = Arc::new(WorkQueue::new());
        let registry = Arc::new(SessionRegistry::new());
        let connections = Arc::new(ConnectionSet::new());
        let ctx = Arc::new(ConnectionContext {
            queue: queue.clone(),
            registry: registry.clone(),
            connections: connections.clone(),
            running: running.clone(),
        });

        let accept_thread = match listener::spawn_accept_loop(tcp_listener, ctx) {
            Ok(handle) => handle,
            Err(e) => {
                if let Some(file) = port_file {
                    let _ = file.remove();
                }
                return Err(StartError::Spawn(e));
            }
        };

        let interval = config.tick_interval();
        let pump = TickPump::new(
            queue.clone(),
            registry.clone(),
            running.clone(),
            evaluator,
            interval,
        );
        let stats = pump.stats();
        let timer = scheduler.register_periodic(Box::new(pump), interval);

        info!(
            "nREPL server started on port {} on host {} - nrepl://{}:{}",
            addr.port(),
            config.host,
            config.host,
            addr.port()
        );

        Ok(Self {
            addr,
            host: config.host.clone(),
            running,
            queue,
            registry,
            connections,
            stats,
            scheduler,
            timer: Some(timer),
            accept_thread: Some(accept_thread),
            port_file,
            shut_down: false,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    /// `nrepl://host:port`, as printed in the startup banner.
    pub fn url(&self) -> String {
        format!("nrepl://{}:{}", self.host, self.addr.port())
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn port_file_path(&self) -> Option<&Path> {
        self.port_file.as_ref().map(PortFile::path)
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn session_count(&self) -> usize {
        self.registry.len()
    }

    pub fn stats(&self) -> &PumpStats {
        &self.stats
    }

    /// Stop the server. Idempotent; returns the steps that failed.
    pub fn shutdown(&mut self) -> Vec<ShutdownStepError> {
        if self.shut_down {
            return Vec::new();
        }
        self.shut_down = true;
        let mut failures = Vec::new();
        let mut step = |name: &'static str, result: io::Result<()>| {
            if let Err(source) = result {
                let failure = ShutdownStepError { step: name, source };
                warn!(error = %failure, "nREPL shutdown step failed");
                failures.push(failure);
            }
        };

        self.running.store(false, Ordering::SeqCst);

        let cancelled = self.queue.cancel_all(SHUTDOWN_REASON);
        debug!(cancelled, "cancelled queued nREPL work");

        step(
            "close-connections",
            self.connections.close_all().map(|closed| {
                debug!(closed, "closed nREPL connections");
            }),
        );

        if let Some(timer) = self.timer.take()
            && !self.scheduler.unregister(timer)
        {
            debug!("nREPL tick was already unregistered");
        }

        if let Some(handle) = self.accept_thread.take() {
            step(
                "close-listener",
                handle
                    .join()
                    .map_err(|_| io::Error::other("accept thread panicked")),
            );
        }

        if let Some(file) = self.port_file.take() {
            step("remove-port-file", file.remove());
        }

        let sessions = self.registry.clear();
        debug!(sessions, "cleared nREPL sessions");

        info!(port = self.addr.port(), "nREPL server stopped");
        failures
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.shutdown();
    }
}
