// Host-facing control surface: at most one nREPL server per process.
//
// The host owns a `ServerLifecycle` and calls `start`/`shutdown` on its own
// thread. A `start` while any lifecycle in the process has a server up fails
// with `StartError::AlreadyRunning` and leaves the running server untouched.
// The claim lives in `ACTIVE_SERVER`; only the lifecycle holding it clears it.

use std::net::SocketAddr;
use std::rc::Rc;
use std::sync::{Mutex, PoisonError};

use tracing::warn;

use crate::config::ServerConfig;
use crate::error::StartError;
use crate::evaluator::Evaluator;
use crate::scheduler::HostScheduler;
use crate::server::Server;

/// Address of the server this process is running, if any.
static ACTIVE_SERVER: Mutex<Option<SocketAddr>> = Mutex::new(None);

/// Snapshot for host UIs and status commands.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ServerStatus {
    Stopped,
    Running {
        addr: SocketAddr,
        queued: usize,
        connections: usize,
        sessions: usize,
    },
}

pub struct ServerLifecycle {
    scheduler: Rc<dyn HostScheduler>,
    server: Option<Server>,
}

impl ServerLifecycle {
    pub fn new(scheduler: Rc<dyn HostScheduler>) -> Self {
        Self {
            scheduler,
            server: None,
        }
    }

    pub fn start<E: Evaluator + 'static>(
        &mut self,
        config: &ServerConfig,
        evaluator: E,
    ) -> Result<&Server, StartError> {
        if let Some(server) = &self.server {
            return Err(StartError::AlreadyRunning {
                addr: server.local_addr(),
            });
        }
        // Held across the bind so two lifecycles cannot both get past the check.
        let mut active = ACTIVE_SERVER.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(addr) = *active {
            return Err(StartError::AlreadyRunning { addr });
        }
        let server = Server::start(config, Box::new(evaluator), self.scheduler.clone())?;
        *active = Some(server.local_addr());
        Ok(self.server.insert(server))
    }

    /// Stop the running server, if any. Safe to call repeatedly.
    pub fn shutdown(&mut self) {
        let Some(mut server) = self.server.take() else {
            return;
        };
        let failures = server.shutdown();
        *ACTIVE_SERVER.lock().unwrap_or_else(PoisonError::into_inner) = None;
        if !failures.is_empty() {
            warn!(
                failed_steps = failures.len(),
                "nREPL server stopped with errors"
            );
        }
    }

    pub fn status(&self) -> ServerStatus {
        match &self.server {
            None => ServerStatus::Stopped,
            Some(server) => ServerStatus::Running {
                addr: server.local_addr(),
                queued: server.queued(),
                connections: server.connection_count(),
                sessions: server.session_count(),
            },
        }
    }

    pub fn server(&self) -> Option<&Server> {
        self.server.as_ref()
    }

    pub fn is_running(&self) -> bool {
        self.server.is_some()
    }
}

impl Drop for ServerLifecycle {
    fn drop(&mut self) {
        self.shutdown();
    }
}
