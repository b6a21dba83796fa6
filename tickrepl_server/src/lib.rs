// tickrepl_server — nREPL server for hosts with a cooperative tick loop.
//
// The host (a game loop, a DCC app, anything single-threaded that owns its
// state) must only be touched from its own thread. This crate bridges that
// to nREPL over TCP: connection threads decode requests and queue them, and
// a periodic callback on the host's scheduler drains the queue and evaluates
// each request there. Replies flow back through a per-request channel.
//
// Module overview:
// - `config.rs`:    `ServerConfig` (host, port, port file, tick interval),
//                   JSON loading and validation.
// - `scheduler.rs`: `HostScheduler` seam plus `CooperativeScheduler`, a
//                   single-threaded timer list the binary and tests drive.
// - `queue.rs`:     `WorkQueue` of `WorkItem`s and the reply channel.
// - `session.rs`:   `SessionRegistry` and op dispatch (clone, close,
//                   describe, eval, load-file, ls-sessions).
// - `evaluator.rs`: `Evaluator` trait and its impl for `tickrepl_lisp`.
// - `pump.rs`:      `TickPump`, the host-side periodic task.
// - `listener.rs`:  Accept loop, per-connection threads, `ConnectionSet`.
// - `port_file.rs`: `.nrepl-port` write/remove.
// - `server.rs`:    `Server`: ordered start and shutdown.
// - `lifecycle.rs`: `ServerLifecycle`: the one-server-per-process surface.
// - `client.rs`:    Blocking client used by tests and scripts.
// - `logging.rs`:   `tracing` subscriber setup for the binary.
// - `error.rs`:     Error types for all of the above.
//
// Dependencies: `tickrepl_protocol` (bencode framing, messages) and
// `tickrepl_lisp` (the default evaluator).

pub mod client;
pub mod config;
pub mod error;
pub mod evaluator;
pub mod lifecycle;
pub mod listener;
pub mod logging;
pub mod port_file;
pub mod pump;
pub mod queue;
pub mod scheduler;
pub mod server;
pub mod session;

pub use client::NreplClient;
pub use config::ServerConfig;
pub use error::{ConfigError, StartError};
pub use evaluator::{Evaluation, EvaluationError, Evaluator};
pub use lifecycle::{ServerLifecycle, ServerStatus};
pub use scheduler::{CooperativeScheduler, HostScheduler, PeriodicTask, TickControl, TimerHandle};
pub use server::Server;
