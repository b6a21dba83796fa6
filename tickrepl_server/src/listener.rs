// Network side of the bridge: the accept loop and per-connection handlers.
//
// Threads:
// - **Accept thread** (one per server): owns the `TcpListener` in
//   non-blocking mode and polls `accept()` until the server's `running` flag
//   drops. Each accepted socket is registered in the `ConnectionSet` *before*
//   its handler thread starts, so shutdown can always reach it. Returning
//   from the loop drops the listener, closing the listening socket.
// - **Connection threads** (one per client): decode a request, resolve its
//   session, push a `WorkItem`, then block on that item's reply channel and
//   write each frame as it arrives until `Finished`. Then the next request.
//   Strictly one request in flight per connection.
//
// While a connection thread waits for the host tick, it peeks the socket
// every `HANGUP_POLL_INTERVAL`. A peer that has hung up marks the pending
// item abandoned, so the pump skips it instead of evaluating on behalf of
// nobody.
//
// Connection threads never touch the evaluator; they only see the
// `WorkQueue`, the `SessionRegistry` and the `ConnectionSet`.

use std::collections::HashMap;
use std::io::{self, BufReader, BufWriter};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::RecvTimeoutError;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tickrepl_protocol::{DecodeError, read_request, status, write_response};
use tracing::{debug, warn};

use crate::error::{ConnectionError, StartError};
use crate::queue::{Reply, ReplyReceiver, WorkItem, WorkQueue, reply_channel};
use crate::session::{ConnectionSessions, SessionRegistry};

/// Sleep between `accept()` polls when nothing is pending.
pub const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// How often a waiting connection checks whether its peer hung up.
pub const HANGUP_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// `err` text for requests refused or cancelled by shutdown.
pub const SHUTDOWN_REASON: &str = "nREPL server is shutting down";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

#[derive(Default)]
struct ConnectionState {
    streams: HashMap<ConnectionId, TcpStream>,
    next_id: u64,
    closed: bool,
}

/// Live client connections, keyed by id. Holds a clone of each socket so
/// shutdown can close connections whose threads are blocked in a read.
#[derive(Default)]
pub struct ConnectionSet {
    state: Mutex<ConnectionState>,
}

impl ConnectionSet {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, ConnectionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Track `stream`. Returns `None` once the set has been closed by
    /// shutdown; the caller should drop the connection.
    pub fn register(&self, stream: TcpStream) -> Option<ConnectionId> {
        let mut state = self.lock();
        if state.closed {
            return None;
        }
        let id = ConnectionId(state.next_id);
        state.next_id += 1;
        state.streams.insert(id, stream);
        Some(id)
    }

    pub fn remove(&self, id: ConnectionId) -> bool {
        self.lock().streams.remove(&id).is_some()
    }

    /// Shut down the read side of every tracked socket, clear the set and
    /// refuse further registrations. Returns how many sockets were closed, or
    /// the first error after attempting all of them.
    ///
    /// Only reads are shut: a handler still writes any reply already handed
    /// to it (the shutdown errors from `WorkQueue::cancel_all`), then sees
    /// EOF and closes the socket itself.
    pub fn close_all(&self) -> io::Result<usize> {
        let streams = {
            let mut state = self.lock();
            state.closed = true;
            std::mem::take(&mut state.streams)
        };
        let count = streams.len();
        let mut first_error = None;
        for stream in streams.into_values() {
            match stream.shutdown(Shutdown::Read) {
                Err(e) if e.kind() != io::ErrorKind::NotConnected => {
                    first_error.get_or_insert(e);
                }
                _ => {}
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(count),
        }
    }

    pub fn len(&self) -> usize {
        self.lock().streams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// What the accept loop and connection threads share with the server.
pub(crate) struct ConnectionContext {
    pub queue: Arc<WorkQueue>,
    pub registry: Arc<SessionRegistry>,
    pub connections: Arc<ConnectionSet>,
    pub running: Arc<AtomicBool>,
}

/// Bind the listening socket. Port 0 asks the OS for a free port; the
/// returned address has the real one.
pub fn bind(host: &str, port: u16) -> Result<(TcpListener, SocketAddr), StartError> {
    let addr = if host.contains(':') && !host.starts_with('[') {
        format!("[{host}]:{port}")
    } else {
        format!("{host}:{port}")
    };
    let bind_error = |source| StartError::Bind {
        addr: addr.clone(),
        source,
    };
    let listener = TcpListener::bind(addr.as_str()).map_err(bind_error)?;
    let local = listener.local_addr().map_err(bind_error)?;
    listener.set_nonblocking(true).map_err(bind_error)?;
    Ok((listener, local))
}

pub(crate) fn spawn_accept_loop(
    listener: TcpListener,
    ctx: Arc<ConnectionContext>,
) -> io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("nrepl-accept".into())
        .spawn(move || accept_loop(listener, ctx))
}

fn accept_loop(listener: TcpListener, ctx: Arc<ConnectionContext>) {
    while ctx.running.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok((stream, peer)) => {
                if !ctx.running.load(Ordering::SeqCst) {
                    break;
                }
                accept_connection(stream, peer, &ctx);
            }
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                thread::sleep(ACCEPT_POLL_INTERVAL);
            }
            Err(e) => {
                if !ctx.running.load(Ordering::SeqCst) {
                    break;
                }
                warn!(error = %e, "nREPL accept failed");
                thread::sleep(ACCEPT_POLL_INTERVAL);
            }
        }
    }
    debug!("nREPL accept loop stopped");
}

fn accept_connection(stream: TcpStream, peer: SocketAddr, ctx: &Arc<ConnectionContext>) {
    // Accepted sockets may inherit the listener's non-blocking mode.
    if let Err(e) = stream.set_nonblocking(false) {
        warn!(%peer, error = %e, "could not configure nREPL connection");
        return;
    }
    let tracked = match stream.try_clone() {
        Ok(clone) => clone,
        Err(e) => {
            warn!(%peer, error = %e, "could not configure nREPL connection");
            return;
        }
    };
    let Some(id) = ctx.connections.register(tracked) else {
        // Shutdown closed the set between accept and here.
        return;
    };
    debug!(conn = id.0, %peer, "nREPL connection opened");

    let thread_ctx = ctx.clone();
    let spawned = thread::Builder::new()
        .name(format!("nrepl-conn-{}", id.0))
        .spawn(move || handle_connection(stream, id, &thread_ctx));
    if let Err(e) = spawned {
        warn!(conn = id.0, error = %e, "could not spawn nREPL connection thread");
        ctx.connections.remove(id);
    }
}

fn handle_connection(stream: TcpStream, id: ConnectionId, ctx: &ConnectionContext) {
    let mut owned = ConnectionSessions::new();
    match serve(&stream, ctx, &mut owned) {
        Ok(()) => debug!(conn = id.0, "nREPL connection closed"),
        Err(e) if e.is_disconnect() => debug!(conn = id.0, "nREPL peer disconnected"),
        Err(e) => debug!(conn = id.0, error = %e, "nREPL connection dropped"),
    }
    ctx.connections.remove(id);
    ctx.registry.retire_connection(owned);
    let _ = stream.shutdown(Shutdown::Both);
}

fn serve(
    stream: &TcpStream,
    ctx: &ConnectionContext,
    owned: &mut ConnectionSessions,
) -> Result<(), ConnectionError> {
    let mut reader = BufReader::new(stream.try_clone()?);
    let mut writer = BufWriter::new(stream.try_clone()?);
    loop {
        let request = match read_request(&mut reader) {
            Ok(request) => request,
            Err(DecodeError::Eof) => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        let session = ctx.registry.resolve(request.session(), owned);
        let (sink, replies) = reply_channel();
        let item = WorkItem {
            session,
            request,
            sink,
        };
        if let Err(item) = ctx.queue.push(item) {
            let refusal = item
                .reply()
                .with("err", SHUTDOWN_REASON)
                .with_status(&[status::ERROR, status::SERVER_SHUTDOWN, status::DONE]);
            write_response(&mut writer, &refusal)?;
            return Ok(());
        }
        if !relay_replies(stream, &replies, &mut writer)? {
            return Ok(());
        }
    }
}

/// Forward frames for one request until it finishes. Returns false if the
/// connection should close instead of reading another request.
fn relay_replies(
    stream: &TcpStream,
    replies: &ReplyReceiver,
    writer: &mut BufWriter<TcpStream>,
) -> Result<bool, ConnectionError> {
    loop {
        match replies.recv_timeout(HANGUP_POLL_INTERVAL) {
            Ok(Reply::Frame(frame)) => {
                if let Err(e) = write_response(writer, &frame) {
                    replies.abandon();
                    return Err(e.into());
                }
            }
            Ok(Reply::Finished) => return Ok(true),
            Err(RecvTimeoutError::Timeout) => {
                if peer_closed(stream) {
                    replies.abandon();
                    return Ok(false);
                }
            }
            // The work item was dropped without an answer (server torn down).
            Err(RecvTimeoutError::Disconnected) => return Ok(false),
        }
    }
}

/// True if the peer has closed its end. Only called while this thread is
/// the socket's sole user, since it briefly flips the socket non-blocking.
pub(crate) fn peer_closed(stream: &TcpStream) -> bool {
    if stream.set_nonblocking(true).is_err() {
        return true;
    }
    let mut peeked = [0u8; 1];
    let closed = match stream.peek(&mut peeked) {
        Ok(0) => true,
        Ok(_) => false,
        Err(e) => e.kind() != io::ErrorKind::WouldBlock,
    };
    let _ = stream.set_nonblocking(false);
    closed
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    fn tcp_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).unwrap();
        let (server, _) = listener.accept().unwrap();
        (client, server)
    }

    #[test]
    fn bind_port_zero_reports_real_port() {
        let (_listener, addr) = bind("127.0.0.1", 0).unwrap();
        assert_ne!(addr.port(), 0);
        assert!(addr.ip().is_loopback());
    }

    #[test]
    fn bind_in_use_port_is_a_bind_error() {
        let (_held, addr) = bind("127.0.0.1", 0).unwrap();
        assert!(matches!(
            bind("127.0.0.1", addr.port()),
            Err(StartError::Bind { .. })
        ));
    }

    #[test]
    fn bind_bad_host_is_a_bind_error() {
        assert!(matches!(
            bind("definitely not a host", 0),
            Err(StartError::Bind { .. })
        ));
    }

    #[test]
    fn peer_closed_sees_hangup_but_not_idle_or_pending_data() {
        let (mut client, server) = tcp_pair();
        assert!(!peer_closed(&server));

        client.write_all(b"d").unwrap();
        client.flush().unwrap();
        thread::sleep(Duration::from_millis(20));
        assert!(!peer_closed(&server));

        let (client, server) = tcp_pair();
        drop(client);
        thread::sleep(Duration::from_millis(20));
        assert!(peer_closed(&server));
    }

    #[test]
    fn connection_set_close_all_refuses_new_registrations() {
        let set = ConnectionSet::new();
        let (_client_a, server_a) = tcp_pair();
        let (_client_b, server_b) = tcp_pair();
        let a = set.register(server_a).unwrap();
        set.register(server_b).unwrap();
        assert_eq!(set.len(), 2);
        assert!(set.remove(a));
        assert!(!set.remove(a));

        assert_eq!(set.close_all().unwrap(), 1);
        assert!(set.is_empty());
        let (_client_c, server_c) = tcp_pair();
        assert_eq!(set.register(server_c), None);
    }
}
