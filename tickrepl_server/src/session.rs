// Session registry and nREPL op dispatch.
//
// `SessionRegistry` is shared between connection threads (which resolve the
// session for each incoming request and retire the sessions they created
// implicitly when they disconnect) and the host tick (which creates, closes and lists
// sessions while dispatching). It only stores bookkeeping; the language
// state behind a session lives in the `Evaluator`, which only the host
// thread touches. Sessions removed by connection threads are therefore
// parked in a retired list until the next tick forwards them to
// `Evaluator::close_session`.
//
// Session resolution for a request:
// - `session` names a registered session -> that session.
// - `session` absent -> the connection's default session, created on first
//   use and retired when the connection ends.
// - `session` names an unknown id -> a fresh stand-in session, named in the
//   reply. The connection remembers it, so repeating the same stale id
//   reuses it, and retires it on disconnect like the default session.
//
// `dispatch` implements the ops. Every frame echoes `id` and names the
// session; the last frame of a request carries `done` in `status`.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use tickrepl_protocol::{Request, Response, SessionId, Value, status};

use crate::evaluator::{Evaluation, Evaluator};

/// Ops this server answers, as advertised by `describe`.
pub const SUPPORTED_OPS: &[&str] = &[
    "clone",
    "close",
    "describe",
    "eval",
    "load-file",
    "ls-sessions",
];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionOrigin {
    /// Made by `clone`; lives until `close` or shutdown.
    Cloned,
    /// A connection's implicit session or a stand-in for an unknown id;
    /// retired with the connection.
    Connection,
}

#[derive(Clone, Debug)]
pub struct SessionState {
    pub id: SessionId,
    pub created_at: Instant,
    pub last_op_id: Option<Value>,
    pub origin: SessionOrigin,
}

/// Sessions a connection created implicitly, for retiring on disconnect.
#[derive(Debug, Default)]
pub struct ConnectionSessions {
    default: Option<SessionId>,
    /// Requested id -> the session that stands in for it.
    stand_ins: HashMap<String, SessionId>,
}

impl ConnectionSessions {
    pub fn new() -> Self {
        Self::default()
    }
}

#[derive(Default)]
struct RegistryState {
    sessions: HashMap<SessionId, SessionState>,
    retired: Vec<SessionId>,
}

#[derive(Default)]
pub struct SessionRegistry {
    state: Mutex<RegistryState>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn create(&self, origin: SessionOrigin) -> SessionId {
        let id = SessionId::new();
        self.lock().sessions.insert(
            id,
            SessionState {
                id,
                created_at: Instant::now(),
                last_op_id: None,
                origin,
            },
        );
        id
    }

    /// Pick the session for a request (connection thread side).
    pub fn resolve(&self, requested: Option<&str>, owned: &mut ConnectionSessions) -> SessionId {
        let Some(requested) = requested else {
            return match owned.default {
                Some(id) if self.contains(&id) => id,
                _ => {
                    let id = self.create(SessionOrigin::Connection);
                    owned.default = Some(id);
                    id
                }
            };
        };
        if let Ok(id) = requested.parse::<SessionId>()
            && self.contains(&id)
        {
            return id;
        }
        if let Some(id) = owned.stand_ins.get(requested)
            && self.contains(id)
        {
            return *id;
        }
        let id = self.create(SessionOrigin::Connection);
        owned.stand_ins.insert(requested.to_string(), id);
        id
    }

    /// Retire everything a finished connection created implicitly.
    pub fn retire_connection(&self, owned: ConnectionSessions) {
        for id in owned.default.into_iter().chain(owned.stand_ins.into_values()) {
            self.retire(&id);
        }
    }

    pub fn contains(&self, id: &SessionId) -> bool {
        self.lock().sessions.contains_key(id)
    }

    pub fn get(&self, id: &SessionId) -> Option<SessionState> {
        self.lock().sessions.get(id).cloned()
    }

    /// Remove a session on the host thread. The caller closes it in the
    /// evaluator.
    pub fn remove(&self, id: &SessionId) -> bool {
        self.lock().sessions.remove(id).is_some()
    }

    /// Remove a session from a connection thread; the next tick closes it in
    /// the evaluator.
    pub fn retire(&self, id: &SessionId) {
        let mut state = self.lock();
        if state.sessions.remove(id).is_some() {
            state.retired.push(*id);
        }
    }

    pub fn take_retired(&self) -> Vec<SessionId> {
        std::mem::take(&mut self.lock().retired)
    }

    pub fn note_op(&self, id: &SessionId, op_id: Option<&Value>) {
        if let Some(session) = self.lock().sessions.get_mut(id) {
            session.last_op_id = op_id.cloned();
        }
    }

    /// Registered ids, oldest first.
    pub fn ids(&self) -> Vec<SessionId> {
        let state = self.lock();
        let mut sessions: Vec<&SessionState> = state.sessions.values().collect();
        sessions.sort_by_key(|s| (s.created_at, s.id));
        sessions.iter().map(|s| s.id).collect()
    }

    pub fn len(&self) -> usize {
        self.lock().sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every session (shutdown). Returns how many there were.
    pub fn clear(&self) -> usize {
        let mut state = self.lock();
        state.retired.clear();
        std::mem::take(&mut state.sessions).len()
    }
}

/// Answer one request, handing each frame to `emit` in order. Runs on the
/// host thread.
pub fn dispatch(
    registry: &SessionRegistry,
    evaluator: &mut dyn Evaluator,
    session: SessionId,
    request: &Request,
    emit: &mut dyn FnMut(Response),
) {
    let reply = || Response::reply_to(request.id(), Some(&session));
    match request.op() {
        Some("clone") => {
            let child = registry.create(SessionOrigin::Cloned);
            evaluator.clone_session(Some(&session), &child);
            emit(
                reply()
                    .with("new-session", child.to_string())
                    .with_status(&[status::DONE]),
            );
        }
        Some("eval") => match request.get_str("code") {
            Some(code) => {
                let evaluation = evaluator.evaluate(&session, code);
                emit_evaluation(evaluator, session, request, evaluation, emit);
            }
            None => emit(missing_param(reply(), "eval", "code")),
        },
        Some("load-file") => match request.get_str("file") {
            Some(contents) => {
                let evaluation = evaluator.evaluate(&session, contents);
                emit_evaluation(evaluator, session, request, evaluation, emit);
            }
            None => emit(missing_param(reply(), "load-file", "file")),
        },
        Some("close") => {
            // An unknown `session` was already swapped for a fresh one by
            // `resolve`; that stand-in is dropped and the close reported as
            // unknown.
            let known = request.session().is_none_or(|s| s == session.to_string());
            registry.remove(&session);
            evaluator.close_session(&session);
            let statuses: &[&str] = if known {
                &[status::DONE, status::SESSION_CLOSED]
            } else {
                &[status::ERROR, status::UNKNOWN_SESSION, status::DONE]
            };
            emit(reply().with_status(statuses));
        }
        Some("describe") => emit(describe(reply())),
        Some("ls-sessions") => {
            let ids: Vec<String> = registry.ids().iter().map(SessionId::to_string).collect();
            emit(
                reply()
                    .with("sessions", Value::str_list(&ids))
                    .with_status(&[status::DONE]),
            );
        }
        other => {
            let err = match other {
                Some(op) => format!("unknown op: {op}"),
                None => "request has no op".to_string(),
            };
            emit(
                reply()
                    .with("err", err)
                    .with_status(&[status::ERROR, status::UNKNOWN_OP, status::DONE]),
            );
        }
    }
}

fn emit_evaluation(
    evaluator: &dyn Evaluator,
    session: SessionId,
    request: &Request,
    evaluation: Evaluation,
    emit: &mut dyn FnMut(Response),
) {
    let reply = || Response::reply_to(request.id(), Some(&session));
    if let Some(out) = evaluation.output {
        emit(reply().with("out", out));
    }
    match evaluation.result {
        Ok(value) => emit(
            reply()
                .with("value", value)
                .with("ns", evaluator.namespace(&session))
                .with_status(&[status::DONE]),
        ),
        Err(e) => {
            emit(reply().with("err", format!("{}\n", e.message)));
            emit(
                reply()
                    .with("ex", e.class)
                    .with_status(&[status::EVAL_ERROR, status::DONE]),
            );
        }
    }
}

fn missing_param(reply: Response, op: &str, param: &str) -> Response {
    reply
        .with("err", format!("{op} requires a `{param}` parameter"))
        .with_status(&[status::ERROR, status::DONE])
}

fn describe(reply: Response) -> Response {
    let ops: BTreeMap<Vec<u8>, Value> = SUPPORTED_OPS
        .iter()
        .map(|op| (op.as_bytes().to_vec(), Value::Dict(BTreeMap::new())))
        .collect();
    let server_version = BTreeMap::from([(
        b"version-string".to_vec(),
        Value::str(env!("CARGO_PKG_VERSION")),
    )]);
    let versions = BTreeMap::from([(b"tickrepl".to_vec(), Value::Dict(server_version))]);
    reply
        .with("ops", ops)
        .with("versions", versions)
        .with_status(&[status::DONE])
}
