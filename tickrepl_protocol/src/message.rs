// nREPL request and response frames.
//
// Both directions are bencode dictionaries with string keys. Rather than a
// closed enum of ops (nREPL middleware adds ops freely), `Request` and
// `Response` are thin typed views over the dictionary with accessors for the
// well-known keys:
//
// - Requests carry `op`, `id`, optional `session`, plus op-specific keys
//   (`code`, `file`, `file-path`, ...).
// - Responses echo `id` verbatim (clients may use integers or strings) and
//   carry `session`, op-specific keys (`value`, `out`, `err`, `ns`,
//   `new-session`, ...) and, on the last frame of a request, a `status` list
//   containing `"done"`.
//
// Well-known status strings live in the `status` submodule.

use std::collections::BTreeMap;

use crate::bencode::Value;
use crate::error::DecodeError;
use crate::types::SessionId;

/// Status strings used in response `status` lists.
pub mod status {
    pub const DONE: &str = "done";
    pub const ERROR: &str = "error";
    pub const EVAL_ERROR: &str = "eval-error";
    pub const UNKNOWN_OP: &str = "unknown-op";
    pub const UNKNOWN_SESSION: &str = "unknown-session";
    pub const SESSION_CLOSED: &str = "session-closed";
    pub const SERVER_SHUTDOWN: &str = "server-shutdown";
}

type Fields = BTreeMap<Vec<u8>, Value>;

fn field_str<'a>(fields: &'a Fields, key: &str) -> Option<&'a str> {
    fields.get(key.as_bytes()).and_then(Value::as_str)
}

/// A decoded client request.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct Request {
    fields: Fields,
}

impl Request {
    /// Build a request for `op` (client side).
    pub fn new(op: &str) -> Self {
        Self::default().with("op", op)
    }

    pub fn with_id(self, id: impl Into<Value>) -> Self {
        self.with("id", id)
    }

    pub fn with_session(self, session: &str) -> Self {
        self.with("session", session)
    }

    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.fields.insert(key.as_bytes().to_vec(), value.into());
        self
    }

    /// Interpret a decoded frame. Only dictionaries are requests.
    pub fn from_value(value: Value) -> Result<Self, DecodeError> {
        match value {
            Value::Dict(fields) => Ok(Self { fields }),
            _ => Err(DecodeError::NotADict),
        }
    }

    pub fn to_value(&self) -> Value {
        Value::Dict(self.fields.clone())
    }

    pub fn op(&self) -> Option<&str> {
        field_str(&self.fields, "op")
    }

    /// The client's correlation id, echoed verbatim in every reply.
    pub fn id(&self) -> Option<&Value> {
        self.fields.get(b"id".as_slice())
    }

    pub fn session(&self) -> Option<&str> {
        field_str(&self.fields, "session")
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key.as_bytes())
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        field_str(&self.fields, key)
    }
}

/// One response frame.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct Response {
    fields: Fields,
}

impl Response {
    /// Start a reply that echoes the request id and names the session.
    pub fn reply_to(id: Option<&Value>, session: Option<&SessionId>) -> Self {
        let mut response = Self::default();
        if let Some(id) = id {
            response.fields.insert(b"id".to_vec(), id.clone());
        }
        if let Some(session) = session {
            response
                .fields
                .insert(b"session".to_vec(), Value::str(session.to_string()));
        }
        response
    }

    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.fields.insert(key.as_bytes().to_vec(), value.into());
        self
    }

    pub fn with_status(self, statuses: &[&str]) -> Self {
        self.with("status", Value::str_list(statuses))
    }

    pub fn from_value(value: Value) -> Result<Self, DecodeError> {
        match value {
            Value::Dict(fields) => Ok(Self { fields }),
            _ => Err(DecodeError::NotADict),
        }
    }

    pub fn to_value(&self) -> Value {
        Value::Dict(self.fields.clone())
    }

    pub fn id(&self) -> Option<&Value> {
        self.fields.get(b"id".as_slice())
    }

    pub fn session(&self) -> Option<&str> {
        field_str(&self.fields, "session")
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key.as_bytes())
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        field_str(&self.fields, key)
    }

    /// Entries of the `status` list; empty when absent.
    pub fn status(&self) -> Vec<&str> {
        self.fields
            .get(b"status".as_slice())
            .and_then(Value::as_list)
            .map(|items| items.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default()
    }

    pub fn has_status(&self, wanted: &str) -> bool {
        self.status().contains(&wanted)
    }

    /// True for the terminal frame of a request.
    pub fn is_done(&self) -> bool {
        self.has_status(status::DONE)
    }
}
