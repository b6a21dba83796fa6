// Blocking nREPL client.
//
// Small and synchronous: send one request, read frames until the one whose
// `status` contains `done` for that request's id. Used by the integration
// tests and handy for scripting against a running host. Frames for other
// ids (there should be none with one request in flight) are discarded.
//
// Request ids are assigned as decimal strings ("1", "2", ...) unless the
// caller already set one.

use std::io::{BufReader, BufWriter};
use std::net::{SocketAddr, TcpStream};
use std::time::Duration;

use tickrepl_protocol::{Request, Response, Value, read_response, write_request};

use crate::error::ClientError;

pub struct NreplClient {
    reader: BufReader<TcpStream>,
    writer: BufWriter<TcpStream>,
    next_id: u64,
}

impl NreplClient {
    pub fn connect(addr: SocketAddr) -> Result<Self, ClientError> {
        let stream = TcpStream::connect(addr)?;
        let reader = BufReader::new(stream.try_clone()?);
        Ok(Self {
            reader,
            writer: BufWriter::new(stream),
            next_id: 1,
        })
    }

    /// Read timeout for every subsequent `recv`. `None` blocks forever.
    pub fn set_timeout(&self, timeout: Option<Duration>) -> Result<(), ClientError> {
        self.reader.get_ref().set_read_timeout(timeout)?;
        Ok(())
    }

    /// Send `request`, giving it an id if it has none. Returns the id used.
    pub fn send(&mut self, mut request: Request) -> Result<Value, ClientError> {
        let id = match request.id().cloned() {
            Some(id) => id,
            None => {
                let id = Value::str(self.next_id.to_string());
                self.next_id += 1;
                request = request.with_id(id.clone());
                id
            }
        };
        write_request(&mut self.writer, &request)?;
        Ok(id)
    }

    pub fn recv(&mut self) -> Result<Response, ClientError> {
        Ok(read_response(&mut self.reader)?)
    }

    /// Send `request` and collect its frames, ending with the `done` frame.
    pub fn request(&mut self, request: Request) -> Result<Vec<Response>, ClientError> {
        let id = self.send(request)?;
        let mut frames = Vec::new();
        loop {
            let frame = self.recv()?;
            if frame.id() != Some(&id) {
                continue;
            }
            let done = frame.is_done();
            frames.push(frame);
            if done {
                return Ok(frames);
            }
        }
    }

    pub fn eval(
        &mut self,
        code: &str,
        session: Option<&str>,
    ) -> Result<Vec<Response>, ClientError> {
        let mut request = Request::new("eval").with("code", code);
        if let Some(session) = session {
            request = request.with_session(session);
        }
        self.request(request)
    }

    /// Ask for a new session, optionally copying `parent`'s namespace.
    /// Returns the new session id, or `None` if the server sent none.
    pub fn clone_session(&mut self, parent: Option<&str>) -> Result<Option<String>, ClientError> {
        let mut request = Request::new("clone");
        if let Some(parent) = parent {
            request = request.with_session(parent);
        }
        let frames = self.request(request)?;
        Ok(frames
            .iter()
            .find_map(|f| f.get_str("new-session"))
            .map(str::to_owned))
    }

    pub fn close_session(&mut self, session: &str) -> Result<Vec<Response>, ClientError> {
        self.request(Request::new("close").with_session(session))
    }

    pub fn describe(&mut self) -> Result<Response, ClientError> {
        let mut frames = self.request(Request::new("describe"))?;
        // `request` only returns once it has pushed the done frame.
        Ok(frames.pop().unwrap_or_default())
    }

    pub fn ls_sessions(&mut self) -> Result<Vec<String>, ClientError> {
        let frames = self.request(Request::new("ls-sessions"))?;
        Ok(frames
            .iter()
            .filter_map(|f| f.get("sessions").and_then(Value::as_list))
            .flatten()
            .filter_map(Value::as_str)
            .map(str::to_owned)
            .collect())
    }
}

/// The `value` of the first frame that has one.
pub fn value_of(frames: &[Response]) -> Option<&str> {
    frames.iter().find_map(|f| f.get_str("value"))
}

/// Concatenated `out` text across frames.
pub fn out_of(frames: &[Response]) -> String {
    frames.iter().filter_map(|f| f.get_str("out")).collect()
}
