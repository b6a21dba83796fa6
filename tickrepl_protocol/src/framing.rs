// Frame-level read/write over a byte stream.
//
// One frame is one top-level bencode value. Reading returns a typed
// `Request` or `Response` view; writing encodes and flushes immediately so a
// connection handler can stream several response frames for one request
// (e.g. an `out` frame followed by the final value frame) without buffering.
//
// Both helpers operate on plain `std::io` traits and are used by the server's
// connection handlers and by the blocking client alike.

use std::io::{self, BufRead, Write};

use crate::bencode::{self, Value};
use crate::error::DecodeError;
use crate::message::{Request, Response};

/// Write one bencode value and flush.
pub fn write_frame<W: Write>(writer: &mut W, value: &Value) -> io::Result<()> {
    let bytes = value.to_bytes();
    writer.write_all(&bytes)?;
    writer.flush()
}

/// Read one bencode value.
pub fn read_frame<R: BufRead>(reader: &mut R) -> Result<Value, DecodeError> {
    bencode::decode(reader)
}

/// Read one frame and interpret it as a request.
pub fn read_request<R: BufRead>(reader: &mut R) -> Result<Request, DecodeError> {
    Request::from_value(read_frame(reader)?)
}

/// Read one frame and interpret it as a response.
pub fn read_response<R: BufRead>(reader: &mut R) -> Result<Response, DecodeError> {
    Response::from_value(read_frame(reader)?)
}

pub fn write_request<W: Write>(writer: &mut W, request: &Request) -> io::Result<()> {
    write_frame(writer, &request.to_value())
}

pub fn write_response<W: Write>(writer: &mut W, response: &Response) -> io::Result<()> {
    write_frame(writer, &response.to_value())
}
