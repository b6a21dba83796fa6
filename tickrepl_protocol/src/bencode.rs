// Bencode value model, encoder and streaming decoder.
//
// nREPL speaks bencode: integers `i<n>e`, byte strings `<len>:<bytes>`,
// lists `l...e` and dictionaries `d...e`. Dictionary keys are byte strings
// and must be written in sorted order; `Value::Dict` uses a `BTreeMap` so
// encoding is canonical for free. The decoder accepts unsorted keys since
// several real clients don't bother sorting (last duplicate wins).
//
// The decoder reads from any `BufRead` one value at a time, so a connection
// handler can call it in a loop on a socket without any outer length prefix:
// bencode values are self-delimiting. Limits on total frame size and nesting
// depth keep a hostile client from exhausting memory or the stack.
//
// See also: `framing.rs` for the per-connection read/write helpers and
// `message.rs` for the nREPL request/response views over `Value::Dict`.

use std::collections::BTreeMap;
use std::io::{self, BufRead};

use crate::error::DecodeError;

/// Maximum encoded size of a single top-level value (16 MB).
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Maximum list/dict nesting depth accepted by the decoder.
pub const MAX_DEPTH: usize = 64;

/// A decoded bencode value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Value {
    Int(i64),
    Bytes(Vec<u8>),
    List(Vec<Value>),
    Dict(BTreeMap<Vec<u8>, Value>),
}

impl Value {
    /// Byte-string value from UTF-8 text.
    pub fn str(s: impl Into<String>) -> Self {
        Value::Bytes(s.into().into_bytes())
    }

    /// List of byte strings, the shape nREPL uses for `status`.
    pub fn str_list<S: AsRef<str>>(items: &[S]) -> Self {
        Value::List(items.iter().map(|s| Value::str(s.as_ref())).collect())
    }

    /// Borrow as UTF-8 text. `None` for non-strings and invalid UTF-8.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Bytes(b) => std::str::from_utf8(b).ok(),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_dict(&self) -> Option<&BTreeMap<Vec<u8>, Value>> {
        match self {
            Value::Dict(map) => Some(map),
            _ => None,
        }
    }

    /// Append the bencode encoding of `self` to `out`.
    pub fn encode_into(&self, out: &mut Vec<u8>) {
        match self {
            Value::Int(n) => {
                out.push(b'i');
                out.extend_from_slice(n.to_string().as_bytes());
                out.push(b'e');
            }
            Value::Bytes(bytes) => encode_bytes(bytes, out),
            Value::List(items) => {
                out.push(b'l');
                for item in items {
                    item.encode_into(out);
                }
                out.push(b'e');
            }
            Value::Dict(map) => {
                out.push(b'd');
                for (key, value) in map {
                    encode_bytes(key, out);
                    value.encode_into(out);
                }
                out.push(b'e');
            }
        }
    }

    /// Encode to a fresh buffer.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.encode_into(&mut out);
        out
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::str(s)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Bytes(s.into_bytes())
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::List(items)
    }
}

impl From<BTreeMap<Vec<u8>, Value>> for Value {
    fn from(map: BTreeMap<Vec<u8>, Value>) -> Self {
        Value::Dict(map)
    }
}

fn encode_bytes(bytes: &[u8], out: &mut Vec<u8>) {
    out.extend_from_slice(bytes.len().to_string().as_bytes());
    out.push(b':');
    out.extend_from_slice(bytes);
}

/// Decode exactly one value from `reader`.
///
/// Returns `DecodeError::Eof` if the stream ends cleanly before the first
/// byte, and `DecodeError::Truncated` if it ends partway through a value.
pub fn decode<R: BufRead>(reader: &mut R) -> Result<Value, DecodeError> {
    let mut first = [0u8; 1];
    match reader.read_exact(&mut first) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Err(DecodeError::Eof),
        Err(e) => return Err(DecodeError::Io(e)),
    }
    let mut decoder = Decoder {
        reader,
        consumed: 1,
    };
    decoder.value(first[0], 0)
}

/// Decode one value from a byte slice, rejecting trailing bytes.
pub fn decode_slice(bytes: &[u8]) -> Result<Value, DecodeError> {
    let mut cursor = io::Cursor::new(bytes);
    let value = decode(&mut cursor)?;
    if (cursor.position() as usize) < bytes.len() {
        return Err(DecodeError::TrailingBytes);
    }
    Ok(value)
}

struct Decoder<'a, R> {
    reader: &'a mut R,
    consumed: usize,
}

impl<R: BufRead> Decoder<'_, R> {
    fn next_byte(&mut self) -> Result<u8, DecodeError> {
        let mut b = [0u8; 1];
        self.read_into(&mut b)?;
        Ok(b[0])
    }

    fn read_into(&mut self, buf: &mut [u8]) -> Result<(), DecodeError> {
        if self.consumed + buf.len() > MAX_FRAME_SIZE {
            return Err(DecodeError::TooLarge {
                limit: MAX_FRAME_SIZE,
            });
        }
        match self.reader.read_exact(buf) {
            Ok(()) => {
                self.consumed += buf.len();
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Err(DecodeError::Truncated),
            Err(e) => Err(DecodeError::Io(e)),
        }
    }

    fn value(&mut self, first: u8, depth: usize) -> Result<Value, DecodeError> {
        if depth > MAX_DEPTH {
            return Err(DecodeError::TooDeep { limit: MAX_DEPTH });
        }
        match first {
            b'i' => self.integer(),
            b'0'..=b'9' => self.byte_string(first).map(Value::Bytes),
            b'l' => {
                let mut items = Vec::new();
                loop {
                    let b = self.next_byte()?;
                    if b == b'e' {
                        return Ok(Value::List(items));
                    }
                    items.push(self.value(b, depth + 1)?);
                }
            }
            b'd' => {
                let mut map = BTreeMap::new();
                loop {
                    let b = self.next_byte()?;
                    if b == b'e' {
                        return Ok(Value::Dict(map));
                    }
                    if !b.is_ascii_digit() {
                        return Err(DecodeError::NonStringKey);
                    }
                    let key = self.byte_string(b)?;
                    let next = self.next_byte()?;
                    let value = self.value(next, depth + 1)?;
                    map.insert(key, value);
                }
            }
            other => Err(DecodeError::UnexpectedByte(other)),
        }
    }

    fn integer(&mut self) -> Result<Value, DecodeError> {
        let mut text = String::new();
        loop {
            let b = self.next_byte()?;
            match b {
                b'e' => break,
                b'-' if text.is_empty() => text.push('-'),
                b'0'..=b'9' if text.len() < 20 => text.push(b as char),
                _ => return Err(DecodeError::InvalidInteger(text)),
            }
        }
        // Reject "-0", leading zeros and empty integers like the reference codec.
        let digits = text.strip_prefix('-').unwrap_or(&text);
        let malformed = digits.is_empty()
            || (digits.len() > 1 && digits.starts_with('0'))
            || text == "-0";
        if malformed {
            return Err(DecodeError::InvalidInteger(text));
        }
        text.parse::<i64>()
            .map(Value::Int)
            .map_err(|_| DecodeError::InvalidInteger(text))
    }

    fn byte_string(&mut self, first: u8) -> Result<Vec<u8>, DecodeError> {
        let mut len: usize = usize::from(first - b'0');
        loop {
            let b = self.next_byte()?;
            match b {
                b':' => break,
                b'0'..=b'9' => {
                    len = len
                        .checked_mul(10)
                        .and_then(|n| n.checked_add(usize::from(b - b'0')))
                        .filter(|n| *n <= MAX_FRAME_SIZE)
                        .ok_or(DecodeError::TooLarge {
                            limit: MAX_FRAME_SIZE,
                        })?;
                }
                other => return Err(DecodeError::UnexpectedByte(other)),
            }
        }
        let mut buf = vec![0u8; len];
        self.read_into(&mut buf)?;
        Ok(buf)
    }
}
