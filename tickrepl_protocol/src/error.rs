// Decode errors for the bencode wire format.
//
// Any variant other than `Eof` means the peer sent something we cannot
// resynchronise from: the connection handler closes that connection and
// leaves every other connection alone.

use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DecodeError {
    /// Stream closed cleanly between frames.
    #[error("connection closed")]
    Eof,
    #[error("stream ended in the middle of a frame")]
    Truncated,
    #[error("unexpected byte 0x{0:02x}")]
    UnexpectedByte(u8),
    #[error("invalid integer {0:?}")]
    InvalidInteger(String),
    #[error("dictionary key is not a byte string")]
    NonStringKey,
    #[error("frame exceeds {limit} bytes")]
    TooLarge { limit: usize },
    #[error("frame nested deeper than {limit} levels")]
    TooDeep { limit: usize },
    #[error("trailing bytes after frame")]
    TrailingBytes,
    #[error("frame is not a dictionary")]
    NotADict,
    #[error("read failed: {0}")]
    Io(#[from] io::Error),
}

impl DecodeError {
    /// True when the peer simply went away rather than sending garbage.
    pub fn is_disconnect(&self) -> bool {
        match self {
            DecodeError::Eof | DecodeError::Truncated => true,
            DecodeError::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::BrokenPipe
                    | io::ErrorKind::NotConnected
            ),
            _ => false,
        }
    }
}
