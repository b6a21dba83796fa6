// tickrepl_protocol — nREPL wire protocol for the tick-driven evaluation server.
//
// This crate defines the bencode codec, frame helpers and request/response
// views used by the server (`tickrepl_server`) and by clients (the blocking
// test client, integration tests). It has no dependency on the evaluator or
// on the server's threading model.
//
// Module overview:
// - `bencode.rs`:  `Value` model, canonical encoder, streaming decoder with
//                  size and depth limits.
// - `message.rs`:  `Request` / `Response` views over bencode dictionaries,
//                  plus the well-known `status` strings.
// - `framing.rs`:  Read/write one frame over any `BufRead` / `Write` stream.
// - `types.rs`:    `SessionId` (UUID v4).
// - `error.rs`:    `DecodeError`.
//
// Design decisions:
// - **Hand-written codec.** Bencode is tiny and nREPL only needs four value
//   kinds; a streaming decoder over `BufRead` lets connection threads block
//   on the socket without an outer length prefix.
// - **Open op vocabulary.** Requests are dictionaries, not a closed enum, so
//   unknown ops reach the dispatcher and get a proper `unknown-op` reply
//   instead of failing to decode.
// - **No async runtime.** Plain `std::io`, matching the thread-per-connection
//   server.

pub mod bencode;
pub mod error;
pub mod framing;
pub mod message;
pub mod types;

pub use bencode::{MAX_DEPTH, MAX_FRAME_SIZE, Value};
pub use error::DecodeError;
pub use framing::{
    read_frame, read_request, read_response, write_frame, write_request, write_response,
};
pub use message::{Request, Response, status};
pub use types::SessionId;

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    /// A clone/eval exchange as an nREPL client would write it.
    #[test]
    fn client_transcript_decodes_in_order() {
        let wire = b"d2:idi1e2:op5:clonee\
                     d4:code21:(reduce + (range 20))2:idi2e2:op4:evale";
        let mut cursor = Cursor::new(wire.to_vec());
        let clone = read_request(&mut cursor).unwrap();
        assert_eq!(clone.op(), Some("clone"));
        assert_eq!(clone.id(), Some(&Value::Int(1)));
        let eval = read_request(&mut cursor).unwrap();
        assert_eq!(eval.get_str("code"), Some("(reduce + (range 20))"));
        assert!(matches!(read_request(&mut cursor), Err(DecodeError::Eof)));
    }

    #[test]
    fn garbage_stream_is_a_protocol_error_not_eof() {
        let mut cursor = Cursor::new(b"hello".to_vec());
        let err = read_request(&mut cursor).unwrap_err();
        assert!(!err.is_disconnect());
    }
}
