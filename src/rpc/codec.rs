//! Header-delimited message framing
//!
//! Frames sent over byte streams are `Content-Length: N\r\n\r\n` followed by
//! N bytes of JSON. Extra headers are tolerated on decode; only
//! `Content-Length` is emitted on encode. A missing or garbled length is a
//! transport error and terminates the session.

use bytes::{Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::ServerError;

const MAX_HEADER_BYTES: usize = 8 * 1024;

#[derive(Debug, Default)]
pub struct HeaderCodec {
    /// Body length parsed from the current header block, if any.
    content_length: Option<usize>,
}

impl HeaderCodec {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Decoder for HeaderCodec {
    type Item = Bytes;
    type Error = ServerError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>, ServerError> {
        loop {
            match self.content_length {
                None => {
                    let Some(end) = find_header_end(src) else {
                        if src.len() > MAX_HEADER_BYTES {
                            return Err(transport("header block exceeds maximum size"));
                        }
                        return Ok(None);
                    };
                    let head = src.split_to(end + 4);
                    let text = std::str::from_utf8(&head)
                        .map_err(|_| transport("header block is not valid UTF-8"))?;
                    self.content_length = Some(parse_content_length(text)?);
                }
                Some(length) => {
                    if src.len() < length {
                        src.reserve(length - src.len());
                        return Ok(None);
                    }
                    self.content_length = None;
                    return Ok(Some(src.split_to(length).freeze()));
                }
            }
        }
    }
}

impl Encoder<Bytes> for HeaderCodec {
    type Error = ServerError;

    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> Result<(), ServerError> {
        dst.reserve(item.len() + 32);
        dst.extend_from_slice(format!("Content-Length: {}\r\n\r\n", item.len()).as_bytes());
        dst.extend_from_slice(&item);
        Ok(())
    }
}

fn find_header_end(src: &BytesMut) -> Option<usize> {
    src.windows(4).position(|window| window == b"\r\n\r\n")
}

fn parse_content_length(head: &str) -> Result<usize, ServerError> {
    for line in head.split("\r\n") {
        if let Some((name, value)) = line.split_once(':') {
            if name.trim().eq_ignore_ascii_case("content-length") {
                return value
                    .trim()
                    .parse()
                    .map_err(|_| transport(format!("invalid Content-Length value {value:?}")));
            }
        }
    }
    Err(transport("missing Content-Length header"))
}

fn transport(message: impl Into<String>) -> ServerError {
    ServerError::Transport {
        message: message.into(),
    }
}
