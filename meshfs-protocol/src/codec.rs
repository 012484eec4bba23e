//! Newline-delimited JSON framing for the backend's standard streams
//!
//! The decoder is stream oriented: bytes are buffered until a `\n` arrives,
//! so the same sequence of values comes out no matter how the stream was
//! split into reads. A line that does not parse is yielded as a
//! [`DecodeError`] item rather than a codec error, which keeps the stream
//! alive and resumes at the next line.

use std::cmp;
use std::marker::PhantomData;

use bytes::{Buf, BufMut, BytesMut};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio_util::codec::{Decoder, Encoder};

use crate::messages::{Command, Event};

/// Maximum line length (1 MB)
pub const MAX_LINE_LENGTH: usize = 1024 * 1024;

/// Raw text kept from an oversized line
const TOO_LONG_PREFIX: usize = 256;

/// Transport-level codec error
///
/// Only I/O failures end a stream. Malformed lines are reported per item.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// A single line could not be decoded
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("invalid JSON line: {source}")]
    Json {
        line: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("line is not valid UTF-8")]
    Utf8 { line: String },

    #[error("line too long: more than {max} bytes")]
    LineTooLong { line: String, max: usize },
}

impl DecodeError {
    /// The offending input (lossy for non-UTF-8, truncated for oversized lines)
    pub fn raw_line(&self) -> &str {
        match self {
            Self::Json { line, .. } | Self::Utf8 { line } | Self::LineTooLong { line, .. } => line,
        }
    }
}

/// Decode one line of text
///
/// Returns `Ok(None)` for empty or whitespace-only lines.
pub fn decode_line<T: DeserializeOwned>(line: &str) -> Result<Option<T>, DecodeError> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }

    serde_json::from_str(trimmed)
        .map(Some)
        .map_err(|source| DecodeError::Json {
            line: line.to_string(),
            source,
        })
}

/// Encode a value as compact JSON followed by a single `\n`
///
/// serde_json escapes control characters inside strings, so the encoded text
/// never contains a raw newline before the terminator.
pub fn encode_line<T: Serialize>(item: &T, dst: &mut BytesMut) -> Result<(), CodecError> {
    let data = serde_json::to_vec(item)?;
    dst.reserve(data.len() + 1);
    dst.put_slice(&data);
    dst.put_u8(b'\n');
    Ok(())
}

fn decode_bytes<T: DeserializeOwned>(line: &[u8]) -> Option<Result<T, DecodeError>> {
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    match std::str::from_utf8(line) {
        Ok(text) => decode_line(text).transpose(),
        Err(_) => Some(Err(DecodeError::Utf8 {
            line: String::from_utf8_lossy(line).into_owned(),
        })),
    }
}

/// JSON-lines codec
///
/// Decodes `T` values and encodes any serializable value. Each decoded item
/// is itself a `Result` so that a bad line never terminates the stream.
#[derive(Debug)]
pub struct JsonLinesCodec<T> {
    max_line_length: usize,
    /// Bytes of the buffer already searched for a newline
    next_index: usize,
    /// Skipping the remainder of an oversized line
    discarding: bool,
    _marker: PhantomData<fn() -> T>,
}

/// Codec used by the bridge: decodes [`Event`]s, encodes [`Command`]s
pub type BridgeCodec = JsonLinesCodec<Event>;

/// Codec for the backend side: decodes [`Command`]s, encodes [`Event`]s
pub type BackendCodec = JsonLinesCodec<Command>;

impl<T> JsonLinesCodec<T> {
    pub fn new() -> Self {
        Self::with_max_line_length(MAX_LINE_LENGTH)
    }

    pub fn with_max_line_length(max_line_length: usize) -> Self {
        Self {
            max_line_length,
            next_index: 0,
            discarding: false,
            _marker: PhantomData,
        }
    }

    pub fn max_line_length(&self) -> usize {
        self.max_line_length
    }
}

impl<T> Default for JsonLinesCodec<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: DeserializeOwned> Decoder for JsonLinesCodec<T> {
    type Item = Result<T, DecodeError>;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            if self.discarding {
                match src.iter().position(|b| *b == b'\n') {
                    Some(pos) => {
                        src.advance(pos + 1);
                        self.discarding = false;
                    }
                    None => {
                        src.clear();
                        return Ok(None);
                    }
                }
                continue;
            }

            let search_end = cmp::min(src.len(), self.max_line_length.saturating_add(1));
            let newline = src[self.next_index..search_end]
                .iter()
                .position(|b| *b == b'\n');

            match newline {
                Some(offset) => {
                    let end = self.next_index + offset;
                    self.next_index = 0;
                    let line = src.split_to(end + 1);
                    // Blank lines produce nothing; keep scanning
                    if let Some(item) = decode_bytes(&line[..end]) {
                        return Ok(Some(item));
                    }
                }
                None if src.len() > self.max_line_length => {
                    let prefix = &src[..cmp::min(src.len(), TOO_LONG_PREFIX)];
                    let err = DecodeError::LineTooLong {
                        line: String::from_utf8_lossy(prefix).into_owned(),
                        max: self.max_line_length,
                    };
                    self.next_index = 0;
                    self.discarding = true;
                    return Ok(Some(Err(err)));
                }
                None => {
                    self.next_index = search_end;
                    return Ok(None);
                }
            }
        }
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(item) = self.decode(buf)? {
            return Ok(Some(item));
        }

        // Unterminated final line
        self.next_index = 0;
        if self.discarding {
            self.discarding = false;
            buf.clear();
            return Ok(None);
        }
        if buf.is_empty() {
            return Ok(None);
        }
        let line = buf.split_to(buf.len());
        Ok(decode_bytes(&line))
    }
}

impl<T, I: Serialize> Encoder<I> for JsonLinesCodec<T> {
    type Error = CodecError;

    fn encode(&mut self, item: I, dst: &mut BytesMut) -> Result<(), Self::Error> {
        encode_line(&item, dst)
    }
}
