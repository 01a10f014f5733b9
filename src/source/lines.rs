//! Turning a fetched object payload into log lines.
//!
//! Access logs land in the bucket either gzip-compressed or as plain text,
//! and nothing in the key reliably says which. Decoding tries gzip first and
//! falls back to reading the raw bytes as text when the gzip frame is invalid.

use flate2::read::MultiGzDecoder;
use std::io::Read;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("gzip payload is not valid UTF-8: {0}")]
    CompressedNotUtf8(#[source] std::string::FromUtf8Error),

    #[error("payload is neither gzip nor valid UTF-8 text: {0}")]
    NotText(#[source] std::string::FromUtf8Error),
}

/// How a payload was decoded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    Gzip,
    Plain,
}

/// One line of a decoded object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawLine<'a> {
    pub key: &'a str,
    /// Zero-based position of the line within its object
    pub ordinal: usize,
    pub text: &'a str,
}

/// The decoded text of one object. Lines are produced lazily from it.
#[derive(Debug, Clone)]
pub struct DecodedObject {
    key: String,
    text: String,
    encoding: Encoding,
}

impl DecodedObject {
    pub fn new(key: impl Into<String>, text: String, encoding: Encoding) -> Self {
        Self {
            key: key.into(),
            text,
            encoding,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn encoding(&self) -> Encoding {
        self.encoding
    }

    pub fn text_len(&self) -> usize {
        self.text.len()
    }

    pub fn lines(&self) -> impl Iterator<Item = RawLine<'_>> {
        self.text
            .lines()
            .enumerate()
            .map(move |(ordinal, text)| RawLine {
                key: &self.key,
                ordinal,
                text,
            })
    }
}

/// Produces text from a raw object payload.
pub trait LineSource: Send + Sync {
    fn decode(&self, key: &str, payload: &[u8]) -> Result<DecodedObject, DecodeError>;
}

/// Gzip with a plain-text fallback.
#[derive(Debug, Clone, Copy, Default)]
pub struct GzipOrPlain;

impl LineSource for GzipOrPlain {
    fn decode(&self, key: &str, payload: &[u8]) -> Result<DecodedObject, DecodeError> {
        match gunzip(payload) {
            Some(decompressed) => {
                let text = String::from_utf8(decompressed).map_err(DecodeError::CompressedNotUtf8)?;
                Ok(DecodedObject::new(key, text, Encoding::Gzip))
            }
            None => {
                tracing::debug!(key = %key, "payload is not gzip, reading as plain text");
                let text = String::from_utf8(payload.to_vec()).map_err(DecodeError::NotText)?;
                Ok(DecodedObject::new(key, text, Encoding::Plain))
            }
        }
    }
}

/// Reads every gzip member, so concatenated members decode as one stream.
fn gunzip(payload: &[u8]) -> Option<Vec<u8>> {
    let mut decoder = MultiGzDecoder::new(payload);
    let mut decompressed = Vec::new();
    match decoder.read_to_end(&mut decompressed) {
        Ok(_) => Some(decompressed),
        Err(_) => None,
    }
}
