//! Body decoding and re-encoding for responses that get rewritten.
//!
//! `decode` turns an upstream body into a flat buffer: chunk framing is removed
//! first (when `Transfer-Encoding: chunked` is declared), then each
//! `Content-Encoding` is undone in reverse order of application. The whole body
//! is buffered before anything is returned; there is no partial decode.
//!
//! `encode` goes the other way for the client: one plain body, correct
//! `Content-Length`, no stale `Content-Encoding`/`Transfer-Encoding` headers.

mod chunked;

pub use chunked::dechunk;

use bytes::{Bytes, BytesMut};
use flate2::read::{DeflateDecoder, MultiGzDecoder, ZlibDecoder};
use hyper::header::{
    HeaderMap, HeaderValue, CONTENT_ENCODING, CONTENT_LENGTH, CONTENT_TYPE, TRANSFER_ENCODING,
};
use std::io::Read;

/// Body framing or compression could not be undone.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("invalid chunked framing: {0}")]
    InvalidChunk(String),

    #[error("invalid {encoding} stream: {source}")]
    Decompress {
        encoding: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("unsupported content encoding {0:?}")]
    UnsupportedEncoding(String),

    #[error("body ended early: {0}")]
    Incomplete(String),
}

/// A fully materialised body with its declared content type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedBody {
    pub bytes: Bytes,
    pub content_type: Option<String>,
}

impl DecodedBody {
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Decode a complete body according to its framing and content-coding headers.
pub fn decode<I>(chunks: I, headers: &HeaderMap) -> Result<DecodedBody, CodecError>
where
    I: IntoIterator<Item = Bytes>,
{
    let mut buf = BytesMut::new();
    for chunk in chunks {
        buf.extend_from_slice(&chunk);
    }
    let mut body = buf.freeze();

    if is_chunked(headers) {
        body = Bytes::from(dechunk(&body)?);
    }

    for encoding in content_encodings(headers).iter().rev() {
        body = decompress(encoding, body)?;
    }

    let content_type = headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    Ok(DecodedBody {
        bytes: body,
        content_type,
    })
}

/// Re-serialise a decoded buffer as a plain, fully buffered body.
///
/// Returns the body and a copy of `headers` with framing and compression
/// headers replaced by a single `Content-Length`.
pub fn encode(bytes: impl Into<Bytes>, headers: &HeaderMap) -> (Bytes, HeaderMap) {
    let bytes = bytes.into();
    let mut headers = headers.clone();
    headers.remove(CONTENT_ENCODING);
    headers.remove(TRANSFER_ENCODING);
    headers.insert(CONTENT_LENGTH, HeaderValue::from(bytes.len()));
    (bytes, headers)
}

fn is_chunked(headers: &HeaderMap) -> bool {
    headers
        .get_all(TRANSFER_ENCODING)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .last()
        .map(|coding| coding.trim().eq_ignore_ascii_case("chunked"))
        .unwrap_or(false)
}

/// Content codings in the order they were applied.
fn content_encodings(headers: &HeaderMap) -> Vec<String> {
    headers
        .get_all(CONTENT_ENCODING)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(|coding| coding.trim().to_ascii_lowercase())
        .filter(|coding| !coding.is_empty())
        .collect()
}

fn decompress(encoding: &str, body: Bytes) -> Result<Bytes, CodecError> {
    // Bodies of HEAD/204/304 responses carry the header but no payload
    if body.is_empty() {
        return Ok(body);
    }

    match encoding {
        "identity" => Ok(body),
        "gzip" | "x-gzip" => read_all("gzip", MultiGzDecoder::new(&body[..])),
        "deflate" => {
            // Servers disagree on whether "deflate" means zlib-wrapped or raw
            read_all("deflate", ZlibDecoder::new(&body[..]))
                .or_else(|_| read_all("deflate", DeflateDecoder::new(&body[..])))
        }
        other => Err(CodecError::UnsupportedEncoding(other.to_string())),
    }
}

fn read_all<R: Read>(encoding: &'static str, mut reader: R) -> Result<Bytes, CodecError> {
    let mut out = Vec::new();
    reader
        .read_to_end(&mut out)
        .map_err(|source| CodecError::Decompress { encoding, source })?;
    Ok(Bytes::from(out))
}
