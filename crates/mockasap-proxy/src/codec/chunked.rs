//! `Transfer-Encoding: chunked` de-framing for fully buffered bodies.

use super::CodecError;

/// Strip chunk framing from a complete chunked body.
///
/// Chunk extensions are ignored and trailer fields are discarded. The body
/// must contain the terminating zero-size chunk.
pub fn dechunk(raw: &[u8]) -> Result<Vec<u8>, CodecError> {
    let mut out = Vec::with_capacity(raw.len());
    let mut pos = 0;

    loop {
        let (line, next) = read_line(raw, pos)?;
        let size_field = line.split(|b| *b == b';').next().unwrap_or_default();
        let size_str = std::str::from_utf8(size_field)
            .map_err(|_| CodecError::InvalidChunk("chunk size is not ASCII".to_string()))?
            .trim();
        let size = usize::from_str_radix(size_str, 16)
            .map_err(|_| CodecError::InvalidChunk(format!("bad chunk size {size_str:?}")))?;
        pos = next;

        if size == 0 {
            // Trailer section: header lines until an empty line (or end of input)
            while pos < raw.len() {
                let (trailer, next) = read_line(raw, pos)?;
                pos = next;
                if trailer.is_empty() {
                    break;
                }
            }
            return Ok(out);
        }

        let end = pos
            .checked_add(size)
            .filter(|end| *end <= raw.len())
            .ok_or_else(|| {
                CodecError::InvalidChunk(format!(
                    "chunk of {size} bytes exceeds remaining {} bytes",
                    raw.len() - pos
                ))
            })?;
        out.extend_from_slice(&raw[pos..end]);

        if raw.get(end..end + 2) != Some(b"\r\n".as_slice()) {
            return Err(CodecError::InvalidChunk(
                "chunk data not followed by CRLF".to_string(),
            ));
        }
        pos = end + 2;
    }
}

/// Read a CRLF-terminated line starting at `pos`, returning it and the offset after the CRLF.
fn read_line(raw: &[u8], pos: usize) -> Result<(&[u8], usize), CodecError> {
    let rest = raw.get(pos..).unwrap_or_default();
    let idx = rest
        .windows(2)
        .position(|w| w == b"\r\n")
        .ok_or_else(|| CodecError::InvalidChunk("missing terminating chunk".to_string()))?;
    Ok((&rest[..idx], pos + idx + 2))
}
