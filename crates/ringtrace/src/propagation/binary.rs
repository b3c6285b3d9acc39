use super::{CodecError, Propagation};
use crate::context::SpanContext;
use std::io::{Cursor, Write};

/// Leading bytes of an embedded context. `0xFF` never occurs in UTF-8, so the
/// marker cannot be confused with payload text.
pub const BINARY_MARKER: [u8; 4] = [0xFF, 0xFE, b'r', b't'];

const LEN_BYTES: usize = 4;

/// Binary carrier: `[marker][u32 BE length][UTF-8 single-string form]`,
/// written at the cursor's current position.
#[derive(Debug, Default, Clone, Copy)]
pub struct BinaryCodec;

impl BinaryCodec {
    /// Locate and decode an embedded context anywhere in `buf`.
    pub fn decode_bytes(&self, buf: &[u8]) -> Result<SpanContext, CodecError> {
        let start = buf
            .windows(BINARY_MARKER.len())
            .position(|w| w == BINARY_MARKER)
            .ok_or(CodecError::MarkerNotFound)?;

        let len_at = start + BINARY_MARKER.len();
        let len_bytes: [u8; LEN_BYTES] = buf
            .get(len_at..len_at + LEN_BYTES)
            .and_then(|b| b.try_into().ok())
            .ok_or(CodecError::Truncated {
                needed: LEN_BYTES,
                available: buf.len().saturating_sub(len_at),
            })?;
        let len = u32::from_be_bytes(len_bytes) as usize;

        let body_at = len_at + LEN_BYTES;
        let body = buf
            .get(body_at..body_at.saturating_add(len))
            .ok_or(CodecError::Truncated {
                needed: len,
                available: buf.len() - body_at,
            })?;
        let text = std::str::from_utf8(body).map_err(|_| CodecError::InvalidUtf8)?;
        SpanContext::deserialize(text)
    }
}

impl Propagation<Cursor<Vec<u8>>> for BinaryCodec {
    fn inject(&self, ctx: &SpanContext, carrier: &mut Cursor<Vec<u8>>) -> Result<(), CodecError> {
        let payload = ctx.serialize();
        let len = u32::try_from(payload.len()).map_err(|_| CodecError::TooLarge(payload.len()))?;

        let write = |out: &mut Cursor<Vec<u8>>| -> std::io::Result<()> {
            out.write_all(&BINARY_MARKER)?;
            out.write_all(&len.to_be_bytes())?;
            out.write_all(payload.as_bytes())
        };
        write(carrier).map_err(|e| CodecError::Malformed(e.to_string()))
    }

    fn decode(&self, carrier: &Cursor<Vec<u8>>) -> Result<SpanContext, CodecError> {
        self.decode_bytes(carrier.get_ref())
    }
}
