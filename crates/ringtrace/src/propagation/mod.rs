//! Context propagation codecs.
//!
//! Three carrier forms share one payload:
//! - [`B3HeaderCodec`]: `X-B3-*` text headers plus `baggage-` / `baggage-sys-` entries
//! - [`StringCodec`]: the single-string form of [`SpanContext::serialize`]
//! - [`BinaryCodec`]: marker, big-endian length and the single-string form,
//!   embedded at a cursor position
//!
//! Decoding failures are surfaced as [`CodecError`]; the tracer turns them into
//! a fresh root context so callers never see them.

mod b3;
mod binary;
pub mod escape;

pub use b3::{B3HeaderCodec, TextMap};
pub use binary::{BinaryCodec, BINARY_MARKER};

use crate::context::SpanContext;
use thiserror::Error;

/// Error types for context decoding
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// No trace id in the carrier
    #[error("carrier has no trace id")]
    MissingTraceId,
    /// The single-string payload could not be parsed
    #[error("malformed context: {0}")]
    Malformed(String),
    /// Binary marker absent from the buffer
    #[error("binary context marker not found")]
    MarkerNotFound,
    /// Declared payload length runs past the end of the buffer
    #[error("binary context truncated: need {needed} bytes, {available} available")]
    Truncated { needed: usize, available: usize },
    /// Payload bytes are not UTF-8
    #[error("binary context payload is not valid UTF-8")]
    InvalidUtf8,
    /// Payload does not fit the 4-byte length prefix
    #[error("context too large to encode: {0} bytes")]
    TooLarge(usize),
}

/// A codec between [`SpanContext`] and a carrier type `C`.
pub trait Propagation<C: ?Sized>: Send + Sync {
    /// Write `ctx` into the carrier.
    fn inject(&self, ctx: &SpanContext, carrier: &mut C) -> Result<(), CodecError>;

    /// Read a context from the carrier.
    fn decode(&self, carrier: &C) -> Result<SpanContext, CodecError>;
}

/// Single-string carrier.
#[derive(Debug, Default, Clone, Copy)]
pub struct StringCodec;

impl Propagation<String> for StringCodec {
    fn inject(&self, ctx: &SpanContext, carrier: &mut String) -> Result<(), CodecError> {
        carrier.clear();
        carrier.push_str(&ctx.serialize());
        Ok(())
    }

    fn decode(&self, carrier: &String) -> Result<SpanContext, CodecError> {
        SpanContext::deserialize(carrier)
    }
}
