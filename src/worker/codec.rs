//! NDJSON line framing for worker and front-end streams.
//!
//! Wraps [`tokio_util::codec::LinesCodec`] with a maximum line length so a
//! runaway worker cannot make the orchestrator buffer an unbounded line.

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder, LinesCodec, LinesCodecError};

use crate::{AppError, Result};

/// Maximum accepted line length: 16 MiB.
///
/// A `finished` record carries the whole conversation history, so the limit
/// is generous.
pub const MAX_LINE_BYTES: usize = 16 * 1024 * 1024;

/// Newline-delimited UTF-8 codec with a bounded line length.
///
/// # Decoder
///
/// Lines longer than [`MAX_LINE_BYTES`] yield
/// [`AppError::Protocol`]`("line too long: …")`; the codec then discards the
/// rest of that line and resumes at the next newline. I/O errors surface as
/// [`AppError::Transport`] or, when raised by the framing layer itself,
/// [`AppError::Io`].
#[derive(Debug)]
pub struct LineCodec(LinesCodec);

impl LineCodec {
    /// Create a codec with the default [`MAX_LINE_BYTES`] limit.
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_length(MAX_LINE_BYTES)
    }

    /// Create a codec with a custom line limit.
    #[must_use]
    pub fn with_max_length(max: usize) -> Self {
        Self(LinesCodec::new_with_max_length(max))
    }
}

impl Default for LineCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for LineCodec {
    type Item = String;
    type Error = AppError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        self.0.decode(src).map_err(map_codec_error)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        self.0.decode_eof(src).map_err(map_codec_error)
    }
}

impl Encoder<String> for LineCodec {
    type Error = AppError;

    fn encode(&mut self, item: String, dst: &mut BytesMut) -> Result<()> {
        self.0.encode(item, dst).map_err(map_codec_error)
    }
}

fn map_codec_error(e: LinesCodecError) -> AppError {
    match e {
        LinesCodecError::MaxLineLengthExceeded => {
            AppError::Protocol("line too long: exceeded maximum line length".into())
        }
        LinesCodecError::Io(io_err) => AppError::Transport(io_err.to_string()),
    }
}
