//! Newline framing for the control protocol.
//!
//! Wraps [`tokio_util::codec::LinesCodec`] with a maximum line length so a
//! peer that never sends `\n` cannot make the endpoint buffer without bound.
//! Partial reads are buffered until the newline arrives and several lines in
//! one read are yielded one by one.
//!
//! [`LineReader`] drives the codec directly instead of going through
//! `FramedRead`, because a framed stream terminates after the first decode
//! error while a control connection must survive an oversize line.

use std::io::ErrorKind;

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio_util::codec::{Decoder, LinesCodec, LinesCodecError};

use crate::{AppError, Result};

/// Default maximum line length: 1 MiB.
pub const MAX_LINE_BYTES: usize = 1_048_576;

/// Line codec for control connections.
///
/// Decoding an over-long line yields `AppError::Protocol("line too long: …")`
/// and a line that is not valid UTF-8 yields `AppError::Protocol("invalid
/// UTF-8 …")`. Either way the offending line is discarded and decoding
/// resumes at the next line, so the connection stays usable.
#[derive(Debug)]
pub struct ControlCodec {
    inner: LinesCodec,
    max_length: usize,
}

impl ControlCodec {
    /// Codec with the default [`MAX_LINE_BYTES`] limit.
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_length(MAX_LINE_BYTES)
    }

    /// Codec with a custom line limit.
    #[must_use]
    pub fn with_max_length(max_length: usize) -> Self {
        Self {
            inner: LinesCodec::new_with_max_length(max_length),
            max_length,
        }
    }

    fn map_error(&self, err: LinesCodecError) -> AppError {
        match err {
            LinesCodecError::MaxLineLengthExceeded => {
                AppError::Protocol(format!("line too long: exceeded {} bytes", self.max_length))
            }
            // LinesCodec consumes the line before its UTF-8 check fails.
            LinesCodecError::Io(io_err) if io_err.kind() == ErrorKind::InvalidData => {
                AppError::Protocol(format!("invalid UTF-8 in line: {io_err}"))
            }
            LinesCodecError::Io(io_err) => AppError::Io(io_err.to_string()),
        }
    }
}

impl Default for ControlCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for ControlCodec {
    type Item = String;
    type Error = AppError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        self.inner.decode(src).map_err(|err| self.map_error(err))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        self.inner.decode_eof(src).map_err(|err| self.map_error(err))
    }
}

/// Reads newline-terminated lines from an async byte stream.
#[derive(Debug)]
pub struct LineReader<R> {
    inner: R,
    codec: ControlCodec,
    buf: BytesMut,
}

impl<R: AsyncRead + Unpin> LineReader<R> {
    /// Wrap `inner` with the given line limit.
    pub fn new(inner: R, max_length: usize) -> Self {
        Self {
            inner,
            codec: ControlCodec::with_max_length(max_length),
            buf: BytesMut::with_capacity(4096),
        }
    }

    /// Next complete line, without its terminator.
    ///
    /// Returns `None` at end of stream; a trailing fragment without `\n` is
    /// dropped. `Some(Err(AppError::Protocol(_)))` reports an oversize or
    /// non-UTF-8 line and
    /// the reader stays usable; `Some(Err(AppError::Io(_)))` is terminal.
    pub async fn next_line(&mut self) -> Option<Result<String>> {
        loop {
            match self.codec.decode(&mut self.buf) {
                Ok(Some(line)) => return Some(Ok(line)),
                Ok(None) => {}
                Err(err) => return Some(Err(err)),
            }

            match self.inner.read_buf(&mut self.buf).await {
                Ok(0) => return None,
                Ok(_) => {}
                Err(err) => return Some(Err(AppError::Io(err.to_string()))),
            }
        }
    }
}
