//! Native-messaging frame I/O
//!
//! Every message in either direction is a 4-byte little-endian length
//! followed by that many bytes of UTF-8 JSON.

use std::io::{self, Read, Write};

use tracing::trace;

/// Default upper bound for a single incoming message (8 MiB)
pub const DEFAULT_MAX_MESSAGE_SIZE: u32 = 8 * 1024 * 1024;

/// Size of the length prefix
const HEADER_LEN: usize = 4;

/// Transport-level failures; all of them end the session
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// Underlying stream failed
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Stream ended inside the length prefix
    #[error("Truncated length prefix: got {0} of 4 bytes")]
    TruncatedHeader(usize),

    /// Stream ended inside the payload
    #[error("Truncated payload: expected {expected} bytes, got {actual}")]
    TruncatedPayload {
        /// Announced payload length
        expected: usize,
        /// Bytes actually read
        actual: usize,
    },

    /// Announced length exceeds the configured maximum
    #[error("Message of {length} bytes exceeds the limit of {max} bytes")]
    TooLarge {
        /// Announced payload length
        length: u32,
        /// Configured maximum
        max: u32,
    },

    /// Payload is not valid UTF-8
    #[error("Payload is not valid UTF-8")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),
}

/// Reads length-prefixed frames from a byte stream
#[derive(Debug)]
pub struct FrameReader<R> {
    inner: R,
    max_message_size: u32,
}

impl<R: Read> FrameReader<R> {
    /// Wrap a stream with the default message size limit
    pub const fn new(inner: R) -> Self {
        Self::with_max_message_size(inner, DEFAULT_MAX_MESSAGE_SIZE)
    }

    /// Wrap a stream with a custom message size limit
    pub const fn with_max_message_size(inner: R, max_message_size: u32) -> Self {
        Self {
            inner,
            max_message_size,
        }
    }

    /// Read the next frame.
    ///
    /// Returns `Ok(None)` when the stream ends exactly on a frame boundary.
    pub fn read_frame(&mut self) -> Result<Option<String>, FrameError> {
        let mut header = [0u8; HEADER_LEN];
        let filled = read_full(&mut self.inner, &mut header)?;
        match filled {
            0 => return Ok(None),
            HEADER_LEN => {}
            n => return Err(FrameError::TruncatedHeader(n)),
        }

        let length = u32::from_le_bytes(header);
        if length > self.max_message_size {
            return Err(FrameError::TooLarge {
                length,
                max: self.max_message_size,
            });
        }

        let expected = length as usize;
        let mut payload = Vec::with_capacity(expected);
        let actual = (&mut self.inner)
            .take(u64::from(length))
            .read_to_end(&mut payload)?;
        if actual != expected {
            return Err(FrameError::TruncatedPayload { expected, actual });
        }

        trace!(length, "Read frame");
        Ok(Some(String::from_utf8(payload)?))
    }
}

/// Writes length-prefixed frames to a byte stream
#[derive(Debug)]
pub struct FrameWriter<W> {
    inner: W,
}

impl<W: Write> FrameWriter<W> {
    /// Wrap a stream
    pub const fn new(inner: W) -> Self {
        Self { inner }
    }

    /// Write one frame and flush it
    pub fn write_frame(&mut self, payload: &str) -> Result<(), FrameError> {
        let length = u32::try_from(payload.len()).map_err(|_| FrameError::TooLarge {
            length: u32::MAX,
            max: u32::MAX,
        })?;
        self.inner.write_all(&length.to_le_bytes())?;
        self.inner.write_all(payload.as_bytes())?;
        self.inner.flush()?;
        trace!(length, "Wrote frame");
        Ok(())
    }

    /// Unwrap the underlying stream
    pub fn into_inner(self) -> W {
        self.inner
    }
}

/// Fill `buf` as far as the stream allows, returning the byte count
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
