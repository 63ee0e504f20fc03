//! Length-prefixed framing.
//!
//! ```text
//! +--------------------+------------------------------+
//! | length (2 bytes)   | payload (length bytes)       |
//! | u16 big-endian     | tag u16 big-endian, body ... |
//! +--------------------+------------------------------+
//! ```
//!
//! TCP carries a stream of these frames; a UDP datagram carries one or more
//! of them back to back.

use std::io::{self, Read, Write};

use byteorder::{BigEndian, ByteOrder};

use crate::consts::MAX_FRAME_SIZE;

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("payload size {0} exceeds maximum {MAX_FRAME_SIZE}")]
    PayloadTooLarge(usize),
    #[error("connection closed")]
    ConnectionClosed,
    #[error("short write: {written} of {expected} bytes")]
    ShortWrite { written: usize, expected: usize },
    #[error("malformed length prefix")]
    Malformed,
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Reads one frame from a stream. Blocks until the whole payload arrives.
pub fn read_frame(reader: &mut impl Read) -> Result<Vec<u8>, FrameError> {
    let mut len_buf = [0u8; 2];
    read_exact(reader, &mut len_buf)?;
    let len = BigEndian::read_u16(&len_buf) as usize;
    let mut payload = vec![0u8; len];
    read_exact(reader, &mut payload)?;
    Ok(payload)
}

fn read_exact(reader: &mut impl Read, buf: &mut [u8]) -> Result<(), FrameError> {
    reader.read_exact(buf).map_err(|e| match e.kind() {
        io::ErrorKind::UnexpectedEof => FrameError::ConnectionClosed,
        _ => FrameError::Io(e),
    })
}

/// Writes one frame. A writer that accepts fewer bytes than offered fails
/// the frame rather than retrying.
pub fn write_frame(writer: &mut impl Write, payload: &[u8]) -> Result<(), FrameError> {
    let buf = encode_frame(payload)?;
    let written = writer.write(&buf)?;
    if written != buf.len() {
        return Err(FrameError::ShortWrite {
            written,
            expected: buf.len(),
        });
    }
    writer.flush()?;
    Ok(())
}

pub fn encode_frame(payload: &[u8]) -> Result<Vec<u8>, FrameError> {
    if payload.len() > MAX_FRAME_SIZE {
        return Err(FrameError::PayloadTooLarge(payload.len()));
    }
    let mut buf = Vec::with_capacity(payload.len() + 2);
    buf.extend_from_slice(&(payload.len() as u16).to_be_bytes());
    buf.extend_from_slice(payload);
    Ok(buf)
}

/// Splits a datagram into its frames. A length prefix that runs past the
/// end of the datagram is rejected.
pub fn split_datagram(datagram: &[u8]) -> Result<Vec<&[u8]>, FrameError> {
    let mut frames = Vec::new();
    let mut rest = datagram;
    while !rest.is_empty() {
        if rest.len() < 2 {
            return Err(FrameError::Malformed);
        }
        let len = BigEndian::read_u16(rest) as usize;
        let end = 2 + len;
        if end > rest.len() {
            return Err(FrameError::Malformed);
        }
        frames.push(&rest[2..end]);
        rest = &rest[end..];
    }
    Ok(frames)
}

/// Buffers a stream whose reads may time out, handing out frames only once
/// they are complete. A timed-out read never loses bytes.
pub struct FrameReader<R> {
    inner: R,
    buf: Vec<u8>,
}

impl<R: Read> FrameReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            buf: Vec::new(),
        }
    }

    pub fn get_ref(&self) -> &R {
        &self.inner
    }

    /// Takes `n` unframed bytes. `None` when a read timed out first.
    pub fn read_raw(&mut self, n: usize) -> Result<Option<Vec<u8>>, FrameError> {
        while self.buf.len() < n {
            if !self.fill()? {
                return Ok(None);
            }
        }
        Ok(Some(self.buf.drain(..n).collect()))
    }

    /// Takes the next complete frame. `None` when a read timed out first.
    pub fn read_frame(&mut self) -> Result<Option<Vec<u8>>, FrameError> {
        loop {
            if self.buf.len() >= 2 {
                let end = 2 + BigEndian::read_u16(&self.buf) as usize;
                if self.buf.len() >= end {
                    let frame = self.buf[2..end].to_vec();
                    self.buf.drain(..end);
                    return Ok(Some(frame));
                }
            }
            if !self.fill()? {
                return Ok(None);
            }
        }
    }

    fn fill(&mut self) -> Result<bool, FrameError> {
        let mut chunk = [0u8; 4096];
        match self.inner.read(&mut chunk) {
            Ok(0) => Err(FrameError::ConnectionClosed),
            Ok(n) => {
                self.buf.extend_from_slice(&chunk[..n]);
                Ok(true)
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => Ok(true),
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
                Ok(false)
            }
            Err(e) => Err(FrameError::Io(e)),
        }
    }
}

/// Reads the tag of a framed payload.
pub fn tag_of(payload: &[u8]) -> Option<u16> {
    (payload.len() >= 2).then(|| BigEndian::read_u16(payload))
}
