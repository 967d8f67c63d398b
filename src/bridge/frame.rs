//! Newline-delimited JSON framing
//!
//! One frame is one JSON document terminated by `\n`. Frames are read as raw
//! bytes so that invalid UTF-8 surfaces as a decode error for that frame
//! instead of an I/O error that would end the connection. A frame longer than
//! [`MAX_FRAME_BYTES`] is an I/O error.

use std::io;

use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

use super::error::BridgeResult;

/// Longest accepted frame, line terminator included
pub const MAX_FRAME_BYTES: usize = 64 * 1024;

/// Reads frames from a stream.
///
/// `next_frame` is cancel safe: bytes read before a cancellation stay in the
/// internal buffer and are returned by the next call.
#[derive(Debug)]
pub struct FrameReader<R> {
    reader: BufReader<R>,
    buf: Vec<u8>,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            reader: BufReader::new(inner),
            buf: Vec::new(),
        }
    }

    /// Next frame without its line terminator, or `None` once the peer closed
    /// the stream.
    ///
    /// Fails with [`io::ErrorKind::InvalidData`] once more than
    /// [`MAX_FRAME_BYTES`] arrive without a terminator; the stream is out of
    /// sync after that and should be dropped.
    pub async fn next_frame(&mut self) -> io::Result<Option<Vec<u8>>> {
        let remaining = (MAX_FRAME_BYTES + 1).saturating_sub(self.buf.len()) as u64;
        let read = (&mut self.reader)
            .take(remaining)
            .read_until(b'\n', &mut self.buf)
            .await?;
        if read == 0 && self.buf.is_empty() {
            return Ok(None);
        }

        if self.buf.len() > MAX_FRAME_BYTES && self.buf.last() != Some(&b'\n') {
            self.buf.clear();
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("frame exceeds {MAX_FRAME_BYTES} bytes"),
            ));
        }

        let mut frame = std::mem::take(&mut self.buf);
        while matches!(frame.last(), Some(b'\n' | b'\r')) {
            frame.pop();
        }

        Ok(Some(frame))
    }
}

/// Serialize `value` and write it as a single frame
pub async fn write_frame<W, T>(writer: &mut W, value: &T) -> BridgeResult<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let mut line = serde_json::to_vec(value)?;
    line.push(b'\n');
    writer.write_all(&line).await?;
    writer.flush().await?;
    Ok(())
}

/// Frames consisting only of whitespace are keep-alives and ignored
pub fn is_blank(frame: &[u8]) -> bool {
    frame.iter().all(u8::is_ascii_whitespace)
}
