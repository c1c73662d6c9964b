use hermod_common::tracing;
use hermod_tracing::traced;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

use crate::error::{ConnectionError, ConnectionResult};

/// Longest line accepted from a client, terminator included.
pub const MAX_LINE_LENGTH: usize = 64 * 1024;

/// A line-oriented view of the client stream.
///
/// Partially received lines are kept between calls, so [`Connection::read_line`] can be
/// abandoned (for example by a timeout) and called again without losing input.
pub struct Connection<Stream: AsyncRead + AsyncWrite + Unpin + Send> {
    stream: BufReader<Stream>,
    /// Bytes of the line currently being received
    pending: Vec<u8>,
}

impl<Stream: AsyncRead + AsyncWrite + Unpin + Send> Connection<Stream> {
    pub fn new(stream: Stream) -> Self {
        Self {
            stream: BufReader::new(stream),
            pending: Vec::with_capacity(512),
        }
    }

    /// Writes one reply line, terminated with CRLF.
    #[traced(instrument(level = tracing::Level::TRACE, skip_all), timing(precision = "us"))]
    pub async fn send<S: core::fmt::Display + Send + Sync>(
        &mut self,
        response: &S,
    ) -> ConnectionResult<()> {
        let line = format!("{response}\r\n");
        let stream = self.stream.get_mut();
        stream.write_all(line.as_bytes()).await?;
        stream.flush().await?;
        Ok(())
    }

    /// Reads the next line, without its line terminator.
    ///
    /// Returns `None` once the client has closed the stream and every complete line has been
    /// consumed. A trailing fragment without a terminator is returned as a final line.
    pub async fn read_line(&mut self) -> ConnectionResult<Option<String>> {
        loop {
            if let Some(end) = self.pending.iter().position(|&byte| byte == b'\n') {
                let rest = self.pending.split_off(end + 1);
                let line = std::mem::replace(&mut self.pending, rest);
                return Ok(Some(decode(&line)));
            }

            let remaining = (MAX_LINE_LENGTH + 1).saturating_sub(self.pending.len());
            if remaining == 0 {
                return Err(ConnectionError::LineTooLong {
                    limit: MAX_LINE_LENGTH,
                });
            }

            let read = (&mut self.stream)
                .take(remaining as u64)
                .read_until(b'\n', &mut self.pending)
                .await?;

            if read == 0 {
                if self.pending.is_empty() {
                    return Ok(None);
                }

                let line = std::mem::take(&mut self.pending);
                return Ok(Some(decode(&line)));
            }
        }
    }
}

fn decode(line: &[u8]) -> String {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    String::from_utf8_lossy(line).into_owned()
}
