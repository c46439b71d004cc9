//! A bounded-buffer line reader over an async byte stream.
//!
//! Distinct from [`crate::session::data::DataReader`]: this reader handles
//! *command* lines (CRLF-terminated, capped at
//! [`crate::command::MAX_COMMAND_LINE_LEN`]) outside the DATA phase. It
//! wraps every read in a [`tokio::time::timeout`], matching the pattern the
//! wider example pack uses for per-command deadlines instead of a
//! free-standing timer per line.

use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt};

use crate::error::SessionError;

/// Reads CRLF command lines from a buffered reader, enforcing a read
/// timeout and a maximum line length.
pub struct LineReader<R> {
    reader: R,
    max_len: usize,
}

impl<R: AsyncBufReadExt + Unpin> LineReader<R> {
    pub fn new(reader: R, max_len: usize) -> Self {
        LineReader { reader, max_len }
    }

    /// Reads a single line, stripping the trailing `\r\n` or bare `\n`.
    ///
    /// Returns `Ok(None)` on EOF (the peer closed the connection).
    /// `Err(SessionError::TransportTimeout)` if `timeout` elapses first.
    /// `Err(SessionError::ProtocolSyntax)` if the accumulated line exceeds
    /// `max_len` before a newline is seen — the reader keeps draining past
    /// the oversize line so the caller can still resynchronize with the
    /// stream.
    pub async fn read_line(&mut self, timeout: Duration) -> Result<Option<String>, SessionError> {
        read_line_timeout(&mut self.reader, self.max_len, timeout).await
    }
}

/// Reads one CRLF command line directly off a buffered reader, without
/// requiring a [`LineReader`] to own it. Used by [`crate::session::Session`],
/// which needs to reborrow its I/O stream for both command lines and the
/// SASL exchange rather than have a struct hold it.
pub async fn read_line_timeout<R: AsyncBufReadExt + Unpin>(
    reader: &mut R,
    max_len: usize,
    timeout: Duration,
) -> Result<Option<String>, SessionError> {
    let mut buf = Vec::new();
    let read = tokio::time::timeout(timeout, read_line_bounded(reader, &mut buf, max_len))
        .await
        .map_err(|_| SessionError::TransportTimeout)??;

    if read == 0 {
        return Ok(None);
    }

    while buf.last() == Some(&b'\n') || buf.last() == Some(&b'\r') {
        buf.pop();
    }

    String::from_utf8(buf)
        .map(Some)
        .map_err(|_| SessionError::ProtocolSyntax("command line is not valid UTF-8".to_string()))
}

/// Reads into `buf` until `\n` or EOF, returning an error if more than
/// `max_len` bytes accumulate before a newline — but continuing to drain
/// the oversize line so the stream stays framed correctly.
async fn read_line_bounded<R: AsyncBufReadExt + Unpin>(
    reader: &mut R,
    buf: &mut Vec<u8>,
    max_len: usize,
) -> std::io::Result<Result<usize, SessionError>> {
    let mut total = 0usize;
    let mut oversize = false;
    loop {
        let mut chunk = Vec::new();
        let n = reader.read_until(b'\n', &mut chunk).await?;
        if n == 0 {
            return Ok(Ok(total));
        }
        total += n;
        let hit_newline = chunk.last() == Some(&b'\n');
        if !oversize {
            if buf.len() + chunk.len() > max_len {
                oversize = true;
            } else {
                buf.extend_from_slice(&chunk);
            }
        }
        if hit_newline {
            break;
        }
    }
    if oversize {
        Ok(Err(SessionError::ProtocolSyntax(format!(
            "command line exceeds {max_len} octets"
        ))))
    } else {
        Ok(Ok(total))
    }
}

/// Writes a [`crate::response::Response`] to the wire and flushes.
pub async fn write_response<W: AsyncWriteExt + Unpin>(
    writer: &mut W,
    response: &crate::response::Response,
) -> std::io::Result<()> {
    writer.write_all(response.to_wire().as_bytes()).await?;
    writer.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::BufReader;

    #[tokio::test]
    async fn reads_single_crlf_line() {
        let data = b"EHLO client.example\r\nQUIT\r\n".to_vec();
        let mut reader = LineReader::new(BufReader::new(&data[..]), 1000);
        let line = reader
            .read_line(Duration::from_secs(1))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(line, "EHLO client.example");
        let line2 = reader
            .read_line(Duration::from_secs(1))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(line2, "QUIT");
    }

    #[tokio::test]
    async fn eof_returns_none() {
        let data: Vec<u8> = Vec::new();
        let mut reader = LineReader::new(BufReader::new(&data[..]), 1000);
        assert!(reader.read_line(Duration::from_secs(1)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn oversize_line_is_rejected_but_stream_stays_framed() {
        let long = "A".repeat(2000);
        let data = format!("{long}\r\nQUIT\r\n").into_bytes();
        let mut reader = LineReader::new(BufReader::new(&data[..]), 1000);
        let err = reader.read_line(Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, SessionError::ProtocolSyntax(_)));
        let line = reader
            .read_line(Duration::from_secs(1))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(line, "QUIT");
    }

    #[tokio::test]
    async fn bare_lf_is_accepted() {
        let data = b"NOOP\nQUIT\n".to_vec();
        let mut reader = LineReader::new(BufReader::new(&data[..]), 1000);
        let line = reader
            .read_line(Duration::from_secs(1))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(line, "NOOP");
    }

    #[tokio::test]
    async fn read_past_timeout_errors() {
        let (reader, _writer) = tokio::io::duplex(64);
        let mut reader = LineReader::new(BufReader::new(reader), 1000);
        let err = reader
            .read_line(Duration::from_millis(10))
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::TransportTimeout));
    }
}
