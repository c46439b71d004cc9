//! The DATA body reader: dot-stuffing removal, CRLF normalization, and
//! incremental size enforcement while the body streams in.
//!
//! Distinct from [`crate::reader::LineReader`]: that reader frames *command*
//! lines capped at [`crate::command::MAX_COMMAND_LINE_LEN`]; this one reads
//! the body of a `DATA` transaction, which has no per-line cap, only a
//! total-size cap, and ends at a line consisting solely of `.`.

use std::time::Duration;

use tokio::io::AsyncBufReadExt;

/// Why [`DataReader::read_body`] failed to produce a stored message.
#[derive(Debug)]
pub enum DataError {
    /// The accumulated body exceeded the configured maximum size. The
    /// reader has already drained to the terminator before returning this,
    /// so the session stays framed and can reply 552 from `Ready`.
    TooLarge,
    /// An octet above 0x7F appeared in the body despite neither the client
    /// announcing `BODY=8BITMIME` nor the server running with 8-bit
    /// content enabled.
    EightBitViolation,
    /// The idle timeout between body lines elapsed.
    Timeout,
    /// The peer closed the connection mid-body.
    UnexpectedEof,
    Io(std::io::Error),
}

/// Reads the octets of one DATA transaction body.
pub struct DataReader;

impl DataReader {
    /// Reads from `reader` until a line containing only `.` CRLF, stripping
    /// one leading `.` from any stuffed line and normalizing bare `\n` line
    /// endings to `\r\n` in the stored form. `max_size` bounds the stored
    /// byte count; `eight_bit_allowed` controls whether octets above 0x7F
    /// are tolerated. `idle_timeout` applies to each individual line read,
    /// matching the "deadline per suspension point" discipline used
    /// elsewhere in this crate rather than one timer for the whole body.
    ///
    /// On [`DataError::TooLarge`] or [`DataError::EightBitViolation`] the
    /// reader has already consumed through the terminator line, so the
    /// session remains byte-aligned with the client and can continue in
    /// `Ready` after replying with the appropriate error code.
    pub async fn read_body<R>(
        reader: &mut R,
        max_size: u64,
        eight_bit_allowed: bool,
        idle_timeout: Duration,
    ) -> Result<Vec<u8>, DataError>
    where
        R: AsyncBufReadExt + Unpin,
    {
        let mut out = Vec::new();
        let mut too_large = false;
        let mut bad_octet = false;

        // A single line need never be retained past `max_size` plus a
        // couple of bytes of CRLF slack: once a line alone is that long the
        // body is already oversized, so there is nothing to gain (and
        // unbounded memory to lose) by buffering more of it than that
        // while we scan ahead for its terminating `\n`.
        let line_cap = (max_size as usize).saturating_add(2);

        loop {
            let mut raw = Vec::new();
            let (read, line_truncated) = tokio::time::timeout(
                idle_timeout,
                read_line_capped(reader, &mut raw, line_cap),
            )
            .await
            .map_err(|_| DataError::Timeout)?
            .map_err(DataError::Io)?;

            if read == 0 {
                return Err(DataError::UnexpectedEof);
            }

            while raw.last() == Some(&b'\n') || raw.last() == Some(&b'\r') {
                raw.pop();
            }

            if line_truncated {
                // A line this long already exceeds max_size on its own;
                // keep draining lines until the terminator without ever
                // holding more than `line_cap` bytes of it in memory.
                too_large = true;
                continue;
            }

            if raw == b"." {
                break;
            }

            let line: &[u8] = if raw.first() == Some(&b'.') { &raw[1..] } else { &raw[..] };

            if !eight_bit_allowed && line.iter().any(|&b| b > 0x7F) {
                bad_octet = true;
            }

            if !too_large {
                let projected = out.len() as u64 + line.len() as u64 + 2;
                if projected > max_size {
                    too_large = true;
                } else {
                    out.extend_from_slice(line);
                    out.extend_from_slice(b"\r\n");
                }
            }
        }

        if too_large {
            return Err(DataError::TooLarge);
        }
        if bad_octet {
            return Err(DataError::EightBitViolation);
        }
        Ok(out)
    }
}

/// Reads one `\n`-terminated line from `reader`, retaining at most `cap`
/// bytes of it in `buf`. Bytes beyond `cap` are still scanned (via the
/// buffered reader's own internal buffer, so no extra allocation is
/// involved) to find the terminator, but are not copied into `buf` —
/// this is what lets [`DataReader::read_body`] enforce `max_size`
/// incrementally instead of buffering an entire unterminated line before
/// ever consulting the cap.
///
/// Returns `(bytes_consumed, truncated)`; `bytes_consumed == 0` means EOF
/// was reached with nothing read (mirrors `AsyncBufReadExt::read_until`).
async fn read_line_capped<R: AsyncBufReadExt + Unpin>(
    reader: &mut R,
    buf: &mut Vec<u8>,
    cap: usize,
) -> std::io::Result<(usize, bool)> {
    let mut total = 0usize;
    let mut truncated = false;

    loop {
        let available = reader.fill_buf().await?;
        if available.is_empty() {
            return Ok((total, truncated));
        }

        let newline_at = available.iter().position(|&b| b == b'\n');
        let chunk_len = newline_at.map(|pos| pos + 1).unwrap_or(available.len());

        if !truncated {
            let room = cap.saturating_sub(buf.len());
            let take = chunk_len.min(room);
            buf.extend_from_slice(&available[..take]);
            if take < chunk_len {
                truncated = true;
            }
        }

        total += chunk_len;
        reader.consume(chunk_len);

        if newline_at.is_some() {
            return Ok((total, truncated));
        }
    }
}
