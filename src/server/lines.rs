//! Newline framing for the read pump.
//!
//! Unlike `AsyncBufReadExt::lines`, a bad line is reported and skipped rather
//! than ending the stream, and a line can never grow past `max_len` bytes.

use std::io;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};

use crate::error::{RelayError, Result};

pub struct LineReader<R> {
    inner: BufReader<R>,
    buf: Vec<u8>,
    max_len: usize,
    /// Set after an overlong line until its terminating newline is consumed.
    discarding: bool,
}

impl<R: AsyncRead + Unpin> LineReader<R> {
    pub fn new(reader: R, max_len: usize) -> Self {
        Self {
            inner: BufReader::new(reader),
            buf: Vec::new(),
            max_len: max_len.max(1),
            discarding: false,
        }
    }

    /// Next line without its `\n` (or `\r\n`).
    ///
    /// The outer `Result` is the socket; `Ok(None)` means the peer closed.
    /// The inner one is the line itself: not UTF-8, or longer than `max_len`.
    ///
    /// Cancel safe: partially read bytes stay buffered for the next call.
    pub async fn next_line(&mut self) -> io::Result<Option<Result<String>>> {
        loop {
            // Invariant: buf.len() <= max_len here, so the limit is at least 1.
            let limit = (self.max_len + 1 - self.buf.len()) as u64;
            let n = (&mut self.inner).take(limit).read_until(b'\n', &mut self.buf).await?;

            if n == 0 {
                if self.buf.is_empty() || self.discarding {
                    return Ok(None);
                }
                // Unterminated last line before EOF.
                let line = std::mem::take(&mut self.buf);
                return Ok(Some(decode(line)));
            }

            if self.buf.last() == Some(&b'\n') {
                let line = std::mem::take(&mut self.buf);
                if std::mem::take(&mut self.discarding) {
                    continue;
                }
                return Ok(Some(decode(line)));
            }

            if self.buf.len() > self.max_len {
                self.buf.clear();
                if !self.discarding {
                    self.discarding = true;
                    return Ok(Some(Err(RelayError::LineTooLong { max: self.max_len })));
                }
            }
        }
    }
}

fn decode(mut line: Vec<u8>) -> Result<String> {
    if line.last() == Some(&b'\n') {
        line.pop();
        if line.last() == Some(&b'\r') {
            line.pop();
        }
    }
    String::from_utf8(line).map_err(|_| RelayError::InvalidUtf8)
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn collect(input: &[u8], max_len: usize) -> Vec<Result<String>> {
        let mut reader = LineReader::new(input, max_len);
        let mut out = Vec::new();
        while let Some(line) = reader.next_line().await.unwrap() {
            out.push(line);
        }
        out
    }

    fn ok(lines: &[Result<String>]) -> Vec<Option<&str>> {
        lines.iter().map(|l| l.as_ref().ok().map(String::as_str)).collect()
    }

    #[tokio::test]
    async fn splits_on_newlines_and_strips_cr() {
        let lines = collect(b"one\r\ntwo\n\nlast", 64).await;
        assert_eq!(ok(&lines), vec![Some("one"), Some("two"), Some(""), Some("last")]);
    }

    #[tokio::test]
    async fn invalid_utf8_is_reported_and_skipped() {
        let lines = collect(b"\xff\xfe garbage\nnext\n", 64).await;
        assert!(matches!(lines[0], Err(RelayError::InvalidUtf8)));
        assert_eq!(ok(&lines[1..]), vec![Some("next")]);
    }

    #[tokio::test]
    async fn overlong_line_is_reported_once_and_discarded() {
        let mut input = vec![b'x'; 100];
        input.extend_from_slice(b"\nok\n");
        let lines = collect(&input, 8).await;
        assert_eq!(lines.len(), 2);
        assert!(matches!(lines[0], Err(RelayError::LineTooLong { max: 8 })));
        assert_eq!(ok(&lines[1..]), vec![Some("ok")]);
    }

    #[tokio::test]
    async fn line_of_exactly_max_len_is_accepted() {
        let lines = collect(b"12345678\n123456789\n", 8).await;
        assert_eq!(lines[0].as_deref().ok(), Some("12345678"));
        assert!(matches!(lines[1], Err(RelayError::LineTooLong { .. })));
        assert_eq!(lines.len(), 2);
    }

    #[tokio::test]
    async fn overlong_tail_without_newline_ends_quietly() {
        let lines = collect(&[b'x'; 50], 8).await;
        assert_eq!(lines.len(), 1);
        assert!(matches!(lines[0], Err(RelayError::LineTooLong { .. })));
    }
}
