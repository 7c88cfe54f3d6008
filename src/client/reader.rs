//! Newline framing over an async byte stream
//!
//! [`LineReader`] keeps every partially received line in its own buffer, so
//! a pending [`LineReader::next_line`] can be dropped (for example by a
//! `select!` on shutdown) without losing data.

use std::pin::Pin;
use std::task::{Context, Poll, ready};

use futures_util::io::{AsyncBufRead, BufReader};

use crate::{
    Result,
    error::{DecodeError, GpsdError},
};

/// Default upper bound for a single line, in bytes
///
/// Comfortably above the largest sentence gpsd emits (a full SKY report).
pub const DEFAULT_MAX_LINE_LEN: usize = 16 * 1024;

/// Splits an async byte stream into text lines
///
/// Lines are returned without their terminator (`\n` or `\r\n`); blank lines
/// are skipped. The end of the stream is reported as
/// [`GpsdError::ConnectionClosed`]. If the stream ends in the middle of a line
/// the partial data is reported first as [`DecodeError::TruncatedLine`].
#[derive(Debug)]
pub struct LineReader<R> {
    reader: BufReader<R>,
    buf: Vec<u8>,
    max_line_len: usize,
    discarding: bool,
    eof: bool,
}

impl<R> LineReader<R>
where
    R: futures_io::AsyncRead + Unpin,
{
    /// Wraps `reader` with the default line limit
    pub fn new(reader: R) -> Self {
        Self::with_max_line_len(reader, DEFAULT_MAX_LINE_LEN)
    }

    /// Wraps `reader`, discarding lines longer than `max_line_len` bytes
    pub fn with_max_line_len(reader: R, max_line_len: usize) -> Self {
        LineReader {
            reader: BufReader::new(reader),
            buf: Vec::new(),
            max_line_len,
            discarding: false,
            eof: false,
        }
    }

    /// Waits for the next complete line
    pub fn next_line(&mut self) -> impl std::future::Future<Output = Result<String>> + '_ {
        futures_util::future::poll_fn(|cx| self.poll_next_line(cx))
    }

    /// Polls for the next complete line
    pub fn poll_next_line(&mut self, cx: &mut Context<'_>) -> Poll<Result<String>> {
        loop {
            if self.eof {
                let len = self.buf.len();
                self.buf.clear();
                self.discarding = false;
                if len > 0 {
                    return Poll::Ready(Err(DecodeError::TruncatedLine { len }.into()));
                }
                return Poll::Ready(Err(GpsdError::ConnectionClosed));
            }

            let available = ready!(Pin::new(&mut self.reader).poll_fill_buf(cx))?;
            if available.is_empty() {
                self.eof = true;
                continue;
            }

            let newline = available.iter().position(|&b| b == b'\n');
            let take = newline.map_or(available.len(), |pos| pos + 1);
            if !self.discarding {
                let end = newline.unwrap_or(available.len());
                self.buf.extend_from_slice(&available[..end]);
            }
            Pin::new(&mut self.reader).consume(take);

            if newline.is_none() {
                if !self.discarding && self.buf.len() > self.max_line_len {
                    self.buf.clear();
                    self.discarding = true;
                    return Poll::Ready(Err(DecodeError::LineTooLong {
                        limit: self.max_line_len,
                    }
                    .into()));
                }
                continue;
            }

            if self.discarding {
                // the oversized line was reported when the limit was crossed
                self.discarding = false;
                continue;
            }

            let line = std::mem::take(&mut self.buf);
            if line.len() > self.max_line_len {
                return Poll::Ready(Err(DecodeError::LineTooLong {
                    limit: self.max_line_len,
                }
                .into()));
            }
            match finish_line(line) {
                Some(result) => return Poll::Ready(result),
                None => continue,
            }
        }
    }

    /// Returns the underlying reader, dropping any buffered data
    pub fn into_inner(self) -> R {
        self.reader.into_inner()
    }
}

/// Strips the `\r` of a CRLF terminator and validates UTF-8
///
/// Returns `None` for blank lines.
fn finish_line(mut line: Vec<u8>) -> Option<Result<String>> {
    if line.last() == Some(&b'\r') {
        line.pop();
    }
    if line.iter().all(u8::is_ascii_whitespace) {
        return None;
    }
    Some(String::from_utf8(line).map_err(|_| DecodeError::InvalidUtf8.into()))
}

impl<R> futures_util::Stream for LineReader<R>
where
    R: futures_io::AsyncRead + Unpin,
{
    type Item = Result<String>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        match self.get_mut().poll_next_line(cx) {
            Poll::Ready(Err(GpsdError::ConnectionClosed)) => Poll::Ready(None),
            Poll::Ready(item) => Poll::Ready(Some(item)),
            Poll::Pending => Poll::Pending,
        }
    }
}
