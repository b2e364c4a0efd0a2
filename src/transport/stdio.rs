//! Line-delimited JSON transport over stdin/stdout.
//!
//! Each JSON-RPC message is a single line terminated by `\n`. Input arrives
//! in arbitrary chunks; [`LineFramer`] reassembles complete lines. Lines are
//! handled one at a time, so responses leave in request order.

use std::time::Duration;

use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{info, trace};

use super::{dispatch, oversized, Dispatch};
use crate::config::DEFAULT_MAX_MESSAGE_BYTES;
use crate::error::TransportError;
use crate::mcp::RequestRouter;

const READ_CHUNK: usize = 8 * 1024;

/// One unit produced by [`LineFramer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// A complete, non-blank line without its terminator.
    Line(Vec<u8>),
    /// A line grew past the limit; its bytes were discarded.
    Oversized,
}

/// Accumulates bytes and yields complete, non-blank lines.
///
/// A line longer than `max_line` is reported once as [`Frame::Oversized`]
/// and skipped up to its newline, so the buffer never exceeds the limit.
#[derive(Debug)]
pub struct LineFramer {
    buffer: Vec<u8>,
    max_line: usize,
    discarding: bool,
}

impl Default for LineFramer {
    fn default() -> Self {
        Self::with_limit(DEFAULT_MAX_MESSAGE_BYTES)
    }
}

impl LineFramer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limit(max_line: usize) -> Self {
        Self {
            buffer: Vec::new(),
            max_line,
            discarding: false,
        }
    }

    /// Appends `chunk` and returns every frame it completed.
    ///
    /// The trailing, unterminated segment stays buffered for the next call.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Frame> {
        let mut frames = Vec::new();
        let mut rest = chunk;

        while let Some(pos) = rest.iter().position(|b| *b == b'\n') {
            let head = &rest[..pos];
            rest = &rest[pos + 1..];

            if self.discarding {
                self.discarding = false;
                continue;
            }
            if self.buffer.len() + head.len() > self.max_line {
                self.buffer.clear();
                frames.push(Frame::Oversized);
                continue;
            }
            self.buffer.extend_from_slice(head);
            let line = std::mem::take(&mut self.buffer);
            if let Some(line) = trim_line(&line) {
                frames.push(Frame::Line(line));
            }
        }

        if self.discarding {
            return frames;
        }
        if self.buffer.len() + rest.len() > self.max_line {
            self.buffer.clear();
            self.discarding = true;
            frames.push(Frame::Oversized);
        } else {
            self.buffer.extend_from_slice(rest);
        }
        frames
    }

    /// Takes whatever is left once the input has ended.
    pub fn finish(&mut self) -> Option<Vec<u8>> {
        let rest = std::mem::take(&mut self.buffer);
        if std::mem::take(&mut self.discarding) {
            return None;
        }
        trim_line(&rest)
    }

    /// Bytes waiting for a newline.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }
}

/// Strips surrounding ASCII whitespace (including `\r`); blank lines vanish.
fn trim_line(bytes: &[u8]) -> Option<Vec<u8>> {
    let start = bytes.iter().position(|b| !b.is_ascii_whitespace())?;
    let end = bytes.iter().rposition(|b| !b.is_ascii_whitespace())?;
    Some(bytes[start..=end].to_vec())
}

/// Reads JSON-RPC messages from a byte stream, writes responses as lines.
///
/// Generic over reader/writer for testability; the binary uses
/// `tokio::io::stdin()` and `tokio::io::stdout()`.
pub struct StdioTransport<R, W> {
    reader: R,
    writer: W,
    framer: LineFramer,
    router: RequestRouter,
    timeout: Duration,
}

impl<R, W> StdioTransport<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    pub fn new(reader: R, writer: W, router: RequestRouter, timeout: Duration) -> Self {
        Self {
            reader,
            writer,
            framer: LineFramer::new(),
            router,
            timeout,
        }
    }

    /// Replaces the per-line size limit.
    pub fn with_max_message_bytes(mut self, limit: usize) -> Self {
        self.framer = LineFramer::with_limit(limit);
        self
    }

    /// Serves until end of input, which is a normal shutdown.
    pub async fn run(&mut self) -> Result<(), TransportError> {
        info!("MCP server listening on stdio");
        let mut chunk = vec![0u8; READ_CHUNK];

        loop {
            let read = self
                .reader
                .read(&mut chunk)
                .await
                .map_err(TransportError::Read)?;

            if read == 0 {
                if let Some(line) = self.framer.finish() {
                    self.handle_frame(Frame::Line(line)).await?;
                }
                info!("stdin closed, shutting down");
                return Ok(());
            }

            trace!(bytes = read, pending = self.framer.pending(), "read chunk");
            for frame in self.framer.push(&chunk[..read]) {
                self.handle_frame(frame).await?;
            }
        }
    }

    async fn handle_frame(&mut self, frame: Frame) -> Result<(), TransportError> {
        let outcome = match frame {
            Frame::Line(line) => dispatch(&self.router, &line, self.timeout).await,
            Frame::Oversized => oversized(self.framer.max_line),
        };
        match outcome {
            Dispatch::Success(envelope) | Dispatch::Failure(envelope) => {
                self.write_line(&envelope).await
            }
            Dispatch::Notification => Ok(()),
        }
    }

    /// Writes one envelope followed by `\n` and flushes.
    async fn write_line(&mut self, message: &Value) -> Result<(), TransportError> {
        let mut bytes =
            serde_json::to_vec(message).map_err(|e| TransportError::Write(e.into()))?;
        bytes.push(b'\n');
        trace!(len = bytes.len(), "writing message");

        self.writer
            .write_all(&bytes)
            .await
            .map_err(TransportError::Write)?;
        self.writer.flush().await.map_err(TransportError::Write)?;
        Ok(())
    }

    /// Returns the writer, e.g. to inspect output in tests.
    pub fn into_writer(self) -> W {
        self.writer
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(text: &str) -> Frame {
        Frame::Line(text.as_bytes().to_vec())
    }

    #[test]
    fn framer_holds_partial_line() {
        let mut framer = LineFramer::new();
        assert!(framer.push(b"{\"id\":").is_empty());
        assert_eq!(framer.pending(), 6);
        assert_eq!(framer.push(b"1}\n"), vec![line("{\"id\":1}")]);
        assert_eq!(framer.pending(), 0);
    }

    #[test]
    fn framer_splits_many_lines_and_skips_blanks() {
        let mut framer = LineFramer::new();
        let frames = framer.push(b"a\n\n  \r\nb\r\nc");
        assert_eq!(frames, vec![line("a"), line("b")]);
        assert_eq!(framer.finish(), Some(b"c".to_vec()));
        assert_eq!(framer.finish(), None);
    }

    #[test]
    fn framer_keeps_multibyte_chars_split_across_chunks() {
        let mut framer = LineFramer::new();
        let text = "\"héllo\"\n".as_bytes();
        let (a, b) = text.split_at(3);
        assert!(framer.push(a).is_empty());
        assert_eq!(framer.push(b), vec![line("\"héllo\"")]);
    }

    #[test]
    fn framer_passes_invalid_utf8_through_untouched() {
        let mut framer = LineFramer::new();
        assert_eq!(
            framer.push(b"{\"id\":\"\xFF\"}\n"),
            vec![Frame::Line(b"{\"id\":\"\xFF\"}".to_vec())]
        );
    }

    #[test]
    fn framer_reports_overlong_line_once_and_recovers() {
        let mut framer = LineFramer::with_limit(8);
        assert!(framer.push(b"0123").is_empty());
        assert_eq!(framer.push(b"456789abc"), vec![Frame::Oversized]);
        assert_eq!(framer.pending(), 0);

        assert!(framer.push(b"more junk without end").is_empty());
        assert_eq!(framer.pending(), 0);

        assert_eq!(framer.push(b"tail\nok\n"), vec![line("ok")]);
    }

    #[test]
    fn framer_reports_overlong_complete_line() {
        let mut framer = LineFramer::with_limit(4);
        assert_eq!(
            framer.push(b"123456\nabc\n"),
            vec![Frame::Oversized, line("abc")]
        );
    }

    #[test]
    fn framer_drops_overlong_tail_at_eof() {
        let mut framer = LineFramer::with_limit(4);
        assert_eq!(framer.push(b"123456"), vec![Frame::Oversized]);
        assert_eq!(framer.finish(), None);
    }
}
