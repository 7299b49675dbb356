//! Line framing for streamed HTTP bodies: server-sent events (`data: ...`)
//! and newline-delimited JSON.

use anyhow::{Context, Result};
use async_stream::try_stream;
use futures::StreamExt;
use futures::stream::BoxStream;

/// Splits a byte stream into lines. Bytes are buffered until a newline
/// arrives, so multi-byte characters split across network reads survive.
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    /// Appends bytes and returns every line completed by them, without the
    /// trailing `\n` or `\r\n`.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(bytes);
        let mut lines = Vec::new();
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            lines.push(decode_line(&line[..line.len() - 1]));
        }
        lines
    }

    /// Whatever is left once the body ends without a final newline.
    pub fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.pending);
        Some(decode_line(&rest))
    }
}

fn decode_line(bytes: &[u8]) -> String {
    let bytes = bytes.strip_suffix(b"\r").unwrap_or(bytes);
    String::from_utf8_lossy(bytes).into_owned()
}

#[derive(Debug, PartialEq, Eq)]
pub enum SseLine {
    Data(String),
    /// OpenAI-style `[DONE]` terminator.
    Done,
}

/// Interprets one event-stream line. Comments, blank lines and `event:` /
/// `id:` fields carry nothing we use.
pub fn parse_sse_line(line: &str) -> Option<SseLine> {
    let data = line.strip_prefix("data:")?;
    let data = data.strip_prefix(' ').unwrap_or(data);
    if data.trim() == "[DONE]" {
        return Some(SseLine::Done);
    }
    if data.trim().is_empty() {
        return None;
    }
    Some(SseLine::Data(data.to_string()))
}

/// The `data:` payloads of an event-stream response, ending at `[DONE]` or
/// at the end of the body.
pub fn data_events(response: reqwest::Response) -> BoxStream<'static, Result<String>> {
    Box::pin(try_stream! {
        let mut body = response.bytes_stream();
        let mut buffer = LineBuffer::default();
        let mut done = false;
        'read: while let Some(bytes) = body.next().await {
            let bytes = bytes.context("error reading event stream")?;
            for line in buffer.push(&bytes) {
                match parse_sse_line(&line) {
                    Some(SseLine::Data(payload)) => yield payload,
                    Some(SseLine::Done) => {
                        done = true;
                        break 'read;
                    }
                    None => {}
                }
            }
        }
        if !done {
            if let Some(SseLine::Data(payload)) = buffer.finish().as_deref().and_then(parse_sse_line) {
                yield payload;
            }
        }
    })
}

/// The non-empty lines of a newline-delimited JSON response.
pub fn json_lines(response: reqwest::Response) -> BoxStream<'static, Result<String>> {
    Box::pin(try_stream! {
        let mut body = response.bytes_stream();
        let mut buffer = LineBuffer::default();
        while let Some(bytes) = body.next().await {
            let bytes = bytes.context("error reading response stream")?;
            for line in buffer.push(&bytes) {
                if !line.trim().is_empty() {
                    yield line;
                }
            }
        }
        if let Some(line) = buffer.finish() {
            if !line.trim().is_empty() {
                yield line;
            }
        }
    })
}
