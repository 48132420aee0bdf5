//! Wire framing for OpenAI-style chat completion streams.
//!
//! The response body is a sequence of newline-terminated lines. Lines that
//! start with `data: ` carry one JSON chunk:
//!
//! ```text
//! data: {"choices":[{"delta":{"content":"Hel"}}]}
//! data: {"choices":[{"delta":{"content":"lo"},"finish_reason":"stop"}]}
//! data: [DONE]
//! ```
//!
//! Chunks from the network do not respect line boundaries, so
//! [`FrameDecoder`] buffers bytes and only parses a line once its `\n` has
//! arrived.

use serde::Deserialize;

pub const DATA_PREFIX: &str = "data: ";

/// Finish reason that ends the stream.
const STOP_REASON: &str = "stop";

/// One unit decoded from the stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamFrame {
    /// A non-empty content fragment to append.
    Delta(String),
    /// Terminal signal; nothing after it is read.
    Stop,
    /// A `data: ` line whose payload is not a valid chunk. Carries the payload.
    Malformed(String),
}

#[derive(Deserialize)]
struct ChunkPayload {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    #[serde(default)]
    delta: Option<Delta>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct Delta {
    #[serde(default)]
    content: Option<String>,
}

/// Parse one complete line (without its terminator).
///
/// Returns no frames for lines that are not `data: ` lines, or whose chunk
/// has neither content nor a stop reason. A chunk with both yields the
/// `Delta` before the `Stop`.
pub fn parse_line(line: &str) -> Vec<StreamFrame> {
    let Some(payload) = line.strip_prefix(DATA_PREFIX) else {
        return Vec::new();
    };

    let chunk: ChunkPayload = match serde_json::from_str(payload) {
        Ok(chunk) => chunk,
        Err(_) => return vec![StreamFrame::Malformed(payload.to_string())],
    };

    let mut frames = Vec::new();
    if let Some(choice) = chunk.choices.into_iter().next() {
        if let Some(content) = choice.delta.and_then(|d| d.content)
            && !content.is_empty()
        {
            frames.push(StreamFrame::Delta(content));
        }
        if choice.finish_reason.as_deref() == Some(STOP_REASON) {
            frames.push(StreamFrame::Stop);
        }
    }
    frames
}

/// Incremental line splitter over raw response bytes.
///
/// Each decoder owns its buffer; one decoder per response.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: Vec<u8>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `chunk` and return the frames of every line it completed.
    ///
    /// A trailing partial line stays buffered until a later chunk terminates it.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<StreamFrame> {
        self.buf.extend_from_slice(chunk);

        let mut frames = Vec::new();
        let mut start = 0;
        while let Some(pos) = self.buf[start..].iter().position(|&b| b == b'\n') {
            let end = start + pos;
            // Lines are decoded whole, so multi-byte characters split across
            // chunks are reassembled before decoding.
            let text = String::from_utf8_lossy(&self.buf[start..end]);
            let line = text.strip_suffix('\r').unwrap_or(&text);
            frames.extend(parse_line(line));
            start = end + 1;
        }
        self.buf.drain(..start);
        frames
    }

    /// Bytes of the unterminated line currently buffered.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }
}
