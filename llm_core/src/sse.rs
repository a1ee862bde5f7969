//! Server-sent events decoding for provider streams.
//!
//! Providers frame their streaming output as SSE blocks separated by a blank
//! line. Network chunks do not respect block boundaries, so the decoder keeps
//! the unterminated tail between pushes.

use std::time::Duration;

use futures::StreamExt;
use tracing::{debug, warn};

use crate::error::LlmError;
use crate::provider::DeltaStream;

/// One decoded SSE block.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SseEvent {
    pub event: Option<String>,
    pub data: String,
}

#[derive(Debug, Default)]
pub struct SseDecoder {
    buf: Vec<u8>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw bytes and return every block completed by them.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buf.extend(chunk.iter().copied().filter(|b| *b != b'\r'));

        let mut events = Vec::new();
        while let Some(pos) = find_blank_line(&self.buf) {
            let block: Vec<u8> = self.buf.drain(..pos + 2).collect();
            if let Some(event) = parse_block(&block[..pos]) {
                events.push(event);
            }
        }
        events
    }

    /// Decode whatever is left once the body ended without a final blank line.
    pub fn finish(&mut self) -> Option<SseEvent> {
        let rest = std::mem::take(&mut self.buf);
        parse_block(&rest)
    }
}

fn find_blank_line(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\n\n")
}

fn parse_block(block: &[u8]) -> Option<SseEvent> {
    let text = String::from_utf8_lossy(block);
    let mut event = None;
    let mut data: Vec<&str> = Vec::new();

    for line in text.lines() {
        if line.is_empty() || line.starts_with(':') {
            continue;
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "event" => event = Some(value.to_string()),
            "data" => data.push(value),
            _ => {}
        }
    }

    if event.is_none() && data.is_empty() {
        return None;
    }
    Some(SseEvent {
        event,
        data: data.join("\n"),
    })
}

/// Classification of one provider event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Parsed {
    /// Text-bearing event.
    Delta(String),
    /// Structural wrapper event (block start/stop, pings, usage) or a
    /// malformed payload that was logged.
    Skip,
    Done,
    Failed(String),
}

/// Turn a streaming HTTP response into ordered deltas using a provider
/// specific event classifier.
///
/// A body that stays silent for longer than `idle` ends the stream with
/// [`LlmError::Timeout`].
pub(crate) fn delta_stream(
    resp: reqwest::Response,
    provider: &'static str,
    idle: Duration,
    classify: fn(&SseEvent) -> Parsed,
) -> DeltaStream {
    let mut body = resp.bytes_stream();

    let stream = async_stream::stream! {
        let mut decoder = SseDecoder::new();
        let mut done = false;

        while !done {
            let next = match tokio::time::timeout(idle, body.next()).await {
                Ok(next) => next,
                Err(_) => {
                    warn!(provider, ?idle, "generation stream stalled");
                    yield Err(LlmError::Timeout(idle));
                    return;
                }
            };
            let chunk = match next {
                Some(Ok(chunk)) => chunk,
                Some(Err(e)) => {
                    yield Err(LlmError::Transport(e));
                    return;
                }
                None => break,
            };

            for event in decoder.push(&chunk) {
                match classify(&event) {
                    Parsed::Delta(text) => yield Ok(text),
                    Parsed::Skip => {}
                    Parsed::Done => {
                        done = true;
                        break;
                    }
                    Parsed::Failed(message) => {
                        yield Err(LlmError::Provider(message));
                        return;
                    }
                }
            }
        }

        if !done {
            if let Some(event) = decoder.finish() {
                match classify(&event) {
                    Parsed::Delta(text) => yield Ok(text),
                    Parsed::Failed(message) => yield Err(LlmError::Provider(message)),
                    Parsed::Skip | Parsed::Done => {}
                }
            }
        }
        debug!(provider, "generation stream finished");
    };

    Box::pin(stream)
}
