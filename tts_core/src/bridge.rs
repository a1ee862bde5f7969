//! Speech Synthesis Stream Bridge.
//!
//! Feeds completed sentences to the synthesis provider over one ordered
//! connection and hands audio and timing back as it arrives. Lifecycle per
//! session:
//!
//! ```text
//! Idle -> Open -> Streaming -> Closing -> Closed
//!   \______\________\___________\-------> Error
//! ```

use std::collections::VecDeque;
use std::sync::Arc;

use futures::StreamExt;
use tracing::{debug, warn};

use crate::error::{Result, SynthesisError};
use crate::provider::{FrameStream, SynthesisFrame, SynthesisProvider, SynthesisSink, WordTiming};
use crate::text::clean_for_speech;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeState {
    Idle,
    Open,
    Streaming,
    Closing,
    Closed,
    Error,
}

impl BridgeState {
    pub fn is_terminal(self) -> bool {
        matches!(self, BridgeState::Closed | BridgeState::Error)
    }

    fn can_transition(self, to: BridgeState) -> bool {
        use BridgeState::*;
        match (self, to) {
            (from, Error) => !from.is_terminal(),
            (Idle, Open) | (Idle, Closed) => true,
            (Open, Streaming) | (Streaming, Streaming) => true,
            (Open, Closing) | (Streaming, Closing) => true,
            (Closing, Closed) => true,
            _ => false,
        }
    }
}

/// Synthesized audio with its position in the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFrame {
    pub ordinal: u64,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeOutput {
    Audio(AudioFrame),
    Timing(WordTiming),
    /// Provider flushed everything after end-of-input.
    Closed,
}

pub struct SynthesisBridge {
    provider: Arc<dyn SynthesisProvider>,
    wants_timing: bool,
    state: BridgeState,
    sink: Option<Box<dyn SynthesisSink>>,
    frames: Option<FrameStream>,
    pending: VecDeque<BridgeOutput>,
    next_ordinal: u64,
    /// Session offset that chunk-relative timings are shifted by.
    timeline_ms: u64,
    last_start_ms: u64,
    sentences_sent: usize,
}

impl SynthesisBridge {
    pub fn new(provider: Arc<dyn SynthesisProvider>, wants_timing: bool) -> Self {
        Self {
            provider,
            wants_timing,
            state: BridgeState::Idle,
            sink: None,
            frames: None,
            pending: VecDeque::new(),
            next_ordinal: 0,
            timeline_ms: 0,
            last_start_ms: 0,
            sentences_sent: 0,
        }
    }

    pub fn state(&self) -> BridgeState {
        self.state
    }

    pub fn sentences_sent(&self) -> usize {
        self.sentences_sent
    }

    fn transition(&mut self, to: BridgeState) -> Result<()> {
        if !self.state.can_transition(to) {
            return Err(SynthesisError::InvalidTransition { from: self.state, to });
        }
        debug!(from = ?self.state, to = ?to, "synthesis bridge transition");
        self.state = to;
        Ok(())
    }

    fn fail(&mut self) {
        if !self.state.is_terminal() {
            self.state = BridgeState::Error;
        }
        self.sink = None;
        self.frames = None;
        self.pending.clear();
    }

    /// Send one sentence, opening the connection on the first call.
    pub async fn submit(&mut self, sentence: &str) -> Result<()> {
        if self.state == BridgeState::Idle {
            match self.provider.connect(self.wants_timing).await {
                Ok((sink, frames)) => {
                    self.sink = Some(sink);
                    self.frames = Some(frames);
                    self.transition(BridgeState::Open)?;
                }
                Err(e) => {
                    warn!(provider = self.provider.name(), error = %e, "synthesis connect failed");
                    self.fail();
                    return Err(e);
                }
            }
        }
        self.transition(BridgeState::Streaming)?;

        let text = clean_for_speech(sentence);
        let Some(sink) = self.sink.as_mut() else {
            return Err(SynthesisError::UnexpectedClose("synthesis sink missing".into()));
        };
        if let Err(e) = sink.send_text(&text).await {
            self.fail();
            return Err(e);
        }
        self.sentences_sent += 1;
        Ok(())
    }

    /// Signal end-of-input. With nothing submitted the bridge closes at once.
    pub async fn finish(&mut self) -> Result<()> {
        if self.state == BridgeState::Idle {
            return self.transition(BridgeState::Closed);
        }
        self.transition(BridgeState::Closing)?;

        let Some(sink) = self.sink.as_mut() else {
            return Err(SynthesisError::UnexpectedClose("synthesis sink missing".into()));
        };
        if let Err(e) = sink.end_input().await {
            self.fail();
            return Err(e);
        }
        Ok(())
    }

    /// Next audio/timing output. Returns `None` while no connection exists,
    /// which lets callers disable this source in a `select!`.
    pub async fn next_output(&mut self) -> Option<Result<BridgeOutput>> {
        loop {
            if let Some(out) = self.pending.pop_front() {
                return Some(Ok(out));
            }
            let frames = self.frames.as_mut()?;

            match frames.next().await {
                Some(Ok(SynthesisFrame::Audio(data))) => {
                    let ordinal = self.next_ordinal;
                    self.next_ordinal += 1;
                    return Some(Ok(BridgeOutput::Audio(AudioFrame { ordinal, data })));
                }
                Some(Ok(SynthesisFrame::Timing(words))) => self.queue_timings(words),
                Some(Ok(SynthesisFrame::Final)) => {
                    if self.state == BridgeState::Closing {
                        return Some(self.close());
                    }
                    debug!("ignoring final acknowledgment before end of input");
                }
                Some(Err(e)) => {
                    self.fail();
                    return Some(Err(e));
                }
                None if self.state == BridgeState::Closing => return Some(self.close()),
                None => {
                    self.fail();
                    return Some(Err(SynthesisError::UnexpectedClose(
                        "provider closed the stream before end of input".into(),
                    )));
                }
            }
        }
    }

    fn close(&mut self) -> Result<BridgeOutput> {
        self.transition(BridgeState::Closed)?;
        self.sink = None;
        self.frames = None;
        Ok(BridgeOutput::Closed)
    }

    fn queue_timings(&mut self, words: Vec<WordTiming>) {
        if !self.wants_timing {
            return;
        }
        let base = self.timeline_ms;
        let mut chunk_end = base;
        for word in words {
            let start = (base + word.start_ms).max(self.last_start_ms);
            let end = (base + word.end_ms).max(start);
            self.last_start_ms = start;
            chunk_end = chunk_end.max(end);
            self.pending.push_back(BridgeOutput::Timing(WordTiming {
                text: word.text,
                start_ms: start,
                end_ms: end,
            }));
        }
        self.timeline_ms = chunk_end;
    }

    /// Tear the connection down without waiting for the provider.
    pub fn abort(&mut self) {
        if self.sink.is_some() || self.frames.is_some() {
            debug!(sentences = self.sentences_sent, "aborting synthesis connection");
        }
        self.sink = None;
        self.frames = None;
        self.pending.clear();
        if !self.state.is_terminal() {
            self.state = BridgeState::Closed;
        }
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use tokio::sync::mpsc;

    use super::*;
    use crate::provider::FrameStream;

    /// Echo provider: two audio frames and one timing batch per sentence,
    /// `Final` after end-of-input.
    struct EchoProvider;

    struct EchoSink {
        tx: mpsc::UnboundedSender<Option<String>>,
    }

    #[async_trait]
    impl SynthesisSink for EchoSink {
        async fn send_text(&mut self, text: &str) -> Result<()> {
            self.tx
                .send(Some(text.to_string()))
                .map_err(|_| SynthesisError::Provider("gone".into()))
        }

        async fn end_input(&mut self) -> Result<()> {
            self.tx.send(None).map_err(|_| SynthesisError::Provider("gone".into()))
        }
    }

    #[async_trait]
    impl SynthesisProvider for EchoProvider {
        async fn connect(
            &self,
            _wants_timing: bool,
        ) -> Result<(Box<dyn SynthesisSink>, FrameStream)> {
            let (tx, mut rx) = mpsc::unbounded_channel::<Option<String>>();
            let frames = async_stream::stream! {
                while let Some(msg) = rx.recv().await {
                    match msg {
                        Some(text) => {
                            yield Ok(SynthesisFrame::Audio(format!("{text}#0").into_bytes()));
                            let word = WordTiming { text: text.clone(), start_ms: 0, end_ms: 100 };
                            yield Ok(SynthesisFrame::Timing(vec![word]));
                            yield Ok(SynthesisFrame::Audio(format!("{text}#1").into_bytes()));
                        }
                        None => {
                            yield Ok(SynthesisFrame::Final);
                            return;
                        }
                    }
                }
            };
            Ok((Box::new(EchoSink { tx }), Box::pin(frames)))
        }

        fn name(&self) -> &'static str {
            "echo"
        }
    }

    async fn drain(bridge: &mut SynthesisBridge) -> Vec<BridgeOutput> {
        let mut out = Vec::new();
        while let Some(next) = bridge.next_output().await {
            let next = next.unwrap();
            let done = next == BridgeOutput::Closed;
            out.push(next);
            if done {
                break;
            }
        }
        out
    }

    #[tokio::test]
    async fn test_lifecycle_and_ordering() {
        let mut bridge = SynthesisBridge::new(Arc::new(EchoProvider), true);
        assert_eq!(bridge.state(), BridgeState::Idle);

        bridge.submit("One.").await.unwrap();
        assert_eq!(bridge.state(), BridgeState::Streaming);
        bridge.submit("Two.").await.unwrap();
        bridge.finish().await.unwrap();
        assert_eq!(bridge.state(), BridgeState::Closing);

        let out = drain(&mut bridge).await;
        assert_eq!(bridge.state(), BridgeState::Closed);

        let audio: Vec<String> = out
            .iter()
            .filter_map(|o| match o {
                BridgeOutput::Audio(f) => Some(String::from_utf8(f.data.clone()).unwrap()),
                _ => None,
            })
            .collect();
        assert_eq!(audio, vec!["One.#0", "One.#1", "Two.#0", "Two.#1"]);

        let ordinals: Vec<u64> = out
            .iter()
            .filter_map(|o| match o {
                BridgeOutput::Audio(f) => Some(f.ordinal),
                _ => None,
            })
            .collect();
        assert_eq!(ordinals, vec![0, 1, 2, 3]);
        assert_eq!(out.last(), Some(&BridgeOutput::Closed));
    }

    #[tokio::test]
    async fn test_timings_are_monotonic_across_chunks() {
        let mut bridge = SynthesisBridge::new(Arc::new(EchoProvider), true);
        bridge.submit("One.").await.unwrap();
        bridge.submit("Two.").await.unwrap();
        bridge.finish().await.unwrap();

        let timings: Vec<WordTiming> = drain(&mut bridge)
            .await
            .into_iter()
            .filter_map(|o| match o {
                BridgeOutput::Timing(t) => Some(t),
                _ => None,
            })
            .collect();
        assert_eq!(timings.len(), 2);
        assert_eq!((timings[0].start_ms, timings[0].end_ms), (0, 100));
        assert_eq!((timings[1].start_ms, timings[1].end_ms), (100, 200));
    }

    #[tokio::test]
    async fn test_finish_without_sentences_closes_immediately() {
        let mut bridge = SynthesisBridge::new(Arc::new(EchoProvider), false);
        bridge.finish().await.unwrap();
        assert_eq!(bridge.state(), BridgeState::Closed);
        assert!(bridge.next_output().await.is_none());
    }

    #[tokio::test]
    async fn test_submit_after_finish_is_rejected() {
        let mut bridge = SynthesisBridge::new(Arc::new(EchoProvider), false);
        bridge.submit("One.").await.unwrap();
        bridge.finish().await.unwrap();
        let err = bridge.submit("Late.").await.unwrap_err();
        assert!(matches!(
            err,
            SynthesisError::InvalidTransition {
                from: BridgeState::Closing,
                to: BridgeState::Streaming,
            }
        ));
    }

    #[tokio::test]
    async fn test_abort_tears_down() {
        let mut bridge = SynthesisBridge::new(Arc::new(EchoProvider), false);
        bridge.submit("One.").await.unwrap();
        bridge.abort();
        assert_eq!(bridge.state(), BridgeState::Closed);
        assert!(bridge.next_output().await.is_none());
    }

    #[test]
    fn test_error_reachable_from_non_terminal_states() {
        for state in [
            BridgeState::Idle,
            BridgeState::Open,
            BridgeState::Streaming,
            BridgeState::Closing,
        ] {
            assert!(state.can_transition(BridgeState::Error));
        }
        assert!(!BridgeState::Closed.can_transition(BridgeState::Error));
        assert!(!BridgeState::Closed.can_transition(BridgeState::Open));
    }
}
