//! Common utilities for integration tests

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chat_stream::WireEvent;
use futures_util::StreamExt;
use llm_core::{
    ChatMessage, DeltaStream, GenerationAdapter, GenerationProvider, LlmError, RetryPolicy,
};
use server::app::{build_router, AppState};
use server::config::ServerConfig;
use server::metrics::PipelineMetrics;
use server::pipeline::PipelineDeps;
use server::store::MemoryStore;
use tokio::sync::{mpsc, Notify};
use tts_core::{
    FrameStream, SynthesisError, SynthesisFrame, SynthesisProvider, SynthesisSink, WordTiming,
};

/// Sets the flag when dropped; lets tests observe that a stream was torn down.
pub struct DropFlag(pub Arc<AtomicBool>);

impl Drop for DropFlag {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone)]
pub enum Step {
    Delta(&'static str),
    Fail(&'static str),
    /// Notify `hang_reached`, then never yield again.
    Hang,
}

/// Generation provider replaying a fixed script of deltas.
pub struct ScriptedGeneration {
    pub script: Vec<Step>,
    pub open_error: Option<fn() -> LlmError>,
    pub full_reply: Result<&'static str, &'static str>,
    pub opens: AtomicU32,
    pub stream_dropped: Arc<AtomicBool>,
    pub hang_reached: Arc<Notify>,
}

impl ScriptedGeneration {
    pub fn new(script: Vec<Step>) -> Self {
        Self {
            script,
            open_error: None,
            full_reply: Ok("Full reply."),
            opens: AtomicU32::new(0),
            stream_dropped: Arc::new(AtomicBool::new(false)),
            hang_reached: Arc::new(Notify::new()),
        }
    }

    pub fn deltas(deltas: &[&'static str]) -> Self {
        Self::new(deltas.iter().map(|d| Step::Delta(*d)).collect())
    }
}

#[async_trait]
impl GenerationProvider for ScriptedGeneration {
    async fn stream_generate(
        &self,
        _prompt: &str,
        _history: &[ChatMessage],
    ) -> llm_core::Result<DeltaStream> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.open_error {
            return Err(error());
        }

        let script = self.script.clone();
        let guard = DropFlag(self.stream_dropped.clone());
        let hang = self.hang_reached.clone();
        let stream = async_stream::stream! {
            let _guard = guard;
            for step in script {
                match step {
                    Step::Delta(text) => yield Ok(text.to_string()),
                    Step::Fail(message) => {
                        yield Err(LlmError::Provider(message.to_string()));
                        return;
                    }
                    Step::Hang => {
                        hang.notify_one();
                        futures_util::future::pending::<()>().await;
                    }
                }
            }
        };
        Ok(stream.boxed())
    }

    async fn generate(&self, _prompt: &str, _history: &[ChatMessage]) -> llm_core::Result<String> {
        self.full_reply
            .map(str::to_string)
            .map_err(|m| LlmError::Provider(m.to_string()))
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}

/// Synthesis provider answering every sentence with two audio frames and a
/// word timing, and `Final` after end-of-input.
#[derive(Default)]
pub struct MockSynthesis {
    pub fail_connect: bool,
    pub received: Arc<Mutex<Vec<String>>>,
}

struct MockSink {
    tx: mpsc::UnboundedSender<Option<String>>,
    received: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl SynthesisSink for MockSink {
    async fn send_text(&mut self, text: &str) -> tts_core::Result<()> {
        self.received.lock().unwrap().push(text.to_string());
        self.tx
            .send(Some(text.to_string()))
            .map_err(|_| SynthesisError::UnexpectedClose("mock closed".into()))
    }

    async fn end_input(&mut self) -> tts_core::Result<()> {
        self.tx
            .send(None)
            .map_err(|_| SynthesisError::UnexpectedClose("mock closed".into()))
    }
}

#[async_trait]
impl SynthesisProvider for MockSynthesis {
    async fn connect(
        &self,
        wants_timing: bool,
    ) -> tts_core::Result<(Box<dyn SynthesisSink>, FrameStream)> {
        if self.fail_connect {
            return Err(SynthesisError::Provider("connection refused".into()));
        }
        let (tx, mut rx) = mpsc::unbounded_channel::<Option<String>>();
        let frames = async_stream::stream! {
            while let Some(message) = rx.recv().await {
                let Some(text) = message else {
                    yield Ok(SynthesisFrame::Final);
                    return;
                };
                yield Ok(SynthesisFrame::Audio(format!("{text}#0").into_bytes()));
                if wants_timing {
                    let word = WordTiming { text: text.clone(), start_ms: 0, end_ms: 200 };
                    yield Ok(SynthesisFrame::Timing(vec![word]));
                }
                yield Ok(SynthesisFrame::Audio(format!("{text}#1").into_bytes()));
            }
        };
        let sink = MockSink { tx, received: self.received.clone() };
        Ok((Box::new(sink), frames.boxed()))
    }

    fn name(&self) -> &'static str {
        "mock-synthesis"
    }
}

pub struct Harness {
    pub deps: PipelineDeps,
    pub generation: Arc<ScriptedGeneration>,
    pub synthesis: Arc<MockSynthesis>,
    pub store: Arc<MemoryStore>,
    pub metrics: Arc<PipelineMetrics>,
}

pub fn harness(generation: ScriptedGeneration, synthesis: MockSynthesis) -> Harness {
    let generation = Arc::new(generation);
    let synthesis = Arc::new(synthesis);
    let store = Arc::new(MemoryStore::default());
    let metrics = Arc::new(PipelineMetrics::new());
    let deps = PipelineDeps {
        generation: GenerationAdapter::new(generation.clone()).with_retry(RetryPolicy {
            max_retries: 2,
            base_backoff: Duration::from_millis(1),
        }),
        synthesis: synthesis.clone(),
        store: store.clone(),
        metrics: metrics.clone(),
    };
    Harness { deps, generation, synthesis, store, metrics }
}

/// Create a test app instance backed by the given harness.
pub fn create_test_app(harness: &Harness) -> axum::Router {
    let state = AppState::new(harness.deps.clone(), ServerConfig::default());
    build_router(state).expect("router")
}

pub fn drain(rx: &mut mpsc::Receiver<WireEvent>) -> Vec<WireEvent> {
    let mut out = Vec::new();
    while let Ok(event) = rx.try_recv() {
        out.push(event);
    }
    out
}

/// Parse an SSE response body into wire events.
pub fn parse_sse(body: &[u8]) -> Vec<WireEvent> {
    let mut decoder = chat_stream::FrameDecoder::new();
    let mut events: Vec<WireEvent> = decoder.push(body).into_iter().map(|e| e.unwrap()).collect();
    events.extend(decoder.finish().map(|e| e.unwrap()));
    events
}

pub fn audio_labels(events: &[WireEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|e| e.audio_bytes())
        .map(|bytes| String::from_utf8(bytes.unwrap()).unwrap())
        .collect()
}
