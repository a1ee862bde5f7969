//! Per-exchange session orchestration.
//!
//! One task per session multiplexes the generation deltas, the synthesis
//! bridge output, client disconnect and external cancellation. Completed
//! sentences go to the client as `chunk` events and, in voice mode, into the
//! synthesis bridge.
//!
//! Persistence of the assistant reply:
//! - generation completed: the full assembled message, even if synthesis or
//!   delivery failed afterwards;
//! - disconnect or cancellation before completion: the units emitted so far
//!   plus the flushed buffer;
//! - generation or synthesis failure before completion: nothing.

use std::sync::Arc;
use std::time::Instant;

use chat_stream::{Mode, Subtitle, WireEvent};
use futures_util::StreamExt;
use llm_core::{GenerationAdapter, LlmError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tts_core::{
    BridgeOutput, BridgeState, SentenceBuffer, SynthesisBridge, SynthesisError, SynthesisProvider,
};

use crate::channel::DeliveryChannel;
use crate::metrics::PipelineMetrics;
use crate::store::{ConversationStore, Sender};

pub const GENERATION_FAILED_MESSAGE: &str = "Generation failed. Please try again.";
pub const SYNTHESIS_FAILED_MESSAGE: &str = "Speech synthesis failed. Please try again.";
pub const CANCELLED_MESSAGE: &str = "The request was cancelled.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRequest {
    pub conversation_id: String,
    pub user_text: String,
    pub mode: Mode,
    pub wants_timing: bool,
}

/// Collaborators shared by every session.
#[derive(Clone)]
pub struct PipelineDeps {
    pub generation: GenerationAdapter,
    pub synthesis: Arc<dyn SynthesisProvider>,
    pub store: Arc<dyn ConversationStore>,
    pub metrics: Arc<PipelineMetrics>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOutcome {
    Completed,
    Failed,
    Disconnected,
    Cancelled,
}

struct Session<'a> {
    deps: &'a PipelineDeps,
    request: SessionRequest,
    channel: DeliveryChannel,
    segmenter: SentenceBuffer,
    bridge: Option<SynthesisBridge>,
    units: Vec<String>,
    assembled: Option<String>,
    generation_done: bool,
    started: Instant,
    first_chunk_sent: bool,
    synthesis_started: Option<Instant>,
}

/// Run one exchange to its terminal event and persist the reply.
pub async fn run_session(
    deps: &PipelineDeps,
    request: SessionRequest,
    channel: DeliveryChannel,
    cancel: CancellationToken,
) -> SessionOutcome {
    let started = Instant::now();
    deps.metrics.record_request();
    info!(
        conversation_id = %request.conversation_id,
        mode = request.mode.as_str(),
        wants_timing = request.wants_timing,
        message_len = request.user_text.len(),
        "chat session started"
    );

    let history = match deps.store.history(&request.conversation_id).await {
        Ok(history) => history,
        Err(e) => {
            warn!(conversation_id = %request.conversation_id, error = %e, "failed to load history");
            Vec::new()
        }
    };
    if let Err(e) = deps
        .store
        .save_message(&request.conversation_id, Sender::User, &request.user_text)
        .await
    {
        warn!(
            conversation_id = %request.conversation_id,
            error = %e,
            "failed to persist user message"
        );
    }

    let bridge = (request.mode == Mode::Voice)
        .then(|| SynthesisBridge::new(deps.synthesis.clone(), request.wants_timing));
    let mut session = Session {
        deps,
        request,
        channel,
        segmenter: SentenceBuffer::new(),
        bridge,
        units: Vec::new(),
        assembled: None,
        generation_done: false,
        started,
        first_chunk_sent: false,
        synthesis_started: None,
    };

    let generation_cancel = cancel.child_token();
    let opened = tokio::select! {
        _ = cancel.cancelled() => Err(SessionOutcome::Cancelled),
        _ = session.channel.disconnected() => Err(SessionOutcome::Disconnected),
        opened = deps.generation.open_cancellable(
            &session.request.user_text,
            &history,
            generation_cancel.clone(),
        ) => Ok(opened),
    };

    let outcome = match opened {
        Err(interrupted) => session.interrupt(interrupted).await,
        Ok(Err(e)) => {
            deps.metrics.generation.record_failure(started.elapsed());
            session.fail_generation(e).await
        }
        Ok(Ok(mut deltas)) => {
            let outcome = loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        break session.interrupt(SessionOutcome::Cancelled).await;
                    }
                    _ = session.channel.disconnected() => {
                        break session.interrupt(SessionOutcome::Disconnected).await;
                    }
                    delta = deltas.next(), if !session.generation_done => match delta {
                        Some(Ok(text)) => {
                            let units = session.segmenter.push(&text);
                            if let Err(outcome) = session.deliver(units).await {
                                break outcome;
                            }
                        }
                        Some(Err(e)) => {
                            deps.metrics.generation.record_failure(started.elapsed());
                            break session.fail_generation(e).await;
                        }
                        None => {
                            deps.metrics.generation.record_success(started.elapsed());
                            match session.generation_completed().await {
                                Ok(true) => break session.complete().await,
                                Ok(false) => {}
                                Err(outcome) => break outcome,
                            }
                        }
                    },
                    Some(output) = next_bridge_output(&mut session.bridge) => {
                        match session.on_bridge_output(output).await {
                            Ok(true) => break session.complete().await,
                            Ok(false) => {}
                            Err(outcome) => break outcome,
                        }
                    }
                }
            };
            // Dropping the stream aborts the upstream call if it is still running.
            generation_cancel.cancel();
            drop(deltas);
            outcome
        }
    };

    if let Some(bridge) = session.bridge.as_mut() {
        bridge.abort();
    }

    let persist = session.assembled.take().filter(|text| !text.is_empty()).map(|text| {
        let store = deps.store.clone();
        let conversation_id = session.request.conversation_id.clone();
        tokio::spawn(async move {
            if let Err(e) = store.save_message(&conversation_id, Sender::Assistant, &text).await {
                error!(
                    conversation_id = %conversation_id,
                    error = %e,
                    "failed to persist assistant message"
                );
            }
        })
    });
    if let Some(handle) = persist {
        if let Err(e) = handle.await {
            error!(error = %e, "persistence task panicked");
        }
    }

    deps.metrics.record_outcome(outcome);
    info!(
        conversation_id = %session.request.conversation_id,
        outcome = ?outcome,
        units = session.units.len(),
        synthesized = session.bridge.as_ref().map_or(0, SynthesisBridge::sentences_sent),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "chat session finished"
    );
    outcome
}

async fn next_bridge_output(
    bridge: &mut Option<SynthesisBridge>,
) -> Option<Result<BridgeOutput, SynthesisError>> {
    match bridge {
        Some(bridge) => bridge.next_output().await,
        None => None,
    }
}

impl Session<'_> {
    /// Emit sentence units in order; in voice mode each is also submitted
    /// for synthesis once its chunk event is out.
    async fn deliver(&mut self, units: Vec<String>) -> Result<(), SessionOutcome> {
        for unit in units {
            self.units.push(unit.clone());
            if self.channel.emit(WireEvent::chunk(unit.clone())).await.is_err() {
                return Err(self.interrupt(SessionOutcome::Disconnected).await);
            }
            if !self.first_chunk_sent {
                self.first_chunk_sent = true;
                self.deps
                    .metrics
                    .record_first_chunk(self.request.mode, self.started.elapsed());
            }

            if let Some(bridge) = self.bridge.as_mut() {
                self.synthesis_started.get_or_insert_with(Instant::now);
                if let Err(e) = bridge.submit(&unit).await {
                    return Err(self.fail_synthesis(e).await);
                }
            }
        }
        Ok(())
    }

    /// Flush the segmenter and close synthesis input. Returns `true` when the
    /// session can end right away.
    async fn generation_completed(&mut self) -> Result<bool, SessionOutcome> {
        self.generation_done = true;
        let rest: Vec<String> = self.segmenter.flush().into_iter().collect();
        // The reply is final here; a failed last delivery must not lose it.
        let full: Vec<&str> = self.units.iter().chain(&rest).map(String::as_str).collect();
        self.assembled = Some(full.join(" "));
        self.deliver(rest).await?;
        debug!(units = self.units.len(), "generation completed");

        let Some(bridge) = self.bridge.as_mut() else {
            return Ok(true);
        };
        if let Err(e) = bridge.finish().await {
            return Err(self.fail_synthesis(e).await);
        }
        Ok(bridge.state() == BridgeState::Closed)
    }

    /// Forward synthesis output. Returns `true` once the bridge closed.
    async fn on_bridge_output(
        &mut self,
        output: Result<BridgeOutput, SynthesisError>,
    ) -> Result<bool, SessionOutcome> {
        let event = match output {
            Ok(BridgeOutput::Audio(frame)) => {
                debug!(ordinal = frame.ordinal, bytes = frame.data.len(), "audio frame");
                WireEvent::audio(&frame.data)
            }
            Ok(BridgeOutput::Timing(word)) => WireEvent::Subtitle {
                subtitle: Subtitle {
                    text: word.text,
                    start_time: word.start_ms,
                    end_time: word.end_ms,
                },
            },
            Ok(BridgeOutput::Closed) => {
                if let Some(started) = self.synthesis_started {
                    self.deps.metrics.synthesis.record_success(started.elapsed());
                }
                return Ok(true);
            }
            Err(e) => return Err(self.fail_synthesis(e).await),
        };

        if self.channel.emit(event).await.is_err() {
            return Err(self.interrupt(SessionOutcome::Disconnected).await);
        }
        Ok(false)
    }

    async fn complete(&mut self) -> SessionOutcome {
        if self.channel.close_with(WireEvent::End).await {
            SessionOutcome::Completed
        } else {
            SessionOutcome::Disconnected
        }
    }

    async fn fail_generation(&mut self, e: LlmError) -> SessionOutcome {
        error!(conversation_id = %self.request.conversation_id, error = %e, "generation failed");
        self.fail(GENERATION_FAILED_MESSAGE).await
    }

    async fn fail_synthesis(&mut self, e: SynthesisError) -> SessionOutcome {
        error!(
            conversation_id = %self.request.conversation_id,
            error = %e,
            "speech synthesis failed"
        );
        let elapsed = self.synthesis_started.map(|s| s.elapsed()).unwrap_or_default();
        self.deps.metrics.synthesis.record_failure(elapsed);
        self.fail(SYNTHESIS_FAILED_MESSAGE).await
    }

    async fn fail(&mut self, message: &str) -> SessionOutcome {
        if let Some(bridge) = self.bridge.as_mut() {
            bridge.abort();
        }
        self.channel.close_with(WireEvent::error(message)).await;
        SessionOutcome::Failed
    }

    /// Tear down on disconnect or cancellation, keeping the partial reply.
    async fn interrupt(&mut self, outcome: SessionOutcome) -> SessionOutcome {
        if let Some(bridge) = self.bridge.as_mut() {
            bridge.abort();
        }
        if !self.generation_done {
            if let Some(rest) = self.segmenter.flush() {
                self.units.push(rest);
            }
            self.assembled = Some(self.units.join(" "));
        }

        match outcome {
            SessionOutcome::Cancelled => {
                self.channel.close_with(WireEvent::error(CANCELLED_MESSAGE)).await;
            }
            _ => {
                self.channel.close().await;
            }
        }
        info!(
            conversation_id = %self.request.conversation_id,
            outcome = ?outcome,
            "chat session interrupted"
        );
        outcome
    }
}
