//! Client Stream Controller.
//!
//! Runs one exchange on a background task and hands the caller a typed event
//! receiver. Connection failures are retried with a fixed delay; once retries
//! are exhausted the request is replayed against the non-streaming endpoint.

use std::sync::Arc;
use std::time::Duration;

use base64::{engine::general_purpose, Engine as _};
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::ClientError;
use crate::transport::{EventStream, StreamRequest, Transport};
use crate::wire::{Mode, Subtitle, WireEvent};

/// Shown when neither the stream nor the fallback produced a reply.
pub const GENERIC_ERROR_MESSAGE: &str = "Something went wrong. Please try again.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    TextChunk(String),
    AudioChunk(Vec<u8>),
    Subtitle(Subtitle),
    StreamEnd,
    /// Streaming gave up; the reply will arrive through the fallback path.
    Fallback,
    Error(String),
}

#[derive(Debug, Clone)]
pub struct ControllerConfig {
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub channel_capacity: usize,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            retry_delay: Duration::from_secs(1),
            channel_capacity: 64,
        }
    }
}

pub struct StreamController {
    transport: Arc<dyn Transport>,
    config: ControllerConfig,
    cancel: Option<CancellationToken>,
}

impl StreamController {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            config: ControllerConfig::default(),
            cancel: None,
        }
    }

    pub fn with_config(mut self, config: ControllerConfig) -> Self {
        self.config = config;
        self
    }

    /// Start an exchange. Any exchange still running is closed first.
    pub fn start(&mut self, mode: Mode, mut request: StreamRequest) -> ClientEvents {
        self.close();
        request.mode = mode;

        let cancel = CancellationToken::new();
        self.cancel = Some(cancel.clone());
        let (tx, rx) = mpsc::channel(self.config.channel_capacity.max(1));

        let transport = self.transport.clone();
        let config = self.config.clone();
        let task_cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = task_cancel.cancelled() => debug!("chat exchange closed by caller"),
                _ = drive(transport.as_ref(), &config, &request, &tx) => {}
            }
        });

        ClientEvents { rx, cancel }
    }

    /// Cancel the running exchange, aborting any in-flight request.
    pub fn close(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel.cancel();
        }
    }
}

impl Drop for StreamController {
    fn drop(&mut self) {
        self.close();
    }
}

/// Receiver side of one exchange.
pub struct ClientEvents {
    rx: mpsc::Receiver<ClientEvent>,
    cancel: CancellationToken,
}

impl ClientEvents {
    /// Next event, or `None` once the exchange finished or was closed.
    pub async fn next(&mut self) -> Option<ClientEvent> {
        if self.cancel.is_cancelled() {
            return None;
        }
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            event = self.rx.recv() => event,
        }
    }

    pub fn close(&self) {
        self.cancel.cancel();
    }
}

async fn drive(
    transport: &dyn Transport,
    config: &ControllerConfig,
    request: &StreamRequest,
    tx: &mpsc::Sender<ClientEvent>,
) {
    match open_attempt(transport, config, request, 0).await {
        Ok(stream) => forward(stream, tx).await,
        Err(e) => {
            warn!(error = %e, "streaming unavailable, using fallback endpoint");
            fallback(transport, request, tx).await;
        }
    }
}

async fn open_attempt(
    transport: &dyn Transport,
    config: &ControllerConfig,
    request: &StreamRequest,
    mut attempt: u32,
) -> Result<EventStream, ClientError> {
    loop {
        match transport.open_stream(request).await {
            Ok(stream) => {
                if attempt > 0 {
                    info!(attempt, "event stream established after retry");
                }
                return Ok(stream);
            }
            Err(e) if attempt < config.max_retries => {
                warn!(
                    attempt,
                    error = %e,
                    "event stream failed to open, retrying in {:?}",
                    config.retry_delay
                );
                tokio::time::sleep(config.retry_delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

async fn forward(mut stream: EventStream, tx: &mpsc::Sender<ClientEvent>) {
    while let Some(item) = stream.next().await {
        let event = match item {
            Ok(event) => event,
            Err(e) => {
                warn!(error = %e, "event stream broke mid-reply");
                let _ = tx.send(ClientEvent::Error(GENERIC_ERROR_MESSAGE.to_string())).await;
                return;
            }
        };

        let terminal = event.is_terminal();
        let client_event = match event {
            WireEvent::Chunk { text } => ClientEvent::TextChunk(text),
            WireEvent::Audio { chunk } => match general_purpose::STANDARD.decode(chunk) {
                Ok(bytes) => ClientEvent::AudioChunk(bytes),
                Err(e) => {
                    warn!(error = %e, "skipping undecodable audio event");
                    continue;
                }
            },
            WireEvent::Subtitle { subtitle } => ClientEvent::Subtitle(subtitle),
            WireEvent::Error { message } => ClientEvent::Error(message),
            WireEvent::End => ClientEvent::StreamEnd,
        };

        if tx.send(client_event).await.is_err() {
            debug!("event receiver dropped");
            return;
        }
        if terminal {
            return;
        }
    }

    warn!("event stream ended without a terminal event");
    let _ = tx.send(ClientEvent::Error(GENERIC_ERROR_MESSAGE.to_string())).await;
}

async fn fallback(
    transport: &dyn Transport,
    request: &StreamRequest,
    tx: &mpsc::Sender<ClientEvent>,
) {
    if tx.send(ClientEvent::Fallback).await.is_err() {
        return;
    }
    match transport.fetch_full(request).await {
        Ok(resp) => {
            debug!(conversation_id = %resp.conversation_id, "fallback reply received");
            if tx.send(ClientEvent::TextChunk(resp.reply)).await.is_ok() {
                let _ = tx.send(ClientEvent::StreamEnd).await;
            }
        }
        Err(e) => {
            warn!(error = %e, "fallback request failed");
            let _ = tx.send(ClientEvent::Error(GENERIC_ERROR_MESSAGE.to_string())).await;
        }
    }
}
