//! Event-Framed Delivery Channel.
//!
//! One per streaming response. Events go out in emit order through a bounded
//! queue drained by the SSE body; the state lock is held across each write so
//! a terminal event can never be overtaken or followed.

use chat_stream::WireEvent;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Open,
    Closed,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("delivery channel closed")]
pub struct ChannelClosed;

#[derive(Debug)]
pub struct DeliveryChannel {
    tx: mpsc::Sender<WireEvent>,
    state: Mutex<ChannelState>,
}

impl DeliveryChannel {
    /// Create the channel and the receiver that feeds the response body.
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<WireEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let channel = Self {
            tx,
            state: Mutex::new(ChannelState::Open),
        };
        (channel, rx)
    }

    /// Send one event. Terminal events close the channel.
    pub async fn emit(&self, event: WireEvent) -> Result<(), ChannelClosed> {
        if event.is_terminal() {
            return if self.close_with(event).await { Ok(()) } else { Err(ChannelClosed) };
        }

        let mut state = self.state.lock().await;
        if *state == ChannelState::Closed {
            return Err(ChannelClosed);
        }
        if self.tx.send(event).await.is_err() {
            debug!("client went away, closing delivery channel");
            *state = ChannelState::Closed;
            return Err(ChannelClosed);
        }
        Ok(())
    }

    /// Write the terminal event and close. Returns `false` when the channel
    /// was already closed, in which case nothing is written.
    pub async fn close_with(&self, terminal: WireEvent) -> bool {
        let mut state = self.state.lock().await;
        if *state == ChannelState::Closed {
            debug!(event = terminal.kind(), "delivery channel already closed");
            return false;
        }
        *state = ChannelState::Closed;
        if self.tx.send(terminal).await.is_err() {
            debug!("client went away before the terminal event");
        }
        true
    }

    /// Close without writing anything, used once the client is gone.
    pub async fn close(&self) -> bool {
        let mut state = self.state.lock().await;
        let was_open = *state == ChannelState::Open;
        *state = ChannelState::Closed;
        was_open
    }

    /// Resolves once the client side of the stream has been dropped.
    pub async fn disconnected(&self) {
        self.tx.closed().await
    }
}
