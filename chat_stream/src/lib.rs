//! Client side of the chat streaming protocol.
//!
//! [`wire`] holds the event types shared with the server. A
//! [`StreamController`] drives one exchange over a [`Transport`], retrying the
//! stream a bounded number of times before falling back to the
//! request/response endpoint.

mod controller;
mod error;
mod transport;
pub mod wire;

pub use controller::{
    ClientEvent, ClientEvents, ControllerConfig, StreamController, GENERIC_ERROR_MESSAGE,
};
pub use error::{ClientError, DecodeError};
pub use transport::{EventStream, FallbackResponse, HttpTransport, StreamRequest, Transport};
pub use wire::{FrameDecoder, Mode, Subtitle, WireEvent};
