//! Streaming chat server: generation, sentence segmentation and speech
//! synthesis delivered to the client as one event stream per exchange.

pub mod app;
pub mod channel;
pub mod config;
pub mod error;
pub mod metrics;
pub mod pipeline;
pub mod store;
pub mod validation;
