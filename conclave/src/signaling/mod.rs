//! The room's relay channel and the messages exchanged over it.

mod incoming;
mod outgoing;

pub use incoming::*;
pub use outgoing::*;

use async_trait::async_trait;
use derive_more::Display;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// A named message with a JSON payload, as carried by the relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalMessage {
    pub event: String,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl SignalMessage {
    pub fn new(event: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            event: event.into(),
            payload,
        }
    }
}

#[derive(Debug, Display, Clone)]
pub enum SignalingEvent {
    #[display(fmt = "Connected")]
    Connected,
    #[display(fmt = "Disconnected")]
    Disconnected { reason: String },
    #[display(fmt = "Message")]
    Message(SignalMessage),
}

pub struct SignalingEventStream(pub BoxStream<'static, SignalingEvent>);

impl core::ops::Deref for SignalingEventStream {
    type Target = BoxStream<'static, SignalingEvent>;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl core::ops::DerefMut for SignalingEventStream {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

/// Relay between room members. Implementations reconnect on their own and report
/// `Connected` again once the channel is back.
#[async_trait]
pub trait SignalingChannel: Send + Sync {
    fn subscribe(&self) -> SignalingEventStream;

    async fn connect(&self) -> Result<(), Error>;

    async fn emit(&self, message: SignalMessage) -> Result<(), Error>;

    async fn disconnect(&self) -> Result<(), Error>;
}
