use async_trait::async_trait;
use conclave::{
    error::Error,
    signaling::{SignalMessage, SignalingChannel, SignalingEvent, SignalingEventStream},
};
use parking_lot::Mutex;
use tokio::sync::broadcast;

/// A relay that records what was emitted and delivers injected events.
pub struct MemorySignaling {
    event_ch: broadcast::Sender<SignalingEvent>,
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    connected: bool,
    connects: usize,
    disconnects: usize,
    emitted: Vec<SignalMessage>,
}

impl Default for MemorySignaling {
    fn default() -> Self {
        Self::new()
    }
}

impl MemorySignaling {
    pub fn new() -> Self {
        let (event_ch, _) = broadcast::channel(1024);
        Self {
            event_ch,
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Delivers an event to subscribers as if it came from the relay.
    pub fn inject(&self, event: SignalingEvent) {
        if let Err(e) = self.event_ch.send(event) {
            tracing::debug!("no signaling subscribers: {e}");
        }
    }

    pub fn deliver(&self, event: &str, payload: serde_json::Value) {
        self.inject(SignalingEvent::Message(SignalMessage::new(event, payload)));
    }

    /// Simulates the relay dropping the connection.
    pub fn drop_connection(&self, reason: &str) {
        self.inner.lock().connected = false;
        self.inject(SignalingEvent::Disconnected {
            reason: reason.into(),
        });
    }

    pub fn is_connected(&self) -> bool {
        self.inner.lock().connected
    }

    pub fn connects(&self) -> usize {
        self.inner.lock().connects
    }

    pub fn disconnects(&self) -> usize {
        self.inner.lock().disconnects
    }

    pub fn emitted(&self) -> Vec<SignalMessage> {
        self.inner.lock().emitted.clone()
    }

    /// Payloads of every emitted message named `event`, in order.
    pub fn emitted_named(&self, event: &str) -> Vec<serde_json::Value> {
        self.inner
            .lock()
            .emitted
            .iter()
            .filter(|message| message.event == event)
            .map(|message| message.payload.clone())
            .collect()
    }

    pub fn clear_emitted(&self) {
        self.inner.lock().emitted.clear();
    }
}

#[async_trait]
impl SignalingChannel for MemorySignaling {
    fn subscribe(&self) -> SignalingEventStream {
        let mut rx = self.event_ch.subscribe();
        let stream = async_stream::stream! {
            loop {
                match rx.recv().await {
                    Ok(event) => yield event,
                    Err(broadcast::error::RecvError::Closed) => break,
                    Err(_) => {}
                };
            }
        };
        SignalingEventStream(Box::pin(stream))
    }

    async fn connect(&self) -> Result<(), Error> {
        {
            let mut inner = self.inner.lock();
            inner.connected = true;
            inner.connects += 1;
        }
        self.inject(SignalingEvent::Connected);
        Ok(())
    }

    async fn emit(&self, message: SignalMessage) -> Result<(), Error> {
        let mut inner = self.inner.lock();
        if !inner.connected {
            return Err(Error::SignalingDisconnected);
        }
        inner.emitted.push(message);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), Error> {
        let mut inner = self.inner.lock();
        inner.connected = false;
        inner.disconnects += 1;
        Ok(())
    }
}
