use futures::channel::oneshot;

/// Holds one scripted operation until released or dropped.
pub struct Gate {
    tx: Option<oneshot::Sender<()>>,
}

impl Gate {
    pub(crate) fn new() -> (Self, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel();
        (Self { tx: Some(tx) }, rx)
    }

    pub fn release(mut self) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(());
        }
    }
}
