//! Single-producer single-consumer channel with synchronous handoff.
//!
//! `send` resolves only after the receiver has taken the item, so a producer
//! never runs more than one message ahead of its consumer.

use tokio::sync::{mpsc, oneshot};

/// The peer dropped its end of the channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct HandoffClosed;

pub(crate) struct HandoffSender<T> {
    tx: mpsc::Sender<(T, oneshot::Sender<()>)>,
}

pub(crate) struct HandoffReceiver<T> {
    rx: mpsc::Receiver<(T, oneshot::Sender<()>)>,
}

pub(crate) fn rendezvous<T>() -> (HandoffSender<T>, HandoffReceiver<T>) {
    let (tx, rx) = mpsc::channel(1);
    (HandoffSender { tx }, HandoffReceiver { rx })
}

impl<T> HandoffSender<T> {
    /// Waits until the receiver has taken `item`.
    pub(crate) async fn send(&self, item: T) -> Result<(), HandoffClosed> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.tx
            .send((item, ack_tx))
            .await
            .map_err(|_| HandoffClosed)?;
        ack_rx.await.map_err(|_| HandoffClosed)
    }
}

impl<T> HandoffReceiver<T> {
    /// Next item, or `None` once the sender is gone.
    pub(crate) async fn recv(&mut self) -> Option<T> {
        let (item, ack) = self.rx.recv().await?;
        // The sender may already have given up; the item is still ours.
        let _ = ack.send(());
        Some(item)
    }
}
