//! Cross-thread delivery into the bridge.
//!
//! Producers on worker threads never touch the pending queue. They send messages through a
//! [`ProducerHandle`]; the thread that owns the bridge drains them during its next turn, so every
//! queue mutation happens on that one thread without locking.

use crate::ack::AckSummary;
use crate::value::{Payload, Value};
use std::sync::mpsc::{channel, Receiver, Sender, TryRecvError};

#[derive(Debug, Clone, PartialEq)]
pub enum BridgeMessage {
    Update { category: String, payload: Payload },
    Ack(AckSummary),
}

/// Cloneable, `Send` handle for producers living off the bridge thread.
#[derive(Debug, Clone)]
pub struct ProducerHandle {
    tx: Sender<BridgeMessage>,
}

impl ProducerHandle {
    /// Queues an update for the owning thread. Returns `false` once the bridge is gone.
    pub fn queue_update(&self, category: impl Into<String>, payload: Payload) -> bool {
        self.send(BridgeMessage::Update { category: category.into(), payload })
    }

    /// Like [`queue_update`](Self::queue_update) but drops non-mapping values at the source.
    pub fn queue_value(&self, category: impl Into<String>, value: Value) -> bool {
        match value {
            Value::Map(payload) => self.queue_update(category, payload),
            _ => false,
        }
    }

    pub fn ack(&self, summary: AckSummary) -> bool {
        self.send(BridgeMessage::Ack(summary))
    }

    pub fn send(&self, message: BridgeMessage) -> bool {
        self.tx.send(message).is_ok()
    }
}

/// Receiving end, owned by the bridge.
#[derive(Debug)]
pub struct BridgeInbox {
    tx: Sender<BridgeMessage>,
    rx: Receiver<BridgeMessage>,
}

impl Default for BridgeInbox {
    fn default() -> Self {
        Self::new()
    }
}

impl BridgeInbox {
    pub fn new() -> Self {
        let (tx, rx) = channel();
        Self { tx, rx }
    }

    pub fn producer(&self) -> ProducerHandle {
        ProducerHandle { tx: self.tx.clone() }
    }

    /// Everything delivered so far, in send order.
    pub fn drain(&self) -> Vec<BridgeMessage> {
        let mut messages = Vec::new();
        loop {
            match self.rx.try_recv() {
                Ok(message) => messages.push(message),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        messages
    }
}
