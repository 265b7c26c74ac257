//! Outbound notifications

use crossbeam_channel::{Receiver, Sender, unbounded};

/// Subscriber registry for one component's event enum.
///
/// Each call to [`Notifier::subscribe`] opens an unbounded channel; every
/// emitted event is cloned to all live subscribers. Subscribers whose
/// receiver was dropped are pruned on the next emit.
#[derive(Debug)]
pub struct Notifier<E> {
    subscribers: Vec<Sender<E>>,
}

impl<E> Default for Notifier<E> {
    fn default() -> Self {
        Self {
            subscribers: Vec::new(),
        }
    }
}

impl<E: Clone> Notifier<E> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self) -> Receiver<E> {
        let (tx, rx) = unbounded();
        self.subscribers.push(tx);
        rx
    }

    pub fn emit(&mut self, event: E) {
        if self.subscribers.is_empty() {
            return;
        }
        self.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }
}
