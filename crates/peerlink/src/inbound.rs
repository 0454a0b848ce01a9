//! The inbound message queue shared by every receive loop.
//!
//! Many producers (one task per TCP link, plus the UDP loop), one consumer
//! (the game loop). Pushing never blocks and popping never waits.

use tokio::sync::mpsc;

/// Producer handle, cloned into each receive loop.
#[derive(Debug, Clone)]
pub(crate) struct InboundSender {
    tx: mpsc::UnboundedSender<String>,
}

impl InboundSender {
    /// Appends one raw message. Dropped silently once the queue is gone.
    pub(crate) fn push(&self, message: String) {
        if self.tx.send(message).is_err() {
            tracing::trace!("inbound queue closed, message dropped");
        }
    }
}

/// Consumer side, owned by the network manager.
#[derive(Debug)]
pub(crate) struct InboundQueue {
    rx: mpsc::UnboundedReceiver<String>,
    tx: mpsc::UnboundedSender<String>,
}

impl InboundQueue {
    pub(crate) fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self { rx, tx }
    }

    pub(crate) fn sender(&self) -> InboundSender {
        InboundSender {
            tx: self.tx.clone(),
        }
    }

    /// The oldest message, or `None` if the queue is empty right now.
    pub(crate) fn pop(&mut self) -> Option<String> {
        self.rx.try_recv().ok()
    }

    /// Removes every message currently queued.
    pub(crate) fn drain(&mut self) -> Vec<String> {
        std::iter::from_fn(|| self.pop()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pop_empty_returns_none() {
        let mut queue = InboundQueue::new();
        assert_eq!(queue.pop(), None);
    }

    #[test]
    fn test_fifo_across_senders() {
        let mut queue = InboundQueue::new();
        let a = queue.sender();
        let b = queue.sender();

        a.push("one".into());
        b.push("two".into());
        a.push("three".into());

        assert_eq!(queue.drain(), vec!["one", "two", "three"]);
        assert_eq!(queue.pop(), None);
    }

    #[tokio::test]
    async fn test_push_from_tasks() {
        let mut queue = InboundQueue::new();
        let mut handles = Vec::new();
        for n in 0..8 {
            let tx = queue.sender();
            handles.push(tokio::spawn(async move { tx.push(format!("m{n}")) }));
        }
        for h in handles {
            h.await.unwrap();
        }

        let mut all = queue.drain();
        all.sort();
        assert_eq!(all.len(), 8);
        assert_eq!(all[0], "m0");
    }
}
