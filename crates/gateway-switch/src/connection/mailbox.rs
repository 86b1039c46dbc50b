//! Bounded per-connection outbound queue (spec §4.2/§5's "mailbox").
//!
//! The mailbox is the only queue between outbound frame producers (Push
//! service, Event consumer, the Connection's own reply path) and the
//! writer task, which is the sole drainer. A full mailbox never blocks the
//! caller — it reports [`EnqueueOutcome::Dropped`] so Push service can count
//! the device as failed without stalling on a slow client.

use gateway_core::OutboundFrame;
use tokio::sync::mpsc;

/// Outcome of attempting to enqueue one frame.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum EnqueueOutcome {
    /// Accepted into the mailbox.
    Queued,
    /// The mailbox was full; the frame was not accepted.
    Dropped,
    /// The mailbox's writer half has already been dropped (Connection closed).
    Closed,
}

#[derive(Clone)]
pub struct Mailbox {
    sender: mpsc::Sender<OutboundFrame>,
}

impl Mailbox {
    /// Builds a bounded channel pair; the receiver is driven by the
    /// Connection's writer task.
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<OutboundFrame>) {
        let (sender, receiver) = mpsc::channel(capacity);
        (Self { sender }, receiver)
    }

    /// Non-blocking enqueue: never awaits, so a caller holding a `DashMap`
    /// shard guard over the connection map cannot be stalled by a slow
    /// client's full mailbox.
    pub fn try_enqueue(&self, frame: OutboundFrame) -> EnqueueOutcome {
        match self.sender.try_send(frame) {
            Ok(()) => EnqueueOutcome::Queued,
            Err(mpsc::error::TrySendError::Full(_)) => EnqueueOutcome::Dropped,
            Err(mpsc::error::TrySendError::Closed(_)) => EnqueueOutcome::Closed,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }

    /// Current queue depth, for the writer's high-watermark check (spec §5
    /// back-pressure: persistent fullness beyond a watermark closes the
    /// connection).
    pub fn len(&self) -> usize {
        self.sender.max_capacity() - self.sender.capacity()
    }

    pub fn capacity(&self) -> usize {
        self.sender.max_capacity()
    }
}
