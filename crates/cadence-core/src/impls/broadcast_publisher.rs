//! BroadcastPublisher - live-update channel（tokio::sync::broadcast）
//!
//! Every subscriber gets every snapshot published after it subscribed.
//! Slow subscribers lag and lose the oldest snapshots; publishing never blocks.

use tokio::sync::broadcast;

use crate::domain::TaskSnapshot;
use crate::ports::UpdatePublisher;

pub struct BroadcastPublisher {
    tx: broadcast::Sender<TaskSnapshot>,
}

impl BroadcastPublisher {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TaskSnapshot> {
        self.tx.subscribe()
    }
}

impl UpdatePublisher for BroadcastPublisher {
    fn publish(&self, snapshot: TaskSnapshot) {
        // no subscribers is not an error for a fire-and-forget channel
        if self.tx.send(snapshot).is_err() {
            tracing::trace!("snapshot dropped: no subscribers");
        }
    }
}
