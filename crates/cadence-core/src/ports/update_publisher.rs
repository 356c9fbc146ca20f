//! UpdatePublisher port - live-update channel への一方向 push
//!
//! Fire-and-forget: no acknowledgement, no ordering guarantee relative to
//! store reads, never fails from the caller's point of view.

use crate::domain::TaskSnapshot;

pub trait UpdatePublisher: Send + Sync {
    fn publish(&self, snapshot: TaskSnapshot);
}

/// Publisher that drops everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopPublisher;

impl UpdatePublisher for NoopPublisher {
    fn publish(&self, _snapshot: TaskSnapshot) {}
}
