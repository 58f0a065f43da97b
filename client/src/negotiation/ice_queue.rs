//! Pending ICE Queue
//!
//! Remote candidates that arrive before the remote description is installed
//! are held here and released, in arrival order, once it is.

use std::collections::VecDeque;

use sb_common::IceCandidate;

#[derive(Debug, Default)]
pub struct PendingIceQueue {
    remote_ready: bool,
    pending: VecDeque<IceCandidate>,
}

impl PendingIceQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept an incoming candidate.
    ///
    /// Returns it back if it can be applied right away, otherwise holds it.
    pub fn offer(&mut self, candidate: IceCandidate) -> Option<IceCandidate> {
        if self.remote_ready {
            Some(candidate)
        } else {
            self.pending.push_back(candidate);
            None
        }
    }

    /// Mark the remote description as installed and take everything held.
    pub fn release(&mut self) -> Vec<IceCandidate> {
        self.remote_ready = true;
        self.pending.drain(..).collect()
    }

    /// Drop everything held without applying it.
    pub fn clear(&mut self) {
        self.pending.clear();
    }

    pub const fn is_remote_ready(&self) -> bool {
        self.remote_ready
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
