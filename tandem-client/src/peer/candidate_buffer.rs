use crate::transport::PeerTransport;
use std::collections::VecDeque;
use tandem_core::IceCandidate;
use tracing::{debug, warn};

/// Remote candidates that arrived before the remote description was applied.
#[derive(Debug, Default)]
pub struct CandidateBuffer {
    pending: VecDeque<IceCandidate>,
}

impl CandidateBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&mut self, candidate: IceCandidate) {
        self.pending.push_back(candidate);
        debug!("Buffered remote candidate ({} pending)", self.pending.len());
    }

    /// Drains the buffer in arrival order. A candidate that fails to apply is
    /// logged and skipped; the rest are still applied. Returns how many were
    /// accepted.
    pub async fn flush_into(&mut self, transport: &dyn PeerTransport) -> usize {
        let mut applied = 0;
        while let Some(candidate) = self.pending.pop_front() {
            match transport.add_ice_candidate(candidate).await {
                Ok(()) => applied += 1,
                Err(e) => warn!("Dropping buffered candidate: {:?}", e),
            }
        }
        applied
    }

    pub fn clear(&mut self) {
        if !self.pending.is_empty() {
            debug!("Discarding {} buffered candidates", self.pending.len());
        }
        self.pending.clear();
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
