use std::collections::VecDeque;

use peercall_common::IceCandidate;

use crate::engine::ConnectivityEngine;

/// Remote candidates received before the remote description was applied.
///
/// The negotiator keeps this in an `Option`: while the queue exists,
/// candidates are buffered; once it has been drained (or the call ended) it
/// is gone and candidates flow straight to the engine.
#[derive(Debug, Default)]
pub struct CandidateQueue {
    candidates: VecDeque<IceCandidate>,
}

impl CandidateQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, candidate: IceCandidate) {
        self.candidates.push_back(candidate);
    }

    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    /// Applies every buffered candidate in arrival order and consumes the queue.
    pub fn drain_into(self, engine: &mut dyn ConnectivityEngine) -> usize {
        let count = self.candidates.len();
        for candidate in self.candidates {
            engine.add_ice_candidate(candidate);
        }
        count
    }
}

impl IntoIterator for CandidateQueue {
    type Item = IceCandidate;
    type IntoIter = std::collections::vec_deque::IntoIter<IceCandidate>;

    fn into_iter(self) -> Self::IntoIter {
        self.candidates.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preserves_arrival_order() {
        let mut queue = CandidateQueue::new();
        assert!(queue.is_empty());
        for i in 0..5u16 {
            queue.push(IceCandidate::new(i.to_string(), i, format!("candidate:{i}")));
        }
        assert_eq!(queue.len(), 5);
        let order: Vec<u16> = queue.into_iter().map(|c| c.sdp_mline_index).collect();
        assert_eq!(order, vec![0, 1, 2, 3, 4]);
    }
}
