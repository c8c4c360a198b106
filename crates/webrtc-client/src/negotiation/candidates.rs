//! Held address candidates
//!
//! Candidates that arrive before the matching description is in place are
//! parked here and released in arrival order once it is.

use crate::signaling::IceCandidate;
use std::collections::VecDeque;

/// Which side gathered a candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateOrigin {
    /// Gathered by our own link, to be sent to the remote side
    Local,
    /// Received from the remote side, to be applied to our link
    Remote,
}

/// A held candidate and the side that gathered it
///
/// A record only exists while the candidate is held; flushing hands it over
/// for delivery and the queue forgets it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateRecord {
    /// The candidate itself
    pub candidate: IceCandidate,
    /// Where it came from
    pub origin: CandidateOrigin,
}

impl CandidateRecord {
    /// Record for a candidate of `origin`
    pub fn new(candidate: IceCandidate, origin: CandidateOrigin) -> Self {
        Self { candidate, origin }
    }
}

/// FIFO of held candidates for one origin
#[derive(Debug)]
pub struct CandidateQueue {
    origin: CandidateOrigin,
    pending: VecDeque<CandidateRecord>,
}

impl CandidateQueue {
    /// Empty queue for candidates of `origin`
    pub fn new(origin: CandidateOrigin) -> Self {
        Self {
            origin,
            pending: VecDeque::new(),
        }
    }

    /// Origin of the candidates in this queue
    pub fn origin(&self) -> CandidateOrigin {
        self.origin
    }

    /// Hold a candidate until the description it depends on is set
    pub fn enqueue(&mut self, candidate: IceCandidate) {
        self.pending
            .push_back(CandidateRecord::new(candidate, self.origin));
    }

    /// Release every held candidate, oldest first
    ///
    /// The queue is empty afterwards even if the iterator is dropped early.
    pub fn flush(&mut self) -> impl Iterator<Item = CandidateRecord> + '_ {
        self.pending.drain(..)
    }

    /// Number of held candidates
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Whether nothing is held
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Discard every held candidate
    pub fn clear(&mut self) {
        self.pending.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flush_preserves_arrival_order() {
        let mut queue = CandidateQueue::new(CandidateOrigin::Remote);
        for i in 0..5 {
            queue.enqueue(IceCandidate::new(format!("candidate:{}", i)));
        }
        assert_eq!(queue.len(), 5);

        let flushed: Vec<String> = queue.flush().map(|r| r.candidate.candidate).collect();
        assert_eq!(
            flushed,
            vec![
                "candidate:0",
                "candidate:1",
                "candidate:2",
                "candidate:3",
                "candidate:4"
            ]
        );
        assert!(queue.is_empty());
    }

    #[test]
    fn test_flush_empty_is_noop() {
        let mut queue = CandidateQueue::new(CandidateOrigin::Local);
        assert_eq!(queue.flush().count(), 0);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_records_carry_origin() {
        let mut queue = CandidateQueue::new(CandidateOrigin::Local);
        queue.enqueue(IceCandidate::new("candidate:a"));

        let record = queue.flush().next().unwrap();
        assert_eq!(record.origin, CandidateOrigin::Local);
        assert_eq!(record.candidate.candidate, "candidate:a");
    }

    #[test]
    fn test_partial_flush_empties_queue() {
        let mut queue = CandidateQueue::new(CandidateOrigin::Remote);
        queue.enqueue(IceCandidate::new("candidate:a"));
        queue.enqueue(IceCandidate::new("candidate:b"));

        let first = queue.flush().next();
        assert!(first.is_some());
        assert!(queue.is_empty());
    }
}
