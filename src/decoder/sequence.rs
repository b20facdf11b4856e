//! Event number continuity between consecutive records of one stream

use tracing::warn;

use crate::common::DecodeError;

/// Tracks event numbers across records from the same node
#[derive(Debug, Clone, Default)]
pub struct EventSequenceChecker {
    last_event: Option<u32>,
    discontinuities: u64,
}

impl EventSequenceChecker {
    /// Create a checker with no history
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the next event number
    ///
    /// The first event is always accepted. Afterwards every event must be
    /// the previous one plus one (wrapping at `u32::MAX`). On a gap the new
    /// number still becomes the reference for the next call.
    pub fn observe(&mut self, event_number: u32) -> Result<(), DecodeError> {
        let previous = self.last_event.replace(event_number);
        match previous {
            Some(prev) if event_number != prev.wrapping_add(1) => {
                self.discontinuities += 1;
                let expected = prev.wrapping_add(1);
                warn!(expected, found = event_number, "Event number discontinuity");
                Err(DecodeError::EventDiscontinuity {
                    expected,
                    found: event_number,
                })
            }
            _ => Ok(()),
        }
    }

    /// Last accepted event number
    pub fn last_event(&self) -> Option<u32> {
        self.last_event
    }

    /// Number of gaps seen so far
    pub fn discontinuities(&self) -> u64 {
        self.discontinuities
    }

    /// Forget the history (e.g. at run start)
    pub fn reset(&mut self) {
        self.last_event = None;
        self.discontinuities = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_event_accepted() {
        let mut checker = EventSequenceChecker::new();
        assert!(checker.observe(1000).is_ok());
        assert_eq!(checker.last_event(), Some(1000));
    }

    #[test]
    fn test_consecutive_events() {
        let mut checker = EventSequenceChecker::new();
        for eve in 0..100 {
            checker.observe(eve).unwrap();
        }
        assert_eq!(checker.discontinuities(), 0);
    }

    #[test]
    fn test_gap_reported_and_resynchronised() {
        let mut checker = EventSequenceChecker::new();
        checker.observe(10).unwrap();
        let err = checker.observe(13).unwrap_err();
        assert_eq!(
            err,
            DecodeError::EventDiscontinuity {
                expected: 11,
                found: 13
            }
        );
        assert!(checker.observe(14).is_ok());
        assert_eq!(checker.discontinuities(), 1);
    }

    #[test]
    fn test_repeated_event_is_discontinuity() {
        let mut checker = EventSequenceChecker::new();
        checker.observe(5).unwrap();
        assert!(checker.observe(5).is_err());
    }

    #[test]
    fn test_wraparound() {
        let mut checker = EventSequenceChecker::new();
        checker.observe(u32::MAX).unwrap();
        assert!(checker.observe(0).is_ok());
    }

    #[test]
    fn test_reset() {
        let mut checker = EventSequenceChecker::new();
        checker.observe(1).unwrap();
        let _ = checker.observe(7);
        checker.reset();
        assert_eq!(checker.last_event(), None);
        assert_eq!(checker.discontinuities(), 0);
        assert!(checker.observe(100).is_ok());
    }
}
