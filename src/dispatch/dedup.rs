//! Duplicate Send Suppression
//!
//! Short-lived memory of `(question, conversation)` signatures. The whole set
//! is cleared once per interval; entries never expire individually.

use std::collections::HashSet;
use std::time::Duration;
use tokio::time::Instant;

/// Conversation key used for questions that start a new conversation
pub const NEW_CONVERSATION: &str = "new";

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Signature {
    pub question: String,
    pub conversation: String,
}

impl Signature {
    pub fn new(question: &str, conversation_id: Option<&str>) -> Self {
        Self {
            question: question.to_string(),
            conversation: conversation_id.unwrap_or(NEW_CONVERSATION).to_string(),
        }
    }
}

#[derive(Debug)]
pub struct SignatureSet {
    clear_interval: Duration,
    last_cleared: Instant,
    seen: HashSet<Signature>,
}

impl SignatureSet {
    pub fn new(clear_interval: Duration) -> Self {
        Self::starting_at(clear_interval, Instant::now())
    }

    pub fn starting_at(clear_interval: Duration, now: Instant) -> Self {
        Self {
            clear_interval,
            last_cleared: now,
            seen: HashSet::new(),
        }
    }

    /// Record `signature`; false when it was already recorded this interval
    pub fn insert(&mut self, signature: Signature) -> bool {
        self.insert_at(signature, Instant::now())
    }

    pub fn insert_at(&mut self, signature: Signature, now: Instant) -> bool {
        self.sweep(now);
        self.seen.insert(signature)
    }

    pub fn contains_at(&mut self, signature: &Signature, now: Instant) -> bool {
        self.sweep(now);
        self.seen.contains(signature)
    }

    /// Forget one signature before the interval ends
    pub fn remove(&mut self, signature: &Signature) -> bool {
        self.seen.remove(signature)
    }

    pub fn clear(&mut self) {
        self.seen.clear();
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    /// Clear on fixed interval boundaries measured from construction
    fn sweep(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_cleared);
        if elapsed < self.clear_interval {
            return;
        }

        if !self.seen.is_empty() {
            tracing::debug!(signatures = self.seen.len(), "Clearing sent signatures");
        }
        self.seen.clear();

        let interval_ms = self.clear_interval.as_millis().max(1);
        let periods = (elapsed.as_millis() / interval_ms) as u32;
        self.last_cleared += self.clear_interval * periods;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const INTERVAL: Duration = Duration::from_secs(300);

    #[test]
    fn test_duplicate_rejected_within_interval() {
        let t0 = Instant::now();
        let mut set = SignatureSet::starting_at(INTERVAL, t0);

        assert!(set.insert_at(Signature::new("hi", None), t0));
        assert!(!set.insert_at(Signature::new("hi", None), t0 + Duration::from_secs(10)));
        assert!(set.insert_at(Signature::new("hi", Some("c1")), t0));
    }

    #[test]
    fn test_remove_forgets_one_signature() {
        let t0 = Instant::now();
        let mut set = SignatureSet::starting_at(INTERVAL, t0);
        set.insert_at(Signature::new("a", None), t0);
        set.insert_at(Signature::new("b", None), t0);

        assert!(set.remove(&Signature::new("a", None)));
        assert!(!set.remove(&Signature::new("a", None)));
        assert_eq!(set.len(), 1);
        assert!(set.insert_at(Signature::new("a", None), t0));
    }

    #[test]
    fn test_missing_conversation_maps_to_new() {
        assert_eq!(
            Signature::new("hi", None),
            Signature::new("hi", Some(NEW_CONVERSATION))
        );
    }

    #[test]
    fn test_cleared_wholesale_on_interval() {
        let t0 = Instant::now();
        let mut set = SignatureSet::starting_at(INTERVAL, t0);
        set.insert_at(Signature::new("a", None), t0);
        set.insert_at(Signature::new("b", None), t0 + Duration::from_secs(299));
        assert_eq!(set.len(), 2);

        // Both entries go at the boundary, even the one inserted a second earlier
        let boundary = t0 + INTERVAL;
        assert!(!set.contains_at(&Signature::new("b", None), boundary));
        assert!(set.is_empty());
    }

    #[test]
    fn test_interval_cadence_is_fixed() {
        let t0 = Instant::now();
        let mut set = SignatureSet::starting_at(INTERVAL, t0);

        // Idle for 2.5 intervals: next boundary is at 3 intervals, not 3.5
        let idle = t0 + INTERVAL * 5 / 2;
        set.insert_at(Signature::new("a", None), idle);
        assert!(set.contains_at(&Signature::new("a", None), t0 + INTERVAL * 3 - Duration::from_secs(1)));
        assert!(!set.contains_at(&Signature::new("a", None), t0 + INTERVAL * 3));
    }
}
