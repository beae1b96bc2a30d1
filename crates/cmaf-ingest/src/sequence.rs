use std::sync::atomic::{AtomicU64, Ordering};

/// Source of session ids.
pub trait SequenceGenerator: Send + Sync + 'static {
    /// Returns a fresh id, strictly greater than every id returned before.
    fn next_id(&self) -> u64;
}

/// Lock-free id sequence starting after `start`.
#[derive(Debug, Default)]
pub struct AtomicSequence {
    last: AtomicU64,
}

impl AtomicSequence {
    pub fn new() -> Self {
        Self::default()
    }

    /// The first id handed out will be `start + 1`.
    pub fn starting_after(start: u64) -> Self {
        Self {
            last: AtomicU64::new(start),
        }
    }
}

impl SequenceGenerator for AtomicSequence {
    fn next_id(&self) -> u64 {
        let mut prev = self.last.load(Ordering::Acquire);
        loop {
            let next = prev + 1;
            match self
                .last
                .compare_exchange_weak(prev, next, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return next,
                Err(actual) => prev = actual,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    #[test]
    fn test_ids_start_at_one() {
        let seq = AtomicSequence::new();
        assert_eq!(seq.next_id(), 1);
        assert_eq!(seq.next_id(), 2);

        let seq = AtomicSequence::starting_after(41);
        assert_eq!(seq.next_id(), 42);
    }

    #[test]
    fn test_concurrent_ids_are_unique_and_increasing() {
        let seq = Arc::new(AtomicSequence::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let seq = Arc::clone(&seq);
                std::thread::spawn(move || {
                    let ids: Vec<u64> = (0..1000).map(|_| seq.next_id()).collect();
                    // Each caller observes its own ids strictly increasing
                    assert!(ids.windows(2).all(|w| w[0] < w[1]));
                    ids
                })
            })
            .collect();

        let all: Vec<u64> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        let unique: HashSet<u64> = all.iter().copied().collect();
        assert_eq!(unique.len(), 8000);
        assert_eq!(*unique.iter().max().unwrap(), 8000);
    }
}
