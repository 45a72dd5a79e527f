use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonic generator for outbound request `seq` numbers.
#[derive(Debug)]
pub struct SeqAllocator {
    next: AtomicU64,
}

impl SeqAllocator {
    pub fn new() -> Self {
        Self::starting_at(1)
    }

    pub fn starting_at(first: u64) -> Self {
        Self {
            next: AtomicU64::new(first),
        }
    }

    pub fn next(&self) -> u64 {
        self.next.fetch_add(1, Ordering::SeqCst)
    }

    /// The value the next call to [`SeqAllocator::next`] will return.
    pub fn peek(&self) -> u64 {
        self.next.load(Ordering::SeqCst)
    }
}

impl Default for SeqAllocator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{collections::HashSet, sync::Arc};

    #[test]
    fn test_starts_at_one_and_increments() {
        let seq = SeqAllocator::new();
        assert_eq!(seq.next(), 1);
        assert_eq!(seq.next(), 2);
        assert_eq!(seq.peek(), 3);
    }

    #[test]
    fn test_unique_across_threads() {
        let seq = Arc::new(SeqAllocator::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let seq = Arc::clone(&seq);
                std::thread::spawn(move || (0..500).map(|_| seq.next()).collect::<Vec<_>>())
            })
            .collect();

        let mut seen = HashSet::new();
        for handle in handles {
            for value in handle.join().expect("allocator thread should not panic") {
                assert!(seen.insert(value), "duplicate seq {value}");
            }
        }
        assert_eq!(seen.len(), 4000);
        assert_eq!(seq.peek(), 4001);
    }
}
