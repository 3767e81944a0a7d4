//! Shared label-to-count table.
//!
//! One [`CounterTable`] is owned by the service and shared by reference with
//! every connection handler. All reads and writes go through a single
//! [`parking_lot::Mutex`], held only for the read-check-write step and never
//! across I/O.
//!
//! Entries are created on first use and never evicted, so memory grows with
//! the number of distinct labels seen over the process lifetime.

use crate::protocol::{DEFAULT_RESET_THRESHOLD, Label, Reply};
use parking_lot::Mutex;
use std::collections::HashMap;

/// Per-label counters guarded by one lock.
#[derive(Debug)]
pub struct CounterTable {
    counts: Mutex<HashMap<Label, u32>>,
    reset_threshold: u32,
}

impl Default for CounterTable {
    fn default() -> Self {
        Self::new(DEFAULT_RESET_THRESHOLD)
    }
}

impl CounterTable {
    pub fn new(reset_threshold: u32) -> Self {
        Self {
            counts: Mutex::new(HashMap::new()),
            reset_threshold,
        }
    }

    pub const fn reset_threshold(&self) -> u32 {
        self.reset_threshold
    }

    /// Answers one request for `label` and advances its counter.
    ///
    /// Returns the pre-increment count while it is at most the threshold.
    /// Past the threshold the counter resets to zero and the sentinel is
    /// returned instead.
    pub fn next_reply(&self, label: &Label) -> Reply {
        let mut counts = self.counts.lock();
        let count = counts.entry(label.clone()).or_insert(0);

        if *count > self.reset_threshold {
            *count = 0;
            Reply::Sentinel
        } else {
            let reply = Reply::Count(*count);
            *count += 1;
            reply
        }
    }

    /// Current count for `label`, if it has ever been requested.
    pub fn get(&self, label: &str) -> Option<u32> {
        self.counts.lock().get(label).copied()
    }

    /// Number of distinct labels seen so far.
    pub fn len(&self) -> usize {
        self.counts.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::scope;

    fn label(name: &str) -> Label {
        Label::new(name).unwrap()
    }

    fn wire(reply: Reply) -> i64 {
        reply.as_i64()
    }

    #[test]
    fn counts_to_threshold_then_resets() {
        let table = CounterTable::default();
        let job = label("job");

        let replies: Vec<_> = (0..13).map(|_| wire(table.next_reply(&job))).collect();

        assert_eq!(replies, [0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, -1, 0]);
        assert_eq!(table.get("job"), Some(1));
    }

    #[test]
    fn labels_are_independent() {
        let table = CounterTable::default();
        let (a, b) = (label("a"), label("b"));

        assert_eq!(wire(table.next_reply(&a)), 0);
        assert_eq!(wire(table.next_reply(&a)), 1);
        assert_eq!(wire(table.next_reply(&b)), 0);
        assert_eq!(wire(table.next_reply(&a)), 2);
        assert_eq!(wire(table.next_reply(&b)), 1);

        assert_eq!(table.get("a"), Some(3));
        assert_eq!(table.get("b"), Some(2));
        assert_eq!(table.get("c"), None);
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn custom_threshold() {
        let table = CounterTable::new(2);
        let job = label("job");

        let replies: Vec<_> = (0..5).map(|_| wire(table.next_reply(&job))).collect();

        assert_eq!(replies, [0, 1, 2, -1, 0]);
    }

    #[test]
    fn concurrent_updates_never_duplicate_or_skip() {
        const THREADS: usize = 8;
        const PER_THREAD: usize = 120;

        let table = CounterTable::default();
        let job = label("job");

        let mut replies: Vec<i64> = scope(|s| {
            let handles: Vec<_> = (0..THREADS)
                .map(|_| {
                    s.spawn(|| {
                        (0..PER_THREAD)
                            .map(|_| wire(table.next_reply(&job)))
                            .collect::<Vec<_>>()
                    })
                })
                .collect();
            handles
                .into_iter()
                .flat_map(|h| h.join().unwrap())
                .collect()
        });

        // Every window of 12 requests serves 0..=10 once and one sentinel.
        let total = THREADS * PER_THREAD;
        assert_eq!(total % 12, 0);
        replies.sort_unstable();
        let mut expected: Vec<i64> = (0..total / 12)
            .flat_map(|_| (-1..=10).collect::<Vec<_>>())
            .collect();
        expected.sort_unstable();
        assert_eq!(replies, expected);
    }
}
