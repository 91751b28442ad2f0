//! Release queue keyed by submission serial, shared by the native backends.
//!
//! Every queue submission is numbered. Objects dropped on the CPU are parked
//! with the last serial submitted at drop time and released once the GPU has
//! completed it.

use std::collections::VecDeque;

/// Items tagged with the serial after which they may be released.
///
/// Serials are pushed in non-decreasing order, so completed items always form
/// a prefix of the queue.
#[derive(Debug)]
pub(crate) struct SerialQueue<T> {
    items: VecDeque<(u64, T)>,
}

impl<T> Default for SerialQueue<T> {
    fn default() -> Self {
        Self {
            items: VecDeque::new(),
        }
    }
}

impl<T> SerialQueue<T> {
    pub fn push(&mut self, serial: u64, item: T) {
        debug_assert!(self.items.back().is_none_or(|(last, _)| *last <= serial));
        self.items.push_back((serial, item));
    }

    /// Remove and return every item whose serial is at most `completed`.
    pub fn drain_completed(&mut self, completed: u64) -> Vec<T> {
        let count = self
            .items
            .iter()
            .take_while(|(serial, _)| *serial <= completed)
            .count();
        self.items.drain(..count).map(|(_, item)| item).collect()
    }

    pub fn drain_all(&mut self) -> Vec<T> {
        self.items.drain(..).map(|(_, item)| item).collect()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drain_completed_releases_prefix() {
        let mut queue = SerialQueue::default();
        queue.push(1, "a");
        queue.push(3, "b");
        queue.push(3, "c");
        queue.push(5, "d");

        assert!(queue.drain_completed(0).is_empty());
        assert_eq!(queue.drain_completed(3), vec!["a", "b", "c"]);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.drain_completed(4), Vec::<&str>::new());
        assert_eq!(queue.drain_all(), vec!["d"]);
    }

    #[test]
    fn test_serial_zero_is_released_immediately() {
        // Objects dropped before the first submission.
        let mut queue = SerialQueue::default();
        queue.push(0, 42);
        assert_eq!(queue.drain_completed(0), vec![42]);
    }
}
