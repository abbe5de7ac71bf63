use std::collections::{BTreeMap, VecDeque};

/// Holds results that complete out of order until every earlier index has
/// been released.
///
/// Indices are reserved in the order they must come out. Completed items wait
/// in the buffer until they reach the head of that order.
#[derive(Debug)]
pub struct ReorderBuffer<T> {
    turns: VecDeque<u32>,
    ready: BTreeMap<u32, T>,
}

impl<T> ReorderBuffer<T> {
    pub fn new() -> Self {
        Self {
            turns: VecDeque::new(),
            ready: BTreeMap::new(),
        }
    }

    /// Claim the next output slot for `index`.
    pub fn reserve(&mut self, index: u32) {
        self.turns.push_back(index);
    }

    /// Record the result for a reserved index. Returns `false` (and drops the
    /// item) if the index was never reserved or has already been released.
    pub fn complete(&mut self, index: u32, item: T) -> bool {
        if !self.turns.contains(&index) {
            return false;
        }
        self.ready.insert(index, item);
        true
    }

    /// Release the head item if its result is in.
    pub fn pop_ready(&mut self) -> Option<(u32, T)> {
        let head = *self.turns.front()?;
        let item = self.ready.remove(&head)?;
        self.turns.pop_front();
        Some((head, item))
    }

    /// Reserved indices not yet released, whether still running or buffered.
    pub fn outstanding(&self) -> usize {
        self.turns.len()
    }

    pub fn buffered(&self) -> usize {
        self.ready.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }
}

impl<T> Default for ReorderBuffer<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn releases_in_reserved_order() {
        let mut buf = ReorderBuffer::new();
        for i in [0, 10, 20] {
            buf.reserve(i);
        }

        assert!(buf.complete(20, "c"));
        assert!(buf.complete(10, "b"));
        assert_eq!(buf.pop_ready(), None, "head has not completed yet");
        assert_eq!(buf.buffered(), 2);

        assert!(buf.complete(0, "a"));
        assert_eq!(buf.pop_ready(), Some((0, "a")));
        assert_eq!(buf.pop_ready(), Some((10, "b")));
        assert_eq!(buf.pop_ready(), Some((20, "c")));
        assert_eq!(buf.pop_ready(), None);
        assert!(buf.is_empty());
    }

    #[test]
    fn outstanding_counts_running_and_buffered() {
        let mut buf = ReorderBuffer::new();
        buf.reserve(1);
        buf.reserve(2);
        buf.complete(2, ());
        assert_eq!(buf.outstanding(), 2);
        buf.complete(1, ());
        buf.pop_ready();
        assert_eq!(buf.outstanding(), 1);
    }

    #[test]
    fn unknown_index_rejected() {
        let mut buf = ReorderBuffer::new();
        buf.reserve(1);
        assert!(!buf.complete(5, ()));
        assert_eq!(buf.buffered(), 0);
    }
}
