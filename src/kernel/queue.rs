// Fixed-capacity FIFO ring buffer
// Storage is inline; a full queue refuses new items instead of overwriting
use core::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushError<T> {
    /// Queue is at capacity, contains the rejected item
    Full(T),
}

impl<T> fmt::Display for PushError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PushError::Full(_) => write!(f, "queue full, item rejected"),
        }
    }
}

impl<T: fmt::Debug> core::error::Error for PushError<T> {}

/// FIFO of at most `N` items, oldest first.
pub struct BoundedQueue<T, const N: usize> {
    slots: [Option<T>; N],
    // index of the oldest item
    front: usize,
    count: usize,
}

impl<T, const N: usize> BoundedQueue<T, N> {
    pub const fn new() -> Self {
        const { assert!(N > 0, "queue capacity must be non-zero") };
        Self {
            slots: [const { None }; N],
            front: 0,
            count: 0,
        }
    }

    // physical slot of the `offset`-th oldest item
    fn index(&self, offset: usize) -> usize {
        (self.front + offset) % N
    }

    /// Append `item`; a full queue hands it back untouched.
    pub fn push(&mut self, item: T) -> Result<(), PushError<T>> {
        if self.is_full() {
            return Err(PushError::Full(item));
        }
        let back = self.index(self.count);
        self.slots[back] = Some(item);
        self.count += 1;
        Ok(())
    }

    pub fn pop(&mut self) -> Option<T> {
        let item = self.slots.get_mut(self.front)?.take()?;
        self.front = self.index(1);
        self.count -= 1;
        Some(item)
    }

    pub fn peek(&self) -> Option<&T> {
        self.slots.get(self.front)?.as_ref()
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn is_full(&self) -> bool {
        self.count == N
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub const fn capacity(&self) -> usize {
        N
    }

    pub fn clear(&mut self) {
        self.slots.iter_mut().for_each(|slot| *slot = None);
        self.front = 0;
        self.count = 0;
    }

    /// Items from oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        (0..self.count).filter_map(move |offset| self.slots[self.index(offset)].as_ref())
    }
}

impl<T, const N: usize> Default for BoundedQueue<T, N> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fifo_order_across_wrap() {
        let mut q: BoundedQueue<u8, 3> = BoundedQueue::new();
        q.push(1).unwrap();
        q.push(2).unwrap();
        assert_eq!(q.pop(), Some(1));
        q.push(3).unwrap();
        q.push(4).unwrap();
        assert!(q.is_full());
        assert_eq!(q.iter().copied().collect::<Vec<_>>(), vec![2, 3, 4]);
        assert_eq!(q.pop(), Some(2));
        assert_eq!(q.pop(), Some(3));
        assert_eq!(q.pop(), Some(4));
        assert_eq!(q.pop(), None);
    }

    #[test]
    fn push_on_full_leaves_queue_unchanged() {
        let mut q: BoundedQueue<u8, 2> = BoundedQueue::new();
        q.push(10).unwrap();
        q.push(11).unwrap();
        assert_eq!(q.push(12), Err(PushError::Full(12)));
        assert_eq!(q.len(), 2);
        assert_eq!(q.peek(), Some(&10));
        q.clear();
        assert!(q.is_empty());
        assert_eq!(q.capacity(), 2);
    }
}
