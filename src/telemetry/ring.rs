// Fixed-capacity rolling history feeding the live plots

/// Circular sample store. Capacity is fixed at construction and the backing
/// storage is allocated once; pushes overwrite the oldest sample when full.
#[derive(Debug, Clone)]
pub struct RingBuffer<T> {
    slots: Box<[T]>,
    // Next slot to write
    head: usize,
    len: usize,
}

impl<T: Clone + Default> RingBuffer<T> {
    /// Create a buffer holding `capacity` samples, all slots set to `T::default()`.
    ///
    /// # Panics
    /// If `capacity` is zero.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "RingBuffer capacity must be non-zero");
        Self {
            slots: vec![T::default(); capacity].into_boxed_slice(),
            head: 0,
            len: 0,
        }
    }

    pub fn push(&mut self, value: T) {
        self.slots[self.head] = value;
        self.head = (self.head + 1) % self.slots.len();
        self.len = (self.len + 1).min(self.slots.len());
    }

    /// All `capacity` slots, oldest first. Until the buffer fills, the leading
    /// slots hold `T::default()` (zero for numeric samples), so the length never
    /// changes and the result can be plotted without bounds checks.
    pub fn snapshot(&self) -> Vec<T> {
        let mut out = Vec::with_capacity(self.slots.len());
        out.extend_from_slice(&self.slots[self.head..]);
        out.extend_from_slice(&self.slots[..self.head]);
        out
    }

    pub fn latest(&self) -> Option<&T> {
        if self.len == 0 {
            return None;
        }
        let idx = (self.head + self.slots.len() - 1) % self.slots.len();
        Some(&self.slots[idx])
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Samples actually written, saturating at capacity
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_full(&self) -> bool {
        self.len == self.slots.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overwrite_keeps_newest() {
        let mut ring = RingBuffer::new(500);
        for v in 1..=600u32 {
            ring.push(v);
        }

        let snap = ring.snapshot();
        assert_eq!(snap.len(), 500);
        assert_eq!(snap, (101..=600).collect::<Vec<_>>());
        assert!(ring.is_full());
        assert_eq!(ring.latest(), Some(&600));
    }

    #[test]
    fn test_partial_fill_pads_with_zero() {
        let mut ring = RingBuffer::new(5);
        assert!(ring.is_empty());
        assert_eq!(ring.latest(), None);
        assert_eq!(ring.snapshot(), vec![0.0; 5]);

        ring.push(1.5);
        ring.push(2.5);
        assert_eq!(ring.snapshot(), vec![0.0, 0.0, 0.0, 1.5, 2.5]);
        assert_eq!(ring.len(), 2);
    }

    #[test]
    fn test_wrap_boundary() {
        let mut ring = RingBuffer::new(3);
        for v in 1..=3 {
            ring.push(v);
        }
        assert_eq!(ring.snapshot(), vec![1, 2, 3]);
        ring.push(4);
        assert_eq!(ring.snapshot(), vec![2, 3, 4]);
        assert_eq!(ring.capacity(), 3);
    }

    #[test]
    #[should_panic]
    fn test_zero_capacity_rejected() {
        let _ = RingBuffer::<u8>::new(0);
    }
}
