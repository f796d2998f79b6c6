//! Fixed-capacity FIFO bridging interrupt-time production to normal-time
//! consumption.
//!
//! The buffer never blocks and never grows: a push onto a full queue drops
//! the new item and reports it, so the interrupt-side producer always
//! completes in bounded time. All index updates happen inside the engine's
//! critical section, which is what makes the producer/consumer handoff safe.

pub(crate) struct EventQueue<T: Copy, const N: usize> {
    slots: [Option<T>; N],
    /// Next slot to write.
    head: usize,
    /// Next slot to read.
    tail: usize,
    len: usize,
}

impl<T: Copy, const N: usize> EventQueue<T, N> {
    pub(crate) const fn new() -> Self {
        Self { slots: [None; N], head: 0, tail: 0, len: 0 }
    }

    /// Append an item. Returns `false` (dropping the item) when full.
    pub(crate) fn push(&mut self, item: T) -> bool {
        if self.len == N {
            return false;
        }

        self.slots[self.head] = Some(item);
        self.head = (self.head + 1) % N;
        self.len += 1;
        true
    }

    /// Remove and return the oldest unread item.
    pub(crate) fn pop(&mut self) -> Option<T> {
        if self.len == 0 {
            return None;
        }

        let item = self.slots[self.tail].take();
        self.tail = (self.tail + 1) % N;
        self.len -= 1;
        item
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    pub(crate) fn clear(&mut self) {
        self.slots = [None; N];
        self.head = 0;
        self.tail = 0;
        self.len = 0;
    }
}
