use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Slots allocated before the first growth
pub const INITIAL_CAPACITY: usize = 16;

/// Determines how a bounded buffer handles a push when it is full
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OverflowPolicy {
    /// Drop the logically-oldest element to make room for the new one
    #[default]
    EvictOldest,
    /// Discard the incoming element and keep the buffer unchanged
    DropIncoming,
    /// Refuse the element and report an overflow
    RaiseError,
}

impl OverflowPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::EvictOldest => "evict-oldest",
            Self::DropIncoming => "drop-incoming",
            Self::RaiseError => "raise-error",
        }
    }
}

impl fmt::Display for OverflowPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OverflowPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "evict-oldest" => Ok(Self::EvictOldest),
            "drop-incoming" => Ok(Self::DropIncoming),
            "raise-error" => Ok(Self::RaiseError),
            other => Err(Error::InvalidArgument(format!(
                "unrecognized overflow policy `{other}`"
            ))),
        }
    }
}

/// What happened to a value handed to [`RingBuffer::push`]
#[derive(Debug, PartialEq, Eq)]
pub enum PushOutcome<T> {
    /// The value was stored
    Stored,
    /// The value was stored after evicting the returned oldest element
    Evicted(T),
    /// The buffer was full and the incoming value was discarded
    Dropped(T),
    /// The buffer was full under [`OverflowPolicy::RaiseError`]
    Overflow(T),
}

/// A growable circular buffer with an optional capacity limit
///
/// The slot array starts small and doubles when full. With a limit of 0 it
/// grows without bound; with a positive limit it grows up to the limit and
/// then applies its overflow policy.
#[derive(Debug)]
pub struct RingBuffer<T> {
    slots: Vec<Option<T>>,
    head: usize,
    tail: usize,
    len: usize,
    limit: usize,
    policy: OverflowPolicy,
}

impl<T> RingBuffer<T> {
    /// Create a buffer with the given capacity limit (0 = unbounded) and policy
    pub fn new(limit: usize, policy: OverflowPolicy) -> Self {
        let initial = if limit == 0 {
            INITIAL_CAPACITY
        } else {
            limit.min(INITIAL_CAPACITY)
        };
        Self {
            slots: Self::allocate(initial),
            head: 0,
            tail: 0,
            len: 0,
            limit,
            policy,
        }
    }

    fn allocate(capacity: usize) -> Vec<Option<T>> {
        std::iter::repeat_with(|| None).take(capacity).collect()
    }

    /// Push a value, growing or applying the overflow policy when full
    pub fn push(&mut self, value: T) -> PushOutcome<T> {
        if self.len == self.slots.len() {
            if self.can_grow() {
                self.grow();
            } else {
                return match self.policy {
                    OverflowPolicy::EvictOldest => match self.pop() {
                        Some(oldest) => {
                            self.insert(value);
                            PushOutcome::Evicted(oldest)
                        }
                        None => {
                            self.insert(value);
                            PushOutcome::Stored
                        }
                    },
                    OverflowPolicy::DropIncoming => PushOutcome::Dropped(value),
                    OverflowPolicy::RaiseError => PushOutcome::Overflow(value),
                };
            }
        }

        self.insert(value);
        PushOutcome::Stored
    }

    fn can_grow(&self) -> bool {
        self.limit == 0 || self.slots.len() < self.limit
    }

    fn insert(&mut self, value: T) {
        self.slots[self.tail] = Some(value);
        self.tail = (self.tail + 1) % self.slots.len();
        self.len += 1;
    }

    /// Double the slot array (capped at the limit), unrolling it so head is 0
    fn grow(&mut self) {
        let current = self.slots.len();
        let mut target = (current * 2).max(1);
        if self.limit > 0 {
            target = target.min(self.limit);
        }

        let mut slots = Self::allocate(target);
        for (i, slot) in slots.iter_mut().enumerate().take(self.len) {
            *slot = self.slots[(self.head + i) % current].take();
        }
        self.slots = slots;
        self.head = 0;
        self.tail = self.len % target;
    }

    /// Remove and return the oldest element
    pub fn pop(&mut self) -> Option<T> {
        if self.len == 0 {
            return None;
        }
        let value = self.slots[self.head].take();
        self.head = (self.head + 1) % self.slots.len();
        self.len -= 1;
        value
    }

    /// Borrow the oldest element
    pub fn peek(&self) -> Option<&T> {
        if self.len == 0 {
            None
        } else {
            self.slots[self.head].as_ref()
        }
    }

    /// Drop every buffered element, keeping the allocation
    pub fn clear(&mut self) {
        while self.pop().is_some() {}
        self.head = 0;
        self.tail = 0;
    }

    /// Number of buffered elements
    pub fn len(&self) -> usize {
        self.len
    }

    /// Check if the buffer is empty
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Whether the buffer holds its maximum number of elements
    pub fn is_full(&self) -> bool {
        self.len == self.slots.len() && !self.can_grow()
    }

    /// Currently allocated slot count
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Configured capacity limit (0 = unbounded)
    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn policy(&self) -> OverflowPolicy {
        self.policy
    }

    /// Iterate from oldest to newest
    pub fn iter(&self) -> impl Iterator<Item = &T> + '_ {
        (0..self.len).filter_map(move |i| self.slots[(self.head + i) % self.slots.len()].as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn contents(buffer: &RingBuffer<i32>) -> Vec<i32> {
        buffer.iter().copied().collect()
    }

    #[test]
    fn test_buffer_push_pop() {
        let mut buffer = RingBuffer::new(10, OverflowPolicy::EvictOldest);
        assert_eq!(buffer.push(42), PushOutcome::Stored);
        assert_eq!(buffer.peek(), Some(&42));
        assert_eq!(buffer.pop(), Some(42));
        assert!(buffer.is_empty());
        assert_eq!(buffer.pop(), None);
    }

    #[test]
    fn test_wraparound_keeps_fifo_order() {
        let mut buffer = RingBuffer::new(4, OverflowPolicy::RaiseError);
        for i in 0..4 {
            buffer.push(i);
        }
        assert_eq!(buffer.pop(), Some(0));
        assert_eq!(buffer.pop(), Some(1));
        buffer.push(4);
        buffer.push(5);
        assert_eq!(contents(&buffer), vec![2, 3, 4, 5]);
        assert!(buffer.len() <= buffer.capacity());
        assert_eq!(buffer.capacity(), 4);
    }

    #[test]
    fn test_unbounded_growth_doubles() {
        let mut buffer = RingBuffer::new(0, OverflowPolicy::RaiseError);
        assert_eq!(buffer.capacity(), INITIAL_CAPACITY);

        // Offset the head so growth has to unroll a wrapped buffer
        for i in 0..10 {
            buffer.push(i);
        }
        for _ in 0..10 {
            buffer.pop();
        }
        for i in 0..(INITIAL_CAPACITY as i32 + 1) {
            assert_eq!(buffer.push(i), PushOutcome::Stored);
        }

        assert_eq!(buffer.capacity(), INITIAL_CAPACITY * 2);
        assert_eq!(contents(&buffer), (0..=INITIAL_CAPACITY as i32).collect::<Vec<_>>());
        assert!(!buffer.is_full());
    }

    #[test]
    fn test_bounded_growth_stops_at_limit() {
        let mut buffer = RingBuffer::new(20, OverflowPolicy::DropIncoming);
        for i in 0..25 {
            buffer.push(i);
        }
        assert_eq!(buffer.capacity(), 20);
        assert_eq!(buffer.len(), 20);
        assert!(buffer.is_full());
    }

    #[test]
    fn test_evict_oldest_policy() {
        let mut buffer = RingBuffer::new(3, OverflowPolicy::EvictOldest);
        buffer.push(1);
        buffer.push(2);
        buffer.push(3);
        assert_eq!(buffer.push(4), PushOutcome::Evicted(1));
        assert_eq!(contents(&buffer), vec![2, 3, 4]);
    }

    #[test]
    fn test_drop_incoming_policy() {
        let mut buffer = RingBuffer::new(3, OverflowPolicy::DropIncoming);
        buffer.push(1);
        buffer.push(2);
        buffer.push(3);
        assert_eq!(buffer.push(4), PushOutcome::Dropped(4));
        assert_eq!(contents(&buffer), vec![1, 2, 3]);
    }

    #[test]
    fn test_raise_error_policy() {
        let mut buffer = RingBuffer::new(2, OverflowPolicy::RaiseError);
        buffer.push(1);
        buffer.push(2);
        assert_eq!(buffer.push(3), PushOutcome::Overflow(3));
        assert_eq!(buffer.len(), 2);
    }

    #[test]
    fn test_clear_resets() {
        let mut buffer = RingBuffer::new(0, OverflowPolicy::EvictOldest);
        for i in 0..5 {
            buffer.push(i);
        }
        buffer.clear();
        assert!(buffer.is_empty());
        buffer.push(9);
        assert_eq!(contents(&buffer), vec![9]);
    }

    #[test]
    fn test_policy_parsing() {
        assert_eq!("evict-oldest".parse::<OverflowPolicy>().unwrap(), OverflowPolicy::EvictOldest);
        assert_eq!("drop-incoming".parse::<OverflowPolicy>().unwrap(), OverflowPolicy::DropIncoming);
        assert_eq!("raise-error".parse::<OverflowPolicy>().unwrap(), OverflowPolicy::RaiseError);
        assert!(matches!(
            "block".parse::<OverflowPolicy>(),
            Err(Error::InvalidArgument(_))
        ));
        assert_eq!(OverflowPolicy::DropIncoming.to_string(), "drop-incoming");
    }
}
