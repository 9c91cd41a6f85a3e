#![forbid(unsafe_code)]

//! Bounded identifier issuance.
//!
//! [`IdAllocator`] hands out short integer identifiers from a fixed-capacity
//! pool backed by a bitset. A prefix of the id space can be marked as
//! *reserved* (predefined ids such as dialog button ids): those slots are
//! permanently occupied, so `allocate` never returns them and `free` ignores
//! them.
//!
//! [`MessageCodeAllocator`] issues application-defined message codes from a
//! half-open range. Codes are handed out sequentially and never recycled.
//!
//! Both types are owner-thread state and carry no internal locking.
//!
//! # Example
//!
//! ```
//! use weft_core::ids::IdAllocator;
//!
//! let mut ids = IdAllocator::new(16, 4);
//! let a = ids.allocate().unwrap();
//! assert_eq!(a, 4);
//! ids.free(a);
//! assert_eq!(ids.allocate().unwrap(), 4);
//! ```

/// Errors reported by the identifier allocators.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdError {
    /// Every slot in the pool is held.
    #[error("identifier pool exhausted (capacity {capacity})")]
    Exhausted {
        /// Total pool capacity.
        capacity: u32,
    },
    /// The application-defined message code range is used up.
    #[error("no more application message codes available")]
    MessagesExhausted,
}

const WORD_BITS: u32 = u64::BITS;

/// Fixed-capacity reusable identifier pool.
#[derive(Debug, Clone)]
pub struct IdAllocator {
    words: Vec<u64>,
    capacity: u32,
    reserved: u32,
    in_use: u32,
    /// Index of the lowest word that may contain a free bit.
    hint: usize,
}

impl IdAllocator {
    /// Create a pool of `capacity` ids where `[0, reserved)` is predefined.
    ///
    /// `reserved` is clamped to `capacity`.
    #[must_use]
    pub fn new(capacity: u32, reserved: u32) -> Self {
        let reserved = reserved.min(capacity);
        let word_count = capacity.div_ceil(WORD_BITS) as usize;
        let mut words = vec![0u64; word_count];

        for id in 0..reserved {
            let (w, b) = split(id);
            words[w] |= 1 << b;
        }
        // Bits past `capacity` in the last word are never handed out.
        let tail = capacity % WORD_BITS;
        if tail != 0 {
            if let Some(last) = words.last_mut() {
                *last |= !0u64 << tail;
            }
        }

        Self {
            words,
            capacity,
            reserved,
            in_use: reserved,
            hint: (reserved / WORD_BITS) as usize,
        }
    }

    /// Allocate the lowest free id.
    pub fn allocate(&mut self) -> Result<u32, IdError> {
        for w in self.hint..self.words.len() {
            let word = self.words[w];
            if word == u64::MAX {
                continue;
            }
            let bit = (!word).trailing_zeros();
            self.words[w] |= 1 << bit;
            self.in_use += 1;
            self.hint = w;
            return Ok(w as u32 * WORD_BITS + bit);
        }
        self.hint = self.words.len();
        Err(IdError::Exhausted {
            capacity: self.capacity,
        })
    }

    /// Return `id` to the pool.
    ///
    /// Predefined ids are ignored. Freeing an id that is out of range or not
    /// currently allocated is a programming error and panics.
    #[track_caller]
    pub fn free(&mut self, id: u32) {
        if self.is_reserved(id) {
            return;
        }
        assert!(
            id < self.capacity,
            "weft: freeing id {id} outside pool capacity {}",
            self.capacity
        );
        let (w, b) = split(id);
        assert!(
            self.words[w] & (1 << b) != 0,
            "weft: freeing id {id} that is not allocated"
        );
        self.words[w] &= !(1 << b);
        self.in_use -= 1;
        self.hint = self.hint.min(w);
    }

    /// Whether `id` is currently held (predefined ids always are).
    #[must_use]
    pub fn is_allocated(&self, id: u32) -> bool {
        if id >= self.capacity {
            return false;
        }
        let (w, b) = split(id);
        self.words[w] & (1 << b) != 0
    }

    /// Whether `id` lies in the predefined range.
    #[inline]
    #[must_use]
    pub fn is_reserved(&self, id: u32) -> bool {
        id < self.reserved
    }

    /// Total number of slots, predefined included.
    #[inline]
    #[must_use]
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Number of ids `allocate` can still return.
    #[inline]
    #[must_use]
    pub fn available(&self) -> u32 {
        self.capacity - self.in_use
    }
}

#[inline]
fn split(id: u32) -> (usize, u32) {
    ((id / WORD_BITS) as usize, id % WORD_BITS)
}

/// Sequential issuer of application-defined message codes.
#[derive(Debug, Clone)]
pub struct MessageCodeAllocator {
    next: u32,
    limit: u32,
}

impl MessageCodeAllocator {
    /// Issue codes from `[first, limit)`.
    #[must_use]
    pub const fn new(first: u32, limit: u32) -> Self {
        Self { next: first, limit }
    }

    /// Next unused code.
    pub fn alloc(&mut self) -> Result<u32, IdError> {
        if self.next >= self.limit {
            return Err(IdError::MessagesExhausted);
        }
        let code = self.next;
        self.next += 1;
        Ok(code)
    }

    /// Codes left in the range.
    #[must_use]
    pub fn remaining(&self) -> u32 {
        self.limit.saturating_sub(self.next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocates_lowest_free_after_reserved() {
        let mut ids = IdAllocator::new(128, 12);
        assert_eq!(ids.allocate().unwrap(), 12);
        assert_eq!(ids.allocate().unwrap(), 13);
        assert_eq!(ids.available(), 128 - 14);
    }

    #[test]
    fn exhaustion_on_capacity_plus_one() {
        let mut ids = IdAllocator::new(70, 0);
        for expected in 0..70 {
            assert_eq!(ids.allocate().unwrap(), expected);
        }
        assert_eq!(ids.allocate(), Err(IdError::Exhausted { capacity: 70 }));
        assert_eq!(ids.available(), 0);
    }

    #[test]
    fn freed_id_is_reissued() {
        let mut ids = IdAllocator::new(256, 0);
        let held: Vec<u32> = (0..200).map(|_| ids.allocate().unwrap()).collect();
        ids.free(held[77]);
        assert!(!ids.is_allocated(77));
        assert_eq!(ids.allocate().unwrap(), 77);
    }

    #[test]
    fn freeing_reserved_is_noop() {
        let mut ids = IdAllocator::new(32, 12);
        ids.free(3);
        ids.free(11);
        assert!(ids.is_allocated(3));
        assert_eq!(ids.available(), 20);
        assert_eq!(ids.allocate().unwrap(), 12);
    }

    #[test]
    #[should_panic(expected = "not allocated")]
    fn freeing_unallocated_panics() {
        let mut ids = IdAllocator::new(32, 2);
        ids.free(20);
    }

    #[test]
    #[should_panic(expected = "outside pool capacity")]
    fn freeing_out_of_range_panics() {
        let mut ids = IdAllocator::new(32, 2);
        ids.free(32);
    }

    #[test]
    #[should_panic(expected = "not allocated")]
    fn double_free_panics() {
        let mut ids = IdAllocator::new(32, 0);
        let id = ids.allocate().unwrap();
        ids.free(id);
        ids.free(id);
    }

    #[test]
    fn full_reserved_pool_is_exhausted() {
        let mut ids = IdAllocator::new(8, 8);
        assert!(ids.allocate().is_err());
    }

    #[test]
    fn reserved_clamped_to_capacity() {
        let ids = IdAllocator::new(4, 100);
        assert_eq!(ids.available(), 0);
        assert!(ids.is_reserved(3));
    }

    #[test]
    fn sixteen_bit_space() {
        let mut ids = IdAllocator::new(1 << 16, 12);
        assert_eq!(ids.available(), 65536 - 12);
        assert_eq!(ids.allocate().unwrap(), 12);
    }

    #[test]
    fn message_codes_are_sequential_and_bounded() {
        let mut codes = MessageCodeAllocator::new(0x8000, 0x8003);
        assert_eq!(codes.alloc(), Ok(0x8000));
        assert_eq!(codes.alloc(), Ok(0x8001));
        assert_eq!(codes.remaining(), 1);
        assert_eq!(codes.alloc(), Ok(0x8002));
        assert_eq!(codes.alloc(), Err(IdError::MessagesExhausted));
        assert_eq!(codes.alloc(), Err(IdError::MessagesExhausted));
    }
}
