//! Minimal object model for old-space scanning.
//!
//! Objects are self-delimiting: a one-word header encodes the object's total
//! size in words and whether it is an object array. Every word after the
//! header is a reference slot (zero means null), so scanning and reference
//! iteration need no per-type layout information. There are no gaps between
//! objects in a parsed space.

use crate::util::constants::*;
use crate::util::conversions;
use crate::util::Address;
use std::fmt;

/// Words occupied by the object header.
pub const HEADER_WORDS: usize = 1;

const OBJ_ARRAY_MASK: usize = 0b1;
const SIZE_SHIFT: usize = 1;

/// A reference to the start of an object in the heap.
#[repr(transparent)]
#[derive(Copy, Clone, Eq, Hash, PartialEq, PartialOrd, Ord)]
pub struct ObjectReference(Address);

/// Write a scalar object header at `addr`.
///
/// # Safety
/// `addr` must point to `size_words` words of owned, otherwise-unused heap
/// memory.
pub unsafe fn init_scalar(addr: Address, size_words: usize) -> ObjectReference {
    init(addr, size_words, 0)
}

/// Write an object-array header at `addr`. All `size_words - HEADER_WORDS`
/// body words are elements.
///
/// # Safety
/// Same as [`init_scalar`].
pub unsafe fn init_obj_array(addr: Address, size_words: usize) -> ObjectReference {
    init(addr, size_words, OBJ_ARRAY_MASK)
}

unsafe fn init(addr: Address, size_words: usize, kind: usize) -> ObjectReference {
    debug_assert!(size_words > HEADER_WORDS, "object must have a body");
    debug_assert!(addr.is_aligned_to(BYTES_IN_WORD));
    addr.store::<usize>(size_words << SIZE_SHIFT | kind);
    ObjectReference(addr)
}

impl ObjectReference {
    pub fn from_address(addr: Address) -> ObjectReference {
        debug_assert!(!addr.is_zero());
        ObjectReference(addr)
    }

    pub fn to_address(self) -> Address {
        self.0
    }

    fn header(self) -> usize {
        unsafe { self.0.load::<usize>() }
    }

    /// Self-reported size in words, header included.
    pub fn size(self) -> usize {
        let size = self.header() >> SIZE_SHIFT;
        debug_assert!(size > HEADER_WORDS, "header at {} is not an object", self.0);
        size
    }

    pub fn is_obj_array(self) -> bool {
        self.header() & OBJ_ARRAY_MASK != 0
    }

    /// First address past the object.
    pub fn end(self) -> Address {
        self.0 + conversions::words_to_bytes(self.size())
    }

    /// Address of the first reference slot.
    pub fn slots_start(self) -> Address {
        self.0 + conversions::words_to_bytes(HEADER_WORDS)
    }

    pub fn slot_count(self) -> usize {
        self.size() - HEADER_WORDS
    }

    /// Address of reference slot `index`.
    pub fn slot(self, index: usize) -> Address {
        debug_assert!(index < self.slot_count());
        self.slots_start() + conversions::words_to_bytes(index)
    }

    /// Visit the address of every reference slot.
    pub fn iterate_references<F: FnMut(Address)>(self, mut f: F) {
        let mut slot = self.slots_start();
        let end = self.end();
        while slot < end {
            f(slot);
            slot += BYTES_IN_WORD;
        }
    }

    /// Visit the address of every reference slot inside `[left, right)`,
    /// clipped to the object's body. Used for array slices whose card-aligned
    /// bounds may cover the header or run past the object.
    pub fn iterate_reference_range<F: FnMut(Address)>(self, left: Address, right: Address, mut f: F) {
        let mut slot = std::cmp::max(left, self.slots_start());
        let end = std::cmp::min(right, self.end());
        debug_assert!(slot.is_aligned_to(BYTES_IN_WORD));
        while slot < end {
            f(slot);
            slot += BYTES_IN_WORD;
        }
    }
}

impl fmt::Debug for ObjectReference {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heap::MutableSpace;
    use crate::util::constants::*;
    use crate::util::conversions;

    #[test]
    fn header_round_trip() {
        let space = MutableSpace::new(conversions::words_to_bytes(WORDS_IN_CARD));
        let addr = space.allocate(10);
        let obj = unsafe { init_scalar(addr, 10) };
        assert_eq!(obj.size(), 10);
        assert!(!obj.is_obj_array());
        assert_eq!(obj.slot_count(), 9);
        assert_eq!(obj.end(), addr + conversions::words_to_bytes(10));

        let arr_addr = space.allocate(20);
        let arr = unsafe { init_obj_array(arr_addr, 20) };
        assert!(arr.is_obj_array());
        assert_eq!(arr.size(), 20);
    }

    #[test]
    fn reference_iteration_visits_every_slot() {
        let space = MutableSpace::new(conversions::words_to_bytes(WORDS_IN_CARD));
        let obj = unsafe { init_scalar(space.allocate(5), 5) };
        let mut visited = Vec::new();
        obj.iterate_references(|slot| visited.push(slot));
        assert_eq!(visited, (0..4).map(|i| obj.slot(i)).collect::<Vec<_>>());
    }

    #[test]
    fn range_iteration_clips_to_body() {
        let space = MutableSpace::new(conversions::words_to_bytes(WORDS_IN_CARD));
        let arr = unsafe { init_obj_array(space.allocate(8), 8) };
        let mut visited = Vec::new();
        // Range starts at the header and overshoots the end; only body slots
        // may be visited.
        arr.iterate_reference_range(arr.to_address(), arr.end() + BYTES_IN_WORD, |slot| {
            visited.push(slot)
        });
        assert_eq!(visited.len(), arr.slot_count());
        assert_eq!(visited[0], arr.slots_start());
    }
}
