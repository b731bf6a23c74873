use crate::object::ObjectReference;
use crate::util::constants::*;
use crate::util::conversions;
use crate::util::Address;
use atomic::{Atomic, Ordering};
use std::alloc::{alloc_zeroed, dealloc, Layout};

/// A contiguous, card-aligned, zero-initialized heap region with bump-pointer
/// allocation.
///
/// `[bottom, top)` is fully parsed: it contains objects with no gaps. Memory
/// in `[top, end)` is unallocated. Callers that scan concurrently pass an
/// explicit upper bound so the region above it is never walked.
pub struct MutableSpace {
    base: *mut u8,
    layout: Layout,
    start: Address,
    end: Address,
    top: Atomic<Address>,
}

// The raw base pointer is only written through `Address` stores during
// single-threaded heap construction; scavenge workers share the space
// read-only under stop-the-world.
unsafe impl Send for MutableSpace {}
unsafe impl Sync for MutableSpace {}

impl MutableSpace {
    /// Reserve and zero `extent_bytes` of heap, card-aligned at both ends.
    pub fn new(extent_bytes: usize) -> MutableSpace {
        assert!(
            extent_bytes > 0 && extent_bytes % BYTES_IN_CARD == 0,
            "space extent must be a positive multiple of the card size"
        );
        let layout = Layout::from_size_align(extent_bytes, BYTES_IN_CARD).unwrap();
        let base = unsafe { alloc_zeroed(layout) };
        assert!(!base.is_null(), "failed to reserve {} bytes of heap", extent_bytes);
        let start = Address::from_ptr(base);
        MutableSpace {
            base,
            layout,
            start,
            end: start + extent_bytes,
            top: Atomic::new(start),
        }
    }

    pub fn bottom(&self) -> Address {
        self.start
    }

    pub fn end(&self) -> Address {
        self.end
    }

    /// Current allocation high-water mark.
    pub fn top(&self) -> Address {
        self.top.load(Ordering::Relaxed)
    }

    pub fn contains(&self, addr: Address) -> bool {
        self.start <= addr && addr < self.end
    }

    /// Bump-allocate `words` words. Returns [`Address::ZERO`] when the space
    /// is exhausted.
    pub fn allocate(&self, words: usize) -> Address {
        let bytes = conversions::words_to_bytes(words);
        let mut old = self.top.load(Ordering::Relaxed);
        loop {
            let new = old + bytes;
            if new > self.end {
                return Address::ZERO;
            }
            match self
                .top
                .compare_exchange_weak(old, new, Ordering::Relaxed, Ordering::Relaxed)
            {
                Ok(_) => return old,
                Err(cur) => old = cur,
            }
        }
    }

    /// Visit every object in `[bottom, top)` in address order.
    ///
    /// `bottom` must be an object start and the region must be fully parsed.
    pub fn object_iterate<F: FnMut(ObjectReference)>(&self, mut f: F) {
        let top = self.top();
        let mut addr = self.bottom();
        while addr < top {
            let obj = ObjectReference::from_address(addr);
            f(obj);
            addr = obj.end();
        }
        debug_assert!(addr == top, "object walk overshot the space top");
    }
}

impl Drop for MutableSpace {
    fn drop(&mut self) {
        unsafe { dealloc(self.base, self.layout) }
    }
}
