use crate::object::ObjectReference;
use crate::util::constants::*;
use crate::util::conversions;
use crate::util::Address;
use std::sync::atomic::{AtomicU8, Ordering};

/// Block size of the start table. Tied to the card size so card-aligned
/// queries line up with block boundaries.
pub const LOG_BYTES_IN_BLOCK: usize = LOG_BYTES_IN_CARD;
pub const BYTES_IN_BLOCK: usize = 1 << LOG_BYTES_IN_BLOCK;
pub const WORDS_IN_BLOCK: usize = BYTES_IN_BLOCK >> LOG_BYTES_IN_WORD;

/// Marker for a block in which no object starts.
const NO_STARTS: u8 = 0xff;

// Word offsets within a block must fit in the table byte next to the marker.
const _: () = assert!(WORDS_IN_BLOCK < NO_STARTS as usize);

/// Locates object starts in a parsed space.
///
/// One byte per card-sized block records the word offset of the last object
/// start in that block. Entries are written during (single-threaded)
/// allocation and read concurrently, and immutably, during a scavenge.
pub struct ObjectStartArray {
    covered_start: Address,
    covered_end: Address,
    blocks: Box<[AtomicU8]>,
}

impl ObjectStartArray {
    pub fn new(covered_start: Address, covered_end: Address) -> ObjectStartArray {
        assert!(covered_start < covered_end);
        assert!(covered_start.is_aligned_to(BYTES_IN_BLOCK));
        assert!(covered_end.is_aligned_to(BYTES_IN_BLOCK));
        let num_blocks = (covered_end - covered_start) >> LOG_BYTES_IN_BLOCK;
        let blocks = (0..num_blocks).map(|_| AtomicU8::new(NO_STARTS)).collect();
        ObjectStartArray {
            covered_start,
            covered_end,
            blocks,
        }
    }

    fn block_index(&self, addr: Address) -> usize {
        debug_assert!(self.covered_start <= addr && addr < self.covered_end);
        (addr - self.covered_start) >> LOG_BYTES_IN_BLOCK
    }

    fn block_start(&self, block: usize) -> Address {
        self.covered_start + (block << LOG_BYTES_IN_BLOCK)
    }

    /// Record that an object starts at `addr`. Allocation is monotone, so a
    /// new start in a block always supersedes the recorded one.
    pub fn record_object_start(&self, addr: Address) {
        let block = self.block_index(addr);
        let offset = conversions::bytes_to_words(addr - self.block_start(block));
        #[cfg(debug_assertions)]
        {
            let prev = self.blocks[block].load(Ordering::Relaxed);
            debug_assert!(
                prev == NO_STARTS || (prev as usize) < offset,
                "object starts must be recorded in address order"
            );
        }
        self.blocks[block].store(offset as u8, Ordering::Relaxed);
    }

    /// The greatest object start at or below `addr`.
    ///
    /// `addr` must be covered by an object, i.e. lie in the parsed part of
    /// the space.
    pub fn object_start(&self, addr: Address) -> Address {
        let mut block = self.block_index(addr);
        let candidate = loop {
            let offset = self.blocks[block].load(Ordering::Relaxed);
            if offset != NO_STARTS {
                let start = self.block_start(block) + conversions::words_to_bytes(offset as usize);
                if start <= addr {
                    break start;
                }
            }
            assert!(block > 0, "no object start at or below {}", addr);
            block -= 1;
        };
        // The candidate may be several objects short of addr (only the last
        // start per block is recorded); walk forward to the covering object.
        let mut obj = ObjectReference::from_address(candidate);
        while obj.end() <= addr {
            obj = ObjectReference::from_address(obj.end());
        }
        obj.to_address()
    }

    /// Does any object start in `[lo, hi)`? `lo` must be block aligned.
    pub fn object_starts_in_range(&self, lo: Address, hi: Address) -> bool {
        debug_assert!(lo <= hi);
        debug_assert!(lo.is_aligned_to(BYTES_IN_BLOCK));
        if lo == hi {
            return false;
        }
        let first = self.block_index(lo);
        let last = self.block_index(hi - 1usize);
        for block in first..=last {
            let offset = self.blocks[block].load(Ordering::Relaxed);
            if offset == NO_STARTS {
                continue;
            }
            let start = self.block_start(block) + conversions::words_to_bytes(offset as usize);
            debug_assert!(start >= lo);
            if start < hi {
                return true;
            }
        }
        false
    }
}
