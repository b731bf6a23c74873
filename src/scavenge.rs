//! Stripe-parallel scavenge of old-space dirty cards.
//!
//! The old space is divided into slices, each slice into one stripe per
//! worker:
//!
//! ```text
//!   +============+  slice 0
//!   |  stripe 0  |
//!   |  stripe 1  |
//!   |  stripe 2  |
//!   +============+  slice 1
//!   |  stripe 0  |
//!   |  stripe 1  |
//!   |  stripe 2  |
//!   +============+  ...
//! ```
//!
//! Worker `k` walks stripe `k` of every slice, advancing by the slice size,
//! until it passes the space top. Objects starting in a stripe are scanned
//! completely and exclusively by the stripe's worker even where they extend
//! past the stripe end. Large object arrays are the one exception: every
//! worker scans only the array elements lying on its own stripes.
//!
//! Workers share the card table but never write the same card: clearing is
//! bounded by per-stripe clear limits that exclude cards shared with a
//! neighboring stripe's objects.

use crate::card_table::{CardTable, CardValue};
use crate::heap::{MutableSpace, ObjectStartArray};
use crate::object::ObjectReference;
use crate::promotion::PromotionManager;
use crate::util::constants::*;
use crate::util::conversions;
use crate::util::Address;

/// Caches the object resolved by the previous start-array query. Stripes
/// covered by one huge object are frequent, and their covering-object
/// lookups repeat; queries are monotone within a worker, so a single entry
/// suffices.
struct StartCache {
    obj_start: Address,
    obj_end: Address,
    #[cfg(debug_assertions)]
    prev_query: Address,
}

impl StartCache {
    fn new() -> StartCache {
        StartCache {
            obj_start: Address::ZERO,
            obj_end: Address::ZERO,
            #[cfg(debug_assertions)]
            prev_query: Address::ZERO,
        }
    }

    fn object_start(&mut self, addr: Address, start_array: &ObjectStartArray) -> Address {
        #[cfg(debug_assertions)]
        {
            debug_assert!(
                self.prev_query.is_zero() || self.prev_query <= addr,
                "start cache queried out of order"
            );
            self.prev_query = addr;
        }
        if addr >= self.obj_end {
            self.obj_start = start_array.object_start(addr);
            self.obj_end = ObjectReference::from_address(self.obj_start).end();
        }
        self.obj_start
    }
}

impl CardTable {
    /// Scavenge the stripes owned by `stripe_index` out of `n_stripes`.
    ///
    /// Runs on one stop-the-world worker; workers with distinct stripe
    /// indices may run concurrently with no further coordination. `space_top`
    /// bounds the walk: memory above it (promotion scratch) is unparseable
    /// and is never touched.
    pub fn scavenge_contents_parallel<P: PromotionManager>(
        &self,
        start_array: &ObjectStartArray,
        space: &MutableSpace,
        space_top: Address,
        pm: &mut P,
        stripe_index: usize,
        n_stripes: usize,
    ) {
        debug_assert!(stripe_index < n_stripes);
        debug_assert!(space.bottom() <= space_top && space_top <= space.end());

        #[cfg(feature = "sanity")]
        let _stripe_guard = stripe_tracker::enter_stripe(stripe_index);

        let stripe_size_in_bytes = conversions::words_to_bytes(WORDS_IN_STRIPE);
        let slice_size_in_bytes = stripe_size_in_bytes * n_stripes;

        let mut start_cache = StartCache::new();
        let mut cur_stripe_addr = space.bottom() + stripe_index * stripe_size_in_bytes;

        trace!(
            "scavenging stripe {}/{} of [{}, {})",
            stripe_index,
            n_stripes,
            space.bottom(),
            space_top
        );

        while cur_stripe_addr < space_top {
            let cur_stripe_end_addr =
                std::cmp::min(cur_stripe_addr + stripe_size_in_bytes, space_top);
            self.scavenge_stripe(
                start_array,
                &mut start_cache,
                pm,
                cur_stripe_addr,
                cur_stripe_end_addr,
                space_top,
            );
            cur_stripe_addr += slice_size_in_bytes;
        }
    }

    fn scavenge_stripe<P: PromotionManager>(
        &self,
        start_array: &ObjectStartArray,
        start_cache: &mut StartCache,
        pm: &mut P,
        cur_stripe_addr: Address,
        cur_stripe_end_addr: Address,
        space_top: Address,
    ) {
        if !start_array.object_starts_in_range(cur_stripe_addr, cur_stripe_end_addr) {
            // No object starts here, so a single object covers the stripe.
            // Nothing to own, unless it is a large object array: then its
            // elements on this stripe are this worker's share.
            let covering = ObjectReference::from_address(
                start_cache.object_start(cur_stripe_addr, start_array),
            );
            if self.is_large_obj_array(covering) {
                self.scavenge_large_array_contents(
                    covering,
                    pm,
                    cur_stripe_addr,
                    cur_stripe_end_addr,
                    space_top,
                    false,
                );
            }
            return;
        }

        // Constraints for the rest of this stripe:
        // cards probed for dirty state:  [iter_limit_l, iter_limit_r)
        // cards that may be cleared:     [clear_limit_l, clear_limit_r)
        // objects scanned, by start:     [first_obj_addr, cur_stripe_end_addr)
        // large-array elements scanned:  [cur_stripe_addr, cur_stripe_end_addr),
        //                                limited to dirty cards

        // Left limits, and the first object starting inside this stripe.
        let mut first_obj_addr = start_array.object_start(cur_stripe_addr);
        let iter_limit_l;
        let clear_limit_l;
        if first_obj_addr < cur_stripe_addr {
            let first_obj = ObjectReference::from_address(first_obj_addr);
            // Straddles in from a previous stripe, whose worker scans it --
            // except the elements of a large object array on this stripe.
            if self.is_large_obj_array(first_obj) {
                self.scavenge_large_array_contents(
                    first_obj,
                    pm,
                    cur_stripe_addr,
                    cur_stripe_end_addr,
                    space_top,
                    false,
                );
            }
            // The straddler's last card may be shared with the first object
            // that starts here. The previous stripe's worker may still scan
            // that card, so it must not be cleared from this stripe.
            first_obj_addr = first_obj.end();
            clear_limit_l = self.index_for(first_obj_addr - 1usize) + 1;
            iter_limit_l = self.index_for(first_obj_addr);
        } else {
            debug_assert!(first_obj_addr == cur_stripe_addr);
            iter_limit_l = self.index_for(cur_stripe_addr);
            clear_limit_l = iter_limit_l;
        }

        debug_assert!(cur_stripe_addr <= first_obj_addr);
        debug_assert!(first_obj_addr <= cur_stripe_end_addr);

        // Right limits; detect a large object array covering the stripe tail.
        let mut large_arr: Option<ObjectReference> = None;
        let mut large_arr_cleared_first_card = false;
        let iter_limit_r;
        let clear_limit_r;
        {
            let tail = ObjectReference::from_address(
                start_array.object_start(cur_stripe_end_addr - 1usize),
            );
            if self.is_large_obj_array(tail) {
                if tail.to_address() < cur_stripe_addr {
                    // A tail array from a lower stripe spans this whole
                    // stripe, so the starts found above cannot exist.
                    debug_assert!(
                        tail.to_address() == start_array.object_start(cur_stripe_addr),
                        "tail array must cover the stripe"
                    );
                    return;
                }
                // The array's elements are scanned after the objects before
                // it. Its first card, when shared with those objects, gets
                // cleared by the chunk walk below; remember that for the
                // element pass.
                let tail_addr = tail.to_address();
                large_arr = Some(tail);
                large_arr_cleared_first_card = !Self::is_card_aligned(tail_addr)
                    && self.card(self.index_for(tail_addr)) != CardValue::Clean;
                iter_limit_r = self.index_for(tail_addr - 1usize) + 1;
                clear_limit_r = iter_limit_r;
            } else {
                let tail_end = tail.end();
                debug_assert!(tail_end >= cur_stripe_end_addr);
                clear_limit_r = self.index_for(tail_end);
                iter_limit_r = self.index_for(tail_end - 1usize) + 1;
            }
        }

        debug_assert!(
            iter_limit_l <= clear_limit_l && clear_limit_r <= iter_limit_r,
            "cards may only be cleared where they are iterated"
        );

        // Walk dirty chunks [dirty_l, dirty_r) inside [iter_limit_l, iter_limit_r).
        let mut cur_card = iter_limit_l;
        while cur_card < iter_limit_r {
            let dirty_l = self.find_first_dirty_card(cur_card, iter_limit_r);
            let dirty_r = self.find_dirty_chunk_end(start_array, dirty_l, iter_limit_r);
            debug_assert!(dirty_l <= dirty_r);

            if dirty_l == dirty_r {
                debug_assert!(dirty_r == iter_limit_r, "no dirty cards left in this stripe");
                break;
            }

            debug_assert!(self.card(dirty_l) != CardValue::Clean);
            // The chunk-end card is clean, belongs to the next stripe, or was
            // re-marked newgen by another worker tracing a straddler's slot.
            debug_assert!(
                dirty_r >= clear_limit_r
                    || matches!(self.card(dirty_r), CardValue::Clean | CardValue::Newgen)
            );

            // 1. Clear the chunk, subject to the stripe's clear limits.
            self.clear_cards(dirty_l.max(clear_limit_l), dirty_r.min(clear_limit_r));

            // 2. Scan the objects overlapping the chunk, bounded to starts
            //    owned by this stripe and excluding a large array tail.
            let obj_l = std::cmp::max(
                start_array.object_start(self.addr_for(dirty_l)),
                first_obj_addr,
            );
            let obj_r = std::cmp::min(
                self.addr_for(dirty_r),
                match large_arr {
                    Some(arr) => arr.to_address(),
                    None => cur_stripe_end_addr,
                },
            );
            self.scan_objects_in_range(pm, obj_l, obj_r);

            cur_card = dirty_r + 1;
        }

        if let Some(arr) = large_arr {
            self.scavenge_large_array_contents(
                arr,
                pm,
                cur_stripe_addr,
                cur_stripe_end_addr,
                space_top,
                large_arr_cleared_first_card,
            );
        }
    }

    /// Push every object starting in `[start, end)`.
    ///
    /// `start` must be an object start and no object may straddle `end`.
    fn scan_objects_in_range<P: PromotionManager>(&self, pm: &mut P, start: Address, end: Address) {
        let mut obj_addr = start;
        while obj_addr < end {
            let obj = ObjectReference::from_address(obj_addr);
            debug_assert!(
                !self.is_large_obj_array(obj),
                "large object arrays are scanned slice by slice"
            );
            pm.push_contents(obj);
            obj_addr = obj.end();
        }
        pm.drain_stacks_cond_depth();
    }

    /// Scan the elements of `large_arr` that lie on this stripe, limited to
    /// dirty cards. Every stripe the array intersects runs this for its own
    /// slice, so the array's elements split naturally across workers.
    fn scavenge_large_array_contents<P: PromotionManager>(
        &self,
        large_arr: ObjectReference,
        pm: &mut P,
        stripe_addr: Address,
        stripe_end_addr: Address,
        space_top: Address,
        first_card_already_cleared: bool,
    ) {
        debug_assert!(self.is_large_obj_array(large_arr));
        debug_assert!(Self::is_card_aligned(stripe_addr));
        debug_assert!(Self::is_card_aligned(stripe_end_addr) || stripe_end_addr == space_top);

        let arr_addr = large_arr.to_address();
        let arr_end_addr = large_arr.end();

        let mut iter_limit_l = self.index_for(stripe_addr);
        let mut iter_limit_r = self.index_for(stripe_end_addr - 1usize) + 1;
        let mut clear_limit_l = iter_limit_l;
        let mut clear_limit_r = self.index_for(stripe_end_addr);

        // Left limits when the array starts inside this stripe. A first card
        // already cleared by the stripe walk still holds unscanned prefix
        // elements; push them here and move past that card.
        if stripe_addr <= arr_addr {
            if first_card_already_cleared {
                debug_assert!(
                    !Self::is_card_aligned(arr_addr),
                    "an exclusive first card is never pre-cleared"
                );
                iter_limit_l = self.index_for(arr_addr) + 1;
                clear_limit_l = iter_limit_l;
                pm.push_obj_array_contents(
                    large_arr,
                    arr_addr,
                    arr_addr.align_up(BYTES_IN_CARD),
                );
            } else {
                iter_limit_l = self.index_for(arr_addr);
                clear_limit_l = self.index_for(arr_addr - 1usize) + 1;
            }
        }

        // Right limits when the array ends inside this stripe.
        if arr_end_addr <= stripe_end_addr {
            clear_limit_r = self.index_for(arr_end_addr);
            iter_limit_r = self.index_for(arr_end_addr - 1usize) + 1;
        }

        // Walk dirty chunks exactly like the stripe walk, but push element
        // slices instead of whole objects. Elements never straddle object
        // boundaries, so the plain byte-wise clean-card search is enough.
        let mut cur_card = iter_limit_l;
        while cur_card < iter_limit_r {
            let dirty_l = self.find_first_dirty_card(cur_card, iter_limit_r);
            let dirty_r = self.find_first_clean_card(dirty_l, iter_limit_r);
            debug_assert!(dirty_l <= dirty_r);

            if dirty_l == dirty_r {
                debug_assert!(dirty_r == iter_limit_r, "no dirty cards left in this stripe");
                break;
            }

            debug_assert!(self.card(dirty_l) != CardValue::Clean);

            self.clear_cards(dirty_l.max(clear_limit_l), dirty_r.min(clear_limit_r));
            pm.push_obj_array_contents(large_arr, self.addr_for(dirty_l), self.addr_for(dirty_r));

            cur_card = dirty_r + 1;
        }
    }
}

#[cfg(feature = "sanity")]
mod stripe_tracker {
    use std::cell::Cell;

    thread_local! {
        static CURRENT_STRIPE: Cell<Option<usize>> = Cell::new(None);
    }

    pub(crate) fn current_stripe() -> Option<usize> {
        CURRENT_STRIPE.with(|c| c.get())
    }

    pub(crate) struct StripeGuard;

    pub(crate) fn enter_stripe(stripe: usize) -> StripeGuard {
        CURRENT_STRIPE.with(|c| c.set(Some(stripe)));
        StripeGuard
    }

    impl Drop for StripeGuard {
        fn drop(&mut self) {
            CURRENT_STRIPE.with(|c| c.set(None));
        }
    }
}

#[cfg(feature = "sanity")]
pub(crate) use stripe_tracker::current_stripe;
