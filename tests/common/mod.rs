//! Shared heap fixture for the stripe-driver and verifier tests.

#![allow(dead_code)]

use cardwalk::card_table::{CardTable, CardValue};
use cardwalk::heap::{MutableSpace, ObjectStartArray};
use cardwalk::object::{self, ObjectReference};
use cardwalk::promotion::StackPromotionManager;
use cardwalk::util::constants::*;
use cardwalk::util::conversions;
use cardwalk::util::Address;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// An old space with its card table and start array, plus a young space for
/// reference targets.
pub struct GenHeap {
    pub old: MutableSpace,
    pub young: MutableSpace,
    pub start_array: ObjectStartArray,
    pub card_table: CardTable,
}

impl GenHeap {
    pub fn new(old_words: usize) -> GenHeap {
        let old = MutableSpace::new(conversions::words_to_bytes(old_words));
        let young = MutableSpace::new(conversions::words_to_bytes(4 * WORDS_IN_CARD));
        let start_array = ObjectStartArray::new(old.bottom(), old.end());
        let card_table = CardTable::new(old.bottom(), old.end());
        GenHeap {
            old,
            young,
            start_array,
            card_table,
        }
    }

    pub fn alloc_scalar(&self, words: usize) -> ObjectReference {
        let addr = self.old.allocate(words);
        assert!(!addr.is_zero(), "old space exhausted");
        self.start_array.record_object_start(addr);
        unsafe { object::init_scalar(addr, words) }
    }

    pub fn alloc_obj_array(&self, words: usize) -> ObjectReference {
        let addr = self.old.allocate(words);
        assert!(!addr.is_zero(), "old space exhausted");
        self.start_array.record_object_start(addr);
        unsafe { object::init_obj_array(addr, words) }
    }

    /// An address inside young space.
    pub fn young_target(&self, offset_words: usize) -> Address {
        let target = self.young.bottom() + conversions::words_to_bytes(offset_words);
        assert!(self.young.contains(target));
        target
    }

    /// Store a reference, dirtying the slot's card the way the write barrier
    /// does.
    pub fn store_ref(&self, obj: ObjectReference, slot: usize, target: Address) {
        let slot = obj.slot(slot);
        unsafe { slot.store::<Address>(target) };
        self.card_table.mark_dirty(slot);
    }

    /// Store without the barrier, to model stale card state.
    pub fn store_ref_quietly(&self, obj: ObjectReference, slot: usize, target: Address) {
        let slot = obj.slot(slot);
        unsafe { slot.store::<Address>(target) };
    }

    pub fn card_of(&self, addr: Address) -> usize {
        self.card_table.index_for(addr)
    }

    pub fn snapshot(&self) -> Vec<CardValue> {
        (0..self.card_table.num_cards())
            .map(|card| self.card_table.card(card))
            .collect()
    }

    /// Run one worker's stripe walk to completion and return the young slots
    /// it found, sorted.
    pub fn run_stripe(&self, stripe: usize, n_stripes: usize) -> Vec<Address> {
        let mut slots = Vec::new();
        let mut pm = StackPromotionManager::new(&self.card_table, &self.young, |slot: Address| {
            slots.push(slot)
        });
        self.card_table.scavenge_contents_parallel(
            &self.start_array,
            &self.old,
            self.old.top(),
            &mut pm,
            stripe,
            n_stripes,
        );
        pm.drain_stacks();
        pm.into_visitor();
        slots.sort();
        slots
    }

    /// Run every stripe on its own thread, as the collector's worker team
    /// would, and return the union of young slots found, sorted.
    pub fn scavenge(&self, n_stripes: usize) -> Vec<Address> {
        let top = self.old.top();
        let mut all: Vec<Address> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..n_stripes)
                .map(|stripe| {
                    s.spawn(move || {
                        let mut slots = Vec::new();
                        let mut pm = StackPromotionManager::new(
                            &self.card_table,
                            &self.young,
                            |slot: Address| slots.push(slot),
                        );
                        self.card_table.scavenge_contents_parallel(
                            &self.start_array,
                            &self.old,
                            top,
                            &mut pm,
                            stripe,
                            n_stripes,
                        );
                        pm.drain_stacks();
                        pm.into_visitor();
                        slots
                    })
                })
                .collect();
            handles.into_iter().flat_map(|h| h.join().unwrap()).collect()
        });
        all.sort();
        all
    }

    /// Every old-space slot pointing into young space, by a naive full walk.
    pub fn all_young_slots(&self) -> Vec<Address> {
        let mut slots = Vec::new();
        self.old.object_iterate(|obj| {
            obj.iterate_references(|slot| {
                let target = unsafe { slot.load::<Address>() };
                if !target.is_zero() && self.young.contains(target) {
                    slots.push(slot);
                }
            })
        });
        slots.sort();
        slots
    }
}

/// `slots` must be sorted.
pub fn assert_unique(slots: &[Address]) {
    for pair in slots.windows(2) {
        assert!(pair[0] != pair[1], "slot {} reported twice", pair[0]);
    }
}

/// Fill a heap with a random object graph. Young references always go
/// through the barrier, so every young slot lies on an initially dirty card.
pub fn build_random_heap(seed: u64, old_words: usize, with_young_refs: bool) -> GenHeap {
    let heap = GenHeap::new(old_words);
    let mut rng = StdRng::seed_from_u64(seed);
    loop {
        let remaining = conversions::bytes_to_words(heap.old.end() - heap.old.top());
        if remaining < 2 {
            break;
        }
        let obj = if remaining > 2 * WORDS_IN_STRIPE && rng.gen_ratio(1, 12) {
            heap.alloc_obj_array(rng.gen_range(WORDS_IN_STRIPE..2 * WORDS_IN_STRIPE))
        } else if remaining > 512 && rng.gen_ratio(1, 6) {
            heap.alloc_obj_array(rng.gen_range(64..512))
        } else {
            heap.alloc_scalar(rng.gen_range(2..=remaining.min(96)))
        };
        let slots = obj.slot_count();
        for _ in 0..slots.min(4) {
            let index = rng.gen_range(0..slots);
            if with_young_refs && rng.gen_ratio(1, 2) {
                let target = heap.young_target(rng.gen_range(0..4 * WORDS_IN_CARD));
                heap.store_ref(obj, index, target);
            } else {
                heap.store_ref(obj, index, heap.old.bottom());
            }
        }
    }
    // Stray dirt with no references behind it.
    for _ in 0..24 {
        let card = rng.gen_range(0..heap.card_table.num_cards());
        heap.card_table.mark_dirty(heap.card_table.addr_for(card));
    }
    heap
}
