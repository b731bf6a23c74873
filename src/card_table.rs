//! The card table: a byte per card of old space, recording which cards may
//! hold young-pointing references.
//!
//! The write barrier dirties a card when a reference is stored into it. A
//! scavenge scans the objects overlapping dirty cards, clears the cards that
//! will stay clean, and re-marks cards whose references still point into
//! young space. Cards are addressed by index; the address arithmetic is
//! confined to [`index_for`](CardTable::index_for) and
//! [`addr_for`](CardTable::addr_for).

use atomic::{Atomic, Ordering};
use bytemuck::NoUninit;

use crate::heap::ObjectStartArray;
use crate::object::ObjectReference;
use crate::util::constants::*;
use crate::util::Address;

/// State of a single card.
#[repr(u8)]
#[derive(Copy, Clone, PartialEq, Eq, Debug, NoUninit)]
pub enum CardValue {
    /// No young-pointing store since the last scavenge.
    Clean = 0,
    /// May contain young-pointing references; must be scanned.
    Dirty = 1,
    /// Holds a reference known to point into young space.
    Newgen = 2,
    /// Transient marker used by precise verification. Invalid outside it.
    Verify = 3,
}

pub struct CardTable {
    covered_start: Address,
    covered_end: Address,
    cards: Box<[Atomic<CardValue>]>,
    /// Word-size threshold above which an object array is scanned slice by
    /// slice, stripe by stripe, instead of by a single owner.
    large_obj_array_min_words: usize,
    /// Stripe that last cleared each card, offset by one (zero: unclaimed).
    #[cfg(feature = "sanity")]
    card_owners: Box<[std::sync::atomic::AtomicUsize]>,
}

impl CardTable {
    /// Build a table covering `[covered_start, covered_end)`, all cards clean.
    pub fn new(covered_start: Address, covered_end: Address) -> CardTable {
        assert!(covered_start < covered_end);
        assert!(covered_start.is_aligned_to(BYTES_IN_CARD));
        assert!(covered_end.is_aligned_to(BYTES_IN_CARD));
        let num_cards = (covered_end - covered_start) >> LOG_BYTES_IN_CARD;
        CardTable {
            covered_start,
            covered_end,
            cards: (0..num_cards).map(|_| Atomic::new(CardValue::Clean)).collect(),
            large_obj_array_min_words: WORDS_IN_STRIPE,
            #[cfg(feature = "sanity")]
            card_owners: (0..num_cards)
                .map(|_| std::sync::atomic::AtomicUsize::new(0))
                .collect(),
        }
    }

    pub fn num_cards(&self) -> usize {
        self.cards.len()
    }

    /// Index of the card containing `addr`. `covered_end` maps to the
    /// one-past-last index so exclusive limits can be formed from it.
    pub fn index_for(&self, addr: Address) -> usize {
        debug_assert!(self.covered_start <= addr && addr <= self.covered_end);
        (addr - self.covered_start) >> LOG_BYTES_IN_CARD
    }

    /// Address of the first word of card `card`.
    pub fn addr_for(&self, card: usize) -> Address {
        debug_assert!(card <= self.num_cards());
        self.covered_start + (card << LOG_BYTES_IN_CARD)
    }

    pub fn is_card_aligned(addr: Address) -> bool {
        addr.is_aligned_to(BYTES_IN_CARD)
    }

    pub fn card(&self, card: usize) -> CardValue {
        self.cards[card].load(Ordering::Relaxed)
    }

    pub(crate) fn set(&self, card: usize, value: CardValue) {
        self.cards[card].store(value, Ordering::Relaxed);
    }

    /// Dirty the card containing `addr`. This is the write barrier's slow
    /// path; the barrier itself lives with the mutator.
    pub fn mark_dirty(&self, addr: Address) {
        self.set(self.index_for(addr), CardValue::Dirty);
    }

    /// Record that the card containing `slot` holds a reference into young
    /// space. Racing stores from other workers write the same value.
    pub fn set_card_newgen(&self, slot: Address) {
        self.set(self.index_for(slot), CardValue::Newgen);
    }

    /// Raise the large-array classification threshold. The threshold may not
    /// drop below one stripe of words: a smaller array could start and end
    /// inside a single stripe, where slice scanning has no owner stripe.
    pub fn set_large_obj_array_min_words(&mut self, words: usize) {
        assert!(
            words >= WORDS_IN_STRIPE,
            "large object arrays must span at least one full stripe"
        );
        self.large_obj_array_min_words = words;
    }

    /// An object array big enough that cooperative per-stripe element
    /// scanning pays off.
    pub fn is_large_obj_array(&self, obj: ObjectReference) -> bool {
        obj.is_obj_array() && obj.size() >= self.large_obj_array_min_words
    }

    /// Write clean to every card in `[start, end)`. No fences; visibility
    /// comes from the stop-the-world barriers around the scavenge.
    pub fn clear_cards(&self, start: usize, end: usize) {
        debug_assert!(end <= self.num_cards());
        for card in start..end {
            #[cfg(feature = "sanity")]
            self.claim_card_for_current_stripe(card);
            self.set(card, CardValue::Clean);
        }
    }

    /// First card in `[start, end)` that is not clean, or `end`.
    pub fn find_first_dirty_card(&self, start: usize, end: usize) -> usize {
        debug_assert!(end <= self.num_cards());
        for card in start..end {
            if self.card(card) != CardValue::Clean {
                return card;
            }
        }
        end
    }

    /// First clean card in `[start, end)`, or `end`.
    pub fn find_first_clean_card(&self, start: usize, end: usize) -> usize {
        debug_assert!(end <= self.num_cards());
        for card in start..end {
            if self.card(card) == CardValue::Clean {
                return card;
            }
        }
        end
    }

    /// Exclusive end of the dirty chunk beginning at `start`: the first card
    /// in `(start, end)` that is clean and not covered by an object whose
    /// start lies on a preceding dirty card. A clean card inside such an
    /// object does not terminate the chunk, so a straddling object is always
    /// scanned by a single chunk.
    pub fn find_dirty_chunk_end(
        &self,
        start_array: &ObjectStartArray,
        start: usize,
        end: usize,
    ) -> usize {
        debug_assert!(
            start == end || self.card(start) != CardValue::Clean,
            "chunk must begin on a dirty card"
        );
        let mut card = start + 1;
        while card < end {
            if self.card(card) != CardValue::Clean {
                card += 1;
                continue;
            }
            debug_assert!(self.card(card - 1) != CardValue::Clean);
            // Final object on the previous dirty card.
            let obj =
                ObjectReference::from_address(start_array.object_start(self.addr_for(card) - 1usize));
            let final_card_by_obj = self.index_for(obj.end() - 1usize);
            debug_assert!(final_card_by_obj < end);
            if final_card_by_obj <= card {
                return card;
            }
            // The object extends past this clean card; all of its cards count
            // as dirty.
            if self.card(final_card_by_obj) == CardValue::Clean {
                return final_card_by_obj;
            }
            card = final_card_by_obj + 1;
        }
        end
    }

    /// Is the card containing `addr` marked, at object granularity? Dirty and
    /// newgen both count; any other mark outside verification is corruption.
    pub fn addr_is_marked_imprecise(&self, addr: Address) -> bool {
        match self.card(self.index_for(addr)) {
            CardValue::Dirty | CardValue::Newgen => true,
            CardValue::Clean => false,
            v => panic!("unhandled card mark {:?} for {}", v, addr),
        }
    }

    /// Is the card containing `addr` marked precisely? Only newgen and the
    /// transient verify mark count; a dirty card is not precise.
    pub fn addr_is_marked_precise(&self, addr: Address) -> bool {
        match self.card(self.index_for(addr)) {
            CardValue::Newgen | CardValue::Verify => true,
            CardValue::Clean | CardValue::Dirty => false,
        }
    }

    #[cfg(feature = "sanity")]
    fn claim_card_for_current_stripe(&self, card: usize) {
        use std::sync::atomic::Ordering;
        if let Some(stripe) = crate::scavenge::current_stripe() {
            let tag = stripe + 1;
            let prev = self.card_owners[card].swap(tag, Ordering::Relaxed);
            assert!(
                prev == 0 || prev == tag,
                "card {} cleared by stripe {} and stripe {}",
                card,
                prev - 1,
                tag - 1
            );
        }
    }

    /// Forget recorded card ownership. The coordinator calls this between
    /// scavenges.
    #[cfg(feature = "sanity")]
    pub fn reset_card_owners(&self) {
        use std::sync::atomic::Ordering;
        for owner in self.card_owners.iter() {
            owner.store(0, Ordering::Relaxed);
        }
    }
}
