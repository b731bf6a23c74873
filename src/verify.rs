//! Card-state verification around a scavenge. Not on any hot path; the
//! collector driver runs these under a verification flag, and any violation
//! aborts, since a bad card mark means references can be lost.

use crate::card_table::{CardTable, CardValue};
use crate::heap::MutableSpace;
use crate::util::Address;

impl CardTable {
    /// Pre-scavenge check, at object granularity: an object holding a young
    /// reference whose slot card is unmarked must at least have its own first
    /// card marked. Card marks are imprecise, so a mark anywhere on the
    /// object's head covers all of it.
    pub fn verify_all_young_refs_imprecise(&self, old: &MutableSpace, young: &MutableSpace) {
        debug!(
            "verifying young refs (imprecise) in [{}, {})",
            old.bottom(),
            old.top()
        );
        old.object_iterate(|obj| {
            let mut unmarked_slot: Option<Address> = None;
            obj.iterate_references(|slot| {
                let target = unsafe { slot.load::<Address>() };
                if target.is_zero() || !young.contains(target) {
                    return;
                }
                // Keep the first unmarked slot for the report.
                if unmarked_slot.is_none() && !self.addr_is_marked_imprecise(slot) {
                    unmarked_slot = Some(slot);
                }
            });
            if let Some(slot) = unmarked_slot {
                assert!(
                    self.addr_is_marked_imprecise(obj.to_address()),
                    "unmarked young reference at {} in unmarked object at {}",
                    slot,
                    obj.to_address()
                );
            }
        });
    }

    /// Post-scavenge check, at reference granularity. Every surviving
    /// young-pointing slot must sit on a newgen card (or one already visited
    /// by this pass); visiting rewrites the card to the transient verify
    /// mark. The closing sweep accepts only clean and verify cards and
    /// rewrites verify back to newgen, the steady state for known old->young
    /// cards. No verify card survives this call.
    pub fn verify_all_young_refs_precise(&self, old: &MutableSpace, young: &MutableSpace) {
        debug!(
            "verifying young refs (precise) in [{}, {})",
            old.bottom(),
            old.top()
        );
        old.object_iterate(|obj| {
            obj.iterate_references(|slot| {
                let target = unsafe { slot.load::<Address>() };
                if target.is_zero() || !young.contains(target) {
                    return;
                }
                assert!(
                    self.addr_is_marked_precise(slot),
                    "young reference at {} on an unmarked card",
                    slot
                );
                self.set(self.index_for(slot), CardValue::Verify);
            });
        });
        self.rewrite_verify_cards(old.bottom(), old.top());
    }

    fn rewrite_verify_cards(&self, bottom: Address, top: Address) {
        if bottom == top {
            return;
        }
        let from = self.index_for(bottom);
        let to = self.index_for(top - 1usize) + 1;
        for card in from..to {
            match self.card(card) {
                CardValue::Clean => {}
                CardValue::Verify => self.set(card, CardValue::Newgen),
                v => panic!("unexpected card mark {:?} on card {} after scavenge", v, card),
            }
        }
    }
}
