//! Per-worker promotion work: the queue of objects and array slices
//! discovered on dirty cards, and the tracing that happens when it drains.
//!
//! Copying and forwarding of survivors is not handled here. Draining stops at
//! the reference slots that still point into young space: their cards are
//! re-marked and the slots are handed to a [`SlotVisitor`], which is where a
//! copying promotion queue would take over.

use crossbeam::deque::Worker;

use crate::card_table::CardTable;
use crate::heap::MutableSpace;
use crate::object::ObjectReference;
use crate::util::Address;

/// Per-worker sink for scavenge work. Each stop-the-world worker owns one;
/// pushes never cross workers.
pub trait PromotionManager {
    /// Enqueue every reference slot of `object` for tracing.
    fn push_contents(&mut self, object: ObjectReference);

    /// Enqueue the elements of `array` whose slots fall in `[left, right)`.
    /// The bounds are card-aligned and may overlap the header or run past
    /// the array; tracing clips them to the element region.
    fn push_obj_array_contents(&mut self, array: ObjectReference, left: Address, right: Address);

    /// Advisory: drain the private stack if it has grown deep.
    fn drain_stacks_cond_depth(&mut self);
}

/// Visits reference slots that hold a surviving young-pointing reference.
pub trait SlotVisitor {
    fn visit_slot(&mut self, slot: Address);
}

impl<F: FnMut(Address)> SlotVisitor for F {
    fn visit_slot(&mut self, slot: Address) {
        self(slot)
    }
}

enum ScavengeWork {
    Object(ObjectReference),
    ArraySlice {
        array: ObjectReference,
        left: Address,
        right: Address,
    },
}

/// Promotion manager backed by a private work stack.
pub struct StackPromotionManager<'a, V: SlotVisitor> {
    card_table: &'a CardTable,
    young: &'a MutableSpace,
    stack: Worker<ScavengeWork>,
    target_depth: usize,
    visitor: V,
}

impl<'a, V: SlotVisitor> StackPromotionManager<'a, V> {
    /// Stack depth past which the conditional drain kicks in.
    pub const TARGET_STACK_DEPTH: usize = 64;

    pub fn new(card_table: &'a CardTable, young: &'a MutableSpace, visitor: V) -> Self {
        StackPromotionManager {
            card_table,
            young,
            stack: Worker::new_lifo(),
            target_depth: Self::TARGET_STACK_DEPTH,
            visitor,
        }
    }

    /// Drain the stack completely. The coordinator calls this for each worker
    /// after the stripe walks join.
    pub fn drain_stacks(&mut self) {
        while let Some(work) = self.stack.pop() {
            let (card_table, young, visitor) = (self.card_table, self.young, &mut self.visitor);
            match work {
                ScavengeWork::Object(object) => {
                    object.iterate_references(|slot| trace_slot(card_table, young, visitor, slot));
                }
                ScavengeWork::ArraySlice { array, left, right } => {
                    array.iterate_reference_range(left, right, |slot| {
                        trace_slot(card_table, young, visitor, slot)
                    });
                }
            }
        }
    }

    /// Give back the visitor. The stack must have been drained.
    pub fn into_visitor(self) -> V {
        debug_assert!(self.stack.is_empty(), "promotion stack not drained");
        self.visitor
    }
}

fn trace_slot<V: SlotVisitor>(
    card_table: &CardTable,
    young: &MutableSpace,
    visitor: &mut V,
    slot: Address,
) {
    let target = unsafe { slot.load::<Address>() };
    if target.is_zero() || !young.contains(target) {
        return;
    }
    // The slot keeps pointing into young space, so its card must stay marked
    // for the next scavenge.
    card_table.set_card_newgen(slot);
    visitor.visit_slot(slot);
}

impl<'a, V: SlotVisitor> PromotionManager for StackPromotionManager<'a, V> {
    fn push_contents(&mut self, object: ObjectReference) {
        self.stack.push(ScavengeWork::Object(object));
    }

    fn push_obj_array_contents(&mut self, array: ObjectReference, left: Address, right: Address) {
        debug_assert!(array.is_obj_array());
        debug_assert!(left < right);
        self.stack.push(ScavengeWork::ArraySlice { array, left, right });
    }

    fn drain_stacks_cond_depth(&mut self) {
        if self.stack.len() > self.target_depth {
            self.drain_stacks();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::card_table::CardValue;
    use crate::object;
    use crate::util::constants::*;
    use crate::util::conversions;

    struct Fixture {
        old: MutableSpace,
        young: MutableSpace,
        card_table: CardTable,
    }

    fn fixture() -> Fixture {
        let old = MutableSpace::new(conversions::words_to_bytes(4 * WORDS_IN_CARD));
        let young = MutableSpace::new(conversions::words_to_bytes(WORDS_IN_CARD));
        let card_table = CardTable::new(old.bottom(), old.end());
        Fixture {
            old,
            young,
            card_table,
        }
    }

    #[test]
    fn draining_reports_young_slots_and_marks_cards() {
        let f = fixture();
        let obj = unsafe { object::init_scalar(f.old.allocate(8), 8) };
        let young_target = f.young.bottom() + 16usize;
        let old_target = obj.to_address();
        unsafe {
            obj.slot(1).store::<Address>(young_target);
            obj.slot(3).store::<Address>(old_target);
        }

        let mut slots = Vec::new();
        let mut pm = StackPromotionManager::new(&f.card_table, &f.young, |slot: Address| {
            slots.push(slot)
        });
        pm.push_contents(obj);
        pm.drain_stacks();
        drop(pm);

        // Null and old-pointing slots are filtered; the young slot's card is
        // re-marked.
        assert_eq!(slots, vec![obj.slot(1)]);
        assert_eq!(
            f.card_table.card(f.card_table.index_for(obj.slot(1))),
            CardValue::Newgen
        );
    }

    #[test]
    fn array_slices_clip_to_elements() {
        let f = fixture();
        let arr = unsafe { object::init_obj_array(f.old.allocate(2 * WORDS_IN_CARD), 2 * WORDS_IN_CARD) };
        let young_target = f.young.bottom();
        unsafe {
            // First element sits right after the header, inside the slice
            // below even though the slice starts at the array header.
            arr.slot(0).store::<Address>(young_target);
            arr.slot(WORDS_IN_CARD).store::<Address>(young_target);
        }

        let mut slots = Vec::new();
        let mut pm = StackPromotionManager::new(&f.card_table, &f.young, |slot: Address| {
            slots.push(slot)
        });
        // Slice covering the first card only: the second element must not be
        // visited.
        pm.push_obj_array_contents(arr, arr.to_address(), arr.to_address() + BYTES_IN_CARD);
        pm.drain_stacks();
        assert_eq!(slots, vec![arr.slot(0)]);
    }

    #[test]
    fn conditional_drain_waits_for_depth() {
        let f = fixture();
        let obj = unsafe { object::init_scalar(f.old.allocate(4), 4) };
        unsafe { obj.slot(0).store::<Address>(f.young.bottom()) };

        let mut count = 0usize;
        let mut pm =
            StackPromotionManager::new(&f.card_table, &f.young, |_slot: Address| count += 1);
        pm.push_contents(obj);
        pm.drain_stacks_cond_depth();
        // One entry is below the target depth; nothing drains yet.
        assert!(!pm.stack.is_empty());
        pm.drain_stacks();
        assert!(pm.stack.is_empty());
        drop(pm);
        assert_eq!(count, 1);
    }
}
