//! Parallel old-generation card-table scavenging for a generational,
//! stop-the-world garbage collector.
//!
//! A young-generation collection must find every live reference from old
//! space into young space without scanning all of old space. The index for
//! that search is the card table: one byte per fixed-size card of old space,
//! dirtied by the write barrier on reference stores. This crate owns the
//! scavenge-time side of that table:
//!
//! - the [`CardTable`](card_table::CardTable) itself, with its dirty/clean
//!   card scanners and clearing;
//! - the stripe-parallel driver,
//!   [`CardTable::scavenge_contents_parallel`](card_table::CardTable::scavenge_contents_parallel),
//!   which partitions old space so stop-the-world workers scan and clear
//!   disjoint cards with no synchronization on the hot path;
//! - the protocols for objects straddling cards and stripes, including the
//!   cooperative slice scanning of large object arrays;
//! - the pre- and post-scavenge card-state verifiers.
//!
//! Found work is handed to a per-worker
//! [`PromotionManager`](promotion::PromotionManager); copying, forwarding
//! and load balancing live behind that trait.

#[macro_use]
extern crate log;

pub mod card_table;
pub mod heap;
pub mod object;
pub mod promotion;
mod scavenge;
pub mod util;
mod verify;

pub use crate::card_table::{CardTable, CardValue};
pub use crate::promotion::{PromotionManager, SlotVisitor, StackPromotionManager};
