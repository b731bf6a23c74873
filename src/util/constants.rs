//! Word, card and stripe geometry, fixed at build time.

/// log2 of the number of bytes in a heap word.
pub const LOG_BYTES_IN_WORD: usize = 3;
pub const BYTES_IN_WORD: usize = 1 << LOG_BYTES_IN_WORD;

/// log2 of the number of heap bytes summarized by one card-table byte.
pub const LOG_BYTES_IN_CARD: usize = 9;
pub const BYTES_IN_CARD: usize = 1 << LOG_BYTES_IN_CARD;
pub const WORDS_IN_CARD: usize = BYTES_IN_CARD >> LOG_BYTES_IN_WORD;

/// Number of consecutive cards in one stripe, the unit of per-worker
/// scavenge work.
pub const CARDS_IN_STRIPE: usize = 128;
pub const WORDS_IN_STRIPE: usize = CARDS_IN_STRIPE * WORDS_IN_CARD;
