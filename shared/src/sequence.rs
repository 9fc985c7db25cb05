//! Per-sender sequence numbering

use std::sync::atomic::{AtomicU32, Ordering};

/// Hands out sequence ids for outgoing packets.
///
/// The first id is 1 so that 0 can mean "nothing sent yet". Ids wrap after
/// `u32::MAX`; use [`sequence_greater_than`] when comparing ids that may
/// straddle the wrap.
#[derive(Debug, Default)]
pub struct SequenceCounter(AtomicU32);

impl SequenceCounter {
    pub fn new() -> Self {
        Self(AtomicU32::new(0))
    }

    /// Reserves and returns the next id.
    pub fn next(&self) -> u32 {
        self.0.fetch_add(1, Ordering::Relaxed).wrapping_add(1)
    }

    /// Last id handed out, or 0 if none.
    pub fn current(&self) -> u32 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Wrap-aware "is `a` newer than `b`".
pub fn sequence_greater_than(a: u32, b: u32) -> bool {
    const HALF: u32 = u32::MAX / 2;
    (a > b && a - b <= HALF) || (a < b && b - a > HALF)
}
