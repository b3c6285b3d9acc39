//! Debug assertion macros for ring buffer invariants.
//!
//! Only active in debug builds (`#[cfg(debug_assertions)]`), so there is
//! zero overhead in release builds.

// =============================================================================
// Bounded occupancy
// =============================================================================

/// Assert that claimed-but-unconsumed slots never exceed capacity.
///
/// **Invariant**: `0 ≤ (claim - min(cursors)) ≤ capacity`
///
/// Used in: `try_claim()` after a successful claim
macro_rules! debug_assert_bounded_count {
    ($count:expr, $capacity:expr) => {
        debug_assert!(
            $count <= $capacity as u64,
            "bounded occupancy violated: {} outstanding slots exceed capacity {}",
            $count,
            $capacity
        )
    };
}

// =============================================================================
// Monotonic cursors
// =============================================================================

/// Assert that a consumer cursor only moves forward.
///
/// Used in: `Consumer::consume_up_to()` before storing the cursor
macro_rules! debug_assert_monotonic {
    ($name:literal, $old:expr, $new:expr) => {
        debug_assert!(
            $new >= $old,
            "monotonic progress violated: {} decreased from {} to {}",
            $name,
            $old,
            $new
        )
    };
}

// =============================================================================
// Slot ownership
// =============================================================================

/// Assert that a slot being read carries the stamp of the expected sequence.
///
/// **Invariant**: `slot.stamp == seq + 1` for every read at `seq`
///
/// Used in: `Consumer::consume_up_to()` before reading a slot
macro_rules! debug_assert_stamp {
    ($stamp:expr, $seq:expr) => {
        debug_assert!(
            $stamp == $seq + 1,
            "slot ownership violated: reading seq {} from slot stamped {}",
            $seq,
            $stamp
        )
    };
}

/// Assert that a slot is released no more times than it has readers.
///
/// Used in: `Slot::release()` after decrementing the reader count
macro_rules! debug_assert_pending {
    ($previous:expr) => {
        debug_assert!(
            $previous > 0,
            "reader accounting violated: slot released with no pending readers"
        )
    };
}

pub(crate) use debug_assert_bounded_count;
pub(crate) use debug_assert_monotonic;
pub(crate) use debug_assert_pending;
pub(crate) use debug_assert_stamp;
