use std::thread;

/// Payload index stored in a ring cell that currently holds no slot.
pub(crate) const EMPTY_SLOT: i32 = -1;

/// Pack a ring cell: generation key in the high half, payload index in the low
/// half, so both are compared and swapped by one 64-bit CAS.
#[inline]
pub(crate) const fn pack_cell(key: u32, index: i32) -> u64 {
    ((key as u64) << 32) | (index as u32 as u64)
}

#[inline]
pub(crate) const fn unpack_cell(cell: u64) -> (u32, i32) {
    ((cell >> 32) as u32, cell as u32 as i32)
}

/// Number of worker threads to run: every logical CPU but one, and at least
/// one.
#[must_use]
pub fn cpu_threads_count() -> u32 {
    let logical = thread::available_parallelism().map_or(1, usize::from);
    u32::try_from(logical.saturating_sub(1).max(1)).unwrap_or(u32::MAX)
}
