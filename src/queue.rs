use crate::{
    mt::Semaphore,
    sync::{AtomicBool, AtomicU32, AtomicU64, Ordering, UnsafeCell, spin_loop},
    utils::{EMPTY_SLOT, pack_cell, unpack_cell},
};
use core::{
    fmt,
    mem::ManuallyDrop,
    ops::{Deref, DerefMut},
};
use crossbeam_utils::CachePadded;

/// Bounded multi-producer/multi-consumer queue over a fixed pool of `N` slots.
///
/// Two rings of `N` cells drive it:
/// - the *allocation ring* is a free-list of pool indices,
/// - the *delivery ring* is the FIFO of pool indices that were pushed.
///
/// Every cell packs `(generation_key, payload_index)` into one `u64` and is
/// only ever updated by compare-exchange. A cell at ring position `p` is valid
/// for the operation at monotonic counter value `p` only while its key equals
/// `p`; whoever recycles a cell stores key `p + N`. A thread holding a stale
/// counter therefore never matches a wrapped-around cell (ABA).
///
/// Slot ownership moves with the index: between `alloc` and `push` the slot
/// belongs to the allocating thread ([`Reservation`]), between `pop` and
/// `dealloc` to the popping thread ([`Delivery`]). Nobody else touches the
/// payload, which is why the pool needs no lock.
///
/// `N` must be a power of two.
pub struct LockFreeFixedQueue<T, const N: usize> {
    alloc_ring: Box<[AtomicU64]>,
    delivery_ring: Box<[AtomicU64]>,
    pool: Box<[UnsafeCell<Option<T>>]>,
    alloc_ptr: CachePadded<AtomicU32>,
    free_ptr: CachePadded<AtomicU32>,
    write_ptr: CachePadded<AtomicU32>,
    read_ptr: CachePadded<AtomicU32>,
    aborted: AtomicBool,
    /// One unit per pushed, not yet popped item.
    data_signal: Semaphore,
}

// SAFETY: a slot's payload is accessed only by the thread that currently owns
// the slot index (see the type docs), and ownership is handed over through
// AcqRel compare-exchanges on the rings. That is the same contract as a
// `Mutex<T>`, so `T: Send` is enough for both.
unsafe impl<T: Send, const N: usize> Send for LockFreeFixedQueue<T, N> {}
unsafe impl<T: Send, const N: usize> Sync for LockFreeFixedQueue<T, N> {}

impl<T, const N: usize> LockFreeFixedQueue<T, N> {
    const CAPACITY: u32 = {
        assert!(N.is_power_of_two(), "LockFreeFixedQueue: N must be a power of two");
        assert!(N <= 1 << 30, "LockFreeFixedQueue: N is too large");
        N as u32
    };
    const MASK: usize = N - 1;

    #[must_use]
    pub fn new() -> Self {
        let capacity = Self::CAPACITY;
        let alloc_ring = (0..capacity)
            .map(|i| AtomicU64::new(pack_cell(i, i as i32)))
            .collect();
        let delivery_ring = (0..capacity)
            .map(|i| AtomicU64::new(pack_cell(i, EMPTY_SLOT)))
            .collect();
        let pool = (0..capacity).map(|_| UnsafeCell::new(None)).collect();
        Self {
            alloc_ring,
            delivery_ring,
            pool,
            alloc_ptr: CachePadded::new(AtomicU32::new(0)),
            free_ptr: CachePadded::new(AtomicU32::new(0)),
            write_ptr: CachePadded::new(AtomicU32::new(0)),
            read_ptr: CachePadded::new(AtomicU32::new(0)),
            aborted: AtomicBool::new(false),
            data_signal: Semaphore::new(0, N),
        }
    }

    /// Claim a free slot and default-construct its payload.
    ///
    /// Returns `None` when all `N` slots are outstanding and `wait` is false;
    /// with `wait` it spins until another thread deallocates.
    pub fn alloc(&self, wait: bool) -> Option<Reservation<'_, T, N>>
    where
        T: Default,
    {
        self.alloc_with(T::default(), wait).ok()
    }

    /// Claim a free slot and move `value` into it. On failure the value is
    /// handed back.
    ///
    /// # Errors
    /// When the pool is exhausted and `wait` is false. A race lost to another
    /// allocator is retried, not reported.
    pub fn alloc_with(&self, value: T, wait: bool) -> Result<Reservation<'_, T, N>, T> {
        let Some(index) = self.alloc_index(wait) else {
            return Err(value);
        };
        // SAFETY: `alloc_index` just transferred exclusive ownership of `index`
        // to this thread.
        unsafe { self.pool[index as usize].with_mut(|ptr| *ptr = Some(value)) };
        Ok(Reservation { queue: self, index })
    }

    /// Allocate, fill and deliver in one step.
    ///
    /// # Errors
    /// Hands `value` back if every slot is claimed (only possible when `wait`
    /// is false). Contention with other producers is retried, not reported.
    pub fn push_value(&self, value: T, wait: bool) -> Result<(), T> {
        let reservation = self.alloc_with(value, wait)?;
        reservation.push(wait).map_err(Reservation::into_inner)
    }

    /// Take the oldest delivered slot.
    ///
    /// With `wait` the call blocks until an item is delivered. It returns
    /// `None` when nothing is available (`wait == false`) or once the queue
    /// has been aborted, even if items remain.
    pub fn pop(&self, wait: bool) -> Option<Delivery<'_, T, N>> {
        self.pop_index(wait)
            .map(|index| Delivery { queue: self, index })
    }

    /// Pop, move the payload out and release the slot.
    pub fn pop_value(&self, wait: bool) -> Option<T> {
        self.pop(wait).map(Delivery::into_inner)
    }

    /// Make every current and future `pop` return `None`. Idempotent.
    pub fn abort(&self) {
        if self.aborted.swap(true, Ordering::AcqRel) {
            return;
        }
        self.data_signal.close();
    }

    #[must_use]
    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::Acquire)
    }

    /// Delivered items not yet popped.
    #[must_use]
    pub fn len(&self) -> usize {
        let write = self.write_ptr.load(Ordering::Acquire);
        let read = self.read_ptr.load(Ordering::Acquire);
        write.wrapping_sub(read).min(Self::CAPACITY) as usize
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Slots currently claimed, whether reserved, queued or being consumed.
    #[must_use]
    pub fn allocated(&self) -> usize {
        let alloc = self.alloc_ptr.load(Ordering::Acquire);
        let free = self.free_ptr.load(Ordering::Acquire);
        alloc.wrapping_sub(free).min(Self::CAPACITY) as usize
    }

    #[must_use]
    pub const fn capacity(&self) -> usize {
        N
    }

    /// Claim a free slot. Without `wait` this fails only when every slot is
    /// claimed; losing a race to another allocator retries, since the winner
    /// is about to advance `alloc_ptr`.
    fn alloc_index(&self, wait: bool) -> Option<u32> {
        loop {
            let alloc_ptr = self.alloc_ptr.load(Ordering::Acquire);
            let free_ptr = self.free_ptr.load(Ordering::Acquire);
            if alloc_ptr.wrapping_sub(free_ptr) >= Self::CAPACITY {
                if !wait {
                    return None;
                }
                spin_loop();
                continue;
            }
            let cell = &self.alloc_ring[alloc_ptr as usize & Self::MASK];
            let current = cell.load(Ordering::Acquire);
            let (key, index) = unpack_cell(current);
            // A key mismatch or an empty cell means another allocator won this
            // position and has not bumped `alloc_ptr` yet.
            if key == alloc_ptr
                && index > EMPTY_SLOT
                && cell
                    .compare_exchange(
                        current,
                        pack_cell(alloc_ptr, EMPTY_SLOT),
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    )
                    .is_ok()
            {
                self.alloc_ptr.fetch_add(1, Ordering::AcqRel);
                return Some(index as u32);
            }
            spin_loop();
        }
    }

    fn dealloc_index(&self, index: u32) {
        debug_assert!(index < Self::CAPACITY, "dealloc of foreign slot {index}");
        loop {
            let free_ptr = self.free_ptr.load(Ordering::Acquire);
            let cell = &self.alloc_ring[free_ptr as usize & Self::MASK];
            if cell
                .compare_exchange(
                    pack_cell(free_ptr, EMPTY_SLOT),
                    pack_cell(free_ptr.wrapping_add(Self::CAPACITY), index as i32),
                    Ordering::AcqRel,
                    Ordering::Acquire,
                )
                .is_ok()
            {
                self.free_ptr.fetch_add(1, Ordering::AcqRel);
                return;
            }
            spin_loop();
        }
    }

    /// Publish `index` at the write position. Without `wait` this fails only
    /// when the cell still holds the previous lap's item; a cell taken by a
    /// concurrent producer is retried at the next position.
    fn push_index(&self, index: u32, wait: bool) -> bool {
        debug_assert!(index < Self::CAPACITY, "push of foreign slot {index}");
        loop {
            let write_ptr = self.write_ptr.load(Ordering::Acquire);
            let cell = &self.delivery_ring[write_ptr as usize & Self::MASK];
            match cell.compare_exchange(
                pack_cell(write_ptr, EMPTY_SLOT),
                pack_cell(write_ptr, index as i32),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    self.write_ptr.fetch_add(1, Ordering::AcqRel);
                    self.data_signal.signal();
                    return true;
                }
                Err(actual) => {
                    let (key, _) = unpack_cell(actual);
                    // Still holding the item from the previous lap: full.
                    let full = key == write_ptr.wrapping_sub(Self::CAPACITY);
                    if full && !wait {
                        return false;
                    }
                }
            }
            spin_loop();
        }
    }

    fn pop_index(&self, wait: bool) -> Option<u32> {
        let can_read = if wait {
            self.data_signal.wait()
        } else {
            self.data_signal.poll()
        };
        if !can_read || self.is_aborted() {
            return None;
        }
        // The unit we hold guarantees a delivered cell at or after `read_ptr`
        // that no other consumer will claim.
        loop {
            let read_ptr = self.read_ptr.load(Ordering::Acquire);
            let cell = &self.delivery_ring[read_ptr as usize & Self::MASK];
            let current = cell.load(Ordering::Acquire);
            let (key, index) = unpack_cell(current);
            if key == read_ptr
                && index > EMPTY_SLOT
                && cell
                    .compare_exchange(
                        current,
                        pack_cell(read_ptr.wrapping_add(Self::CAPACITY), EMPTY_SLOT),
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    )
                    .is_ok()
            {
                self.read_ptr.fetch_add(1, Ordering::AcqRel);
                return Some(index as u32);
            }
            spin_loop();
        }
    }

    /// # Safety
    /// The caller must own `index`.
    unsafe fn payload(&self, index: u32) -> &T {
        // SAFETY: owner-only access per the caller contract; the slot is
        // `Some` from allocation until release.
        unsafe { self.pool[index as usize].with(|ptr| (*ptr).as_ref()) }
            .expect("LockFreeFixedQueue: owned slot is empty")
    }

    /// # Safety
    /// The caller must own `index` and hold no other reference into it.
    #[allow(clippy::mut_from_ref)]
    unsafe fn payload_mut(&self, index: u32) -> &mut T {
        // SAFETY: see `payload`; exclusivity is the caller's promise.
        unsafe { self.pool[index as usize].with_mut(|ptr| (*ptr).as_mut()) }
            .expect("LockFreeFixedQueue: owned slot is empty")
    }

    /// # Safety
    /// The caller must own `index`; ownership ends with this call.
    unsafe fn take_and_dealloc(&self, index: u32) -> T {
        // SAFETY: owner-only access per the caller contract.
        let value = unsafe { self.pool[index as usize].with_mut(|ptr| (*ptr).take()) }
            .expect("LockFreeFixedQueue: owned slot is empty");
        self.dealloc_index(index);
        value
    }

    /// # Safety
    /// The caller must own `index`; ownership ends with this call.
    unsafe fn drop_and_dealloc(&self, index: u32) {
        // SAFETY: owner-only access per the caller contract. The payload is
        // dropped before the index becomes visible to allocators again.
        unsafe { self.pool[index as usize].with_mut(|ptr| *ptr = None) };
        self.dealloc_index(index);
    }
}

impl<T, const N: usize> Default for LockFreeFixedQueue<T, N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, const N: usize> fmt::Debug for LockFreeFixedQueue<T, N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockFreeFixedQueue")
            .field("capacity", &N)
            .field("allocated", &self.allocated())
            .field("len", &self.len())
            .field("aborted", &self.is_aborted())
            .finish_non_exhaustive()
    }
}

/// An allocated slot that has not been delivered yet.
///
/// Dropping it deallocates the slot (running the payload's destructor).
#[must_use = "dropping a reservation deallocates the slot"]
pub struct Reservation<'a, T, const N: usize> {
    queue: &'a LockFreeFixedQueue<T, N>,
    index: u32,
}

impl<'a, T, const N: usize> Reservation<'a, T, N> {
    /// Deliver the slot to consumers.
    ///
    /// # Errors
    /// Gives the reservation back if the delivery ring was full and `wait` is
    /// false.
    pub fn push(self, wait: bool) -> Result<(), Self> {
        if !self.queue.push_index(self.index, wait) {
            return Err(self);
        }
        let _ = ManuallyDrop::new(self);
        Ok(())
    }

    /// Release the slot without delivering it.
    pub fn dealloc(self) {
        drop(self);
    }

    /// Release the slot, keeping the payload.
    #[must_use]
    pub fn into_inner(self) -> T {
        let this = ManuallyDrop::new(self);
        // SAFETY: the reservation owns its index and is consumed here.
        unsafe { this.queue.take_and_dealloc(this.index) }
    }

    /// Position of the slot in the pool.
    #[must_use]
    pub fn slot_index(&self) -> usize {
        self.index as usize
    }
}

impl<T, const N: usize> Deref for Reservation<'_, T, N> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: the reservation owns its index.
        unsafe { self.queue.payload(self.index) }
    }
}

impl<T, const N: usize> DerefMut for Reservation<'_, T, N> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: the reservation owns its index and `&mut self` is exclusive.
        unsafe { self.queue.payload_mut(self.index) }
    }
}

impl<T, const N: usize> Drop for Reservation<'_, T, N> {
    fn drop(&mut self) {
        // SAFETY: the reservation owns its index and is going away.
        unsafe { self.queue.drop_and_dealloc(self.index) };
    }
}

impl<T: fmt::Debug, const N: usize> fmt::Debug for Reservation<'_, T, N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reservation")
            .field("index", &self.index)
            .field("payload", &**self)
            .finish()
    }
}

/// A popped slot. Dropping it deallocates the slot.
#[must_use = "dropping a delivery deallocates the slot"]
pub struct Delivery<'a, T, const N: usize> {
    queue: &'a LockFreeFixedQueue<T, N>,
    index: u32,
}

impl<T, const N: usize> Delivery<'_, T, N> {
    /// Release the slot back to the allocation ring.
    pub fn dealloc(self) {
        drop(self);
    }

    #[must_use]
    pub fn into_inner(self) -> T {
        let this = ManuallyDrop::new(self);
        // SAFETY: the delivery owns its index and is consumed here.
        unsafe { this.queue.take_and_dealloc(this.index) }
    }

    #[must_use]
    pub fn slot_index(&self) -> usize {
        self.index as usize
    }
}

impl<T, const N: usize> Deref for Delivery<'_, T, N> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: the delivery owns its index.
        unsafe { self.queue.payload(self.index) }
    }
}

impl<T, const N: usize> DerefMut for Delivery<'_, T, N> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: the delivery owns its index and `&mut self` is exclusive.
        unsafe { self.queue.payload_mut(self.index) }
    }
}

impl<T, const N: usize> Drop for Delivery<'_, T, N> {
    fn drop(&mut self) {
        // SAFETY: the delivery owns its index and is going away.
        unsafe { self.queue.drop_and_dealloc(self.index) };
    }
}

impl<T: fmt::Debug, const N: usize> fmt::Debug for Delivery<'_, T, N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("index", &self.index)
            .field("payload", &**self)
            .finish()
    }
}
