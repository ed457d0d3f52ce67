/// Fixed pool of pre-allocated packet buffers.
///
/// Buffers are allocated once when a capture session starts and handed out
/// by value: a `PacketBuf` is owned by exactly one party at a time (the free
/// list, the producer, a queued descriptor, or the consumer), so no buffer can
/// have two owners. The free list is a stack of buffers, making acquire and
/// release O(1). A bitmask mirrors which indices are free.
///
/// The guard is a critical section around a `RefCell`. `acquire` runs in the
/// receive callback and uses `try_borrow_mut`, so it returns `None` instead of
/// waiting if the guard is somehow held; `release` runs in task context and
/// always takes it.
use alloc::vec::Vec;
use core::cell::RefCell;

use critical_section::Mutex;

use crate::config::MAX_POOL_BUFFERS;
use crate::error::{CaptureError, Result};

/// One packet buffer, owned by whoever holds it.
#[derive(Debug)]
pub struct PacketBuf {
    index: u8,
    data: Vec<u8>,
}

impl PacketBuf {
    pub fn index(&self) -> usize {
        self.index as usize
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

struct Slots {
    free: heapless::Vec<PacketBuf, MAX_POOL_BUFFERS>,
    free_mask: u32,
    capacity: usize,
    buffer_size: usize,
    /// Torn down by `retire` while buffers were still out; storage is
    /// dropped when the last one comes back.
    retiring: bool,
}

impl Slots {
    fn allocate(capacity: usize, buffer_size: usize) -> Result<Self> {
        let capacity = capacity.min(MAX_POOL_BUFFERS);
        let mut free = heapless::Vec::new();
        for index in 0..capacity {
            let mut data = Vec::new();
            if data.try_reserve_exact(buffer_size).is_err() {
                log::error!("Failed to allocate packet buffer {}", index);
                // Everything pushed so far is dropped with `free`
                return Err(CaptureError::BufferAlloc { index });
            }
            data.resize(buffer_size, 0);
            let pushed = free.push(PacketBuf {
                index: index as u8,
                data,
            });
            debug_assert!(pushed.is_ok(), "free list shorter than pool capacity");
        }
        // Hand out the lowest index first
        free.reverse();

        Ok(Self {
            free,
            free_mask: mask_for(capacity),
            capacity,
            buffer_size,
            retiring: false,
        })
    }

    fn outstanding(&self) -> usize {
        self.capacity - self.free.len()
    }
}

fn mask_for(capacity: usize) -> u32 {
    if capacity >= 32 {
        u32::MAX
    } else {
        (1u32 << capacity) - 1
    }
}

pub struct BufferPool {
    slots: Mutex<RefCell<Option<Slots>>>,
}

impl BufferPool {
    /// An absent pool: nothing allocated, every `acquire` fails.
    pub const fn new() -> Self {
        Self {
            slots: Mutex::new(RefCell::new(None)),
        }
    }

    /// Allocate `capacity` buffers of `buffer_size` bytes each.
    ///
    /// All-or-nothing: if any buffer fails to allocate, the ones already
    /// allocated in this batch are freed and the pool stays absent.
    pub fn allocate(&self, capacity: usize, buffer_size: usize) -> Result<()> {
        if self.is_allocated() {
            return Err(CaptureError::InvalidState("buffer pool already allocated"));
        }

        // Allocate outside the critical section; only the install is guarded.
        let slots = Slots::allocate(capacity, buffer_size)?;
        let count = slots.capacity;

        let rejected = critical_section::with(|cs| {
            let mut guard = self.slots.borrow(cs).borrow_mut();
            if guard.is_some() {
                Some(slots)
            } else {
                *guard = Some(slots);
                None
            }
        });
        if rejected.is_some() {
            return Err(CaptureError::InvalidState("buffer pool already allocated"));
        }

        log::info!(
            "Allocated {} packet buffers ({} KB total)",
            count,
            (count * buffer_size) / 1024
        );
        Ok(())
    }

    /// Claim a free buffer without waiting. Safe from the receive callback.
    pub fn acquire(&self) -> Option<PacketBuf> {
        critical_section::with(|cs| {
            let mut guard = self.slots.borrow(cs).try_borrow_mut().ok()?;
            let slots = guard.as_mut()?;
            if slots.retiring {
                return None;
            }
            let buf = slots.free.pop()?;
            slots.free_mask &= !(1u32 << buf.index);
            Some(buf)
        })
    }

    /// Return a buffer to the free list.
    ///
    /// Panics if the buffer's slot is already marked free: that would mean two
    /// live handles for one slot and a corrupted free mask.
    pub fn release(&self, buf: PacketBuf) {
        // Whatever must be freed is moved out and dropped after the critical
        // section: a buffer with no pool to return to, or a drained pool.
        let (orphan, retired) = critical_section::with(|cs| {
            let mut guard = self.slots.borrow(cs).borrow_mut();
            let Some(slots) = guard.as_mut() else {
                return (Some(buf), None);
            };

            let bit = 1u32 << buf.index;
            assert!(
                buf.index() < slots.capacity && slots.free_mask & bit == 0,
                "packet buffer {} released twice",
                buf.index
            );
            slots.free_mask |= bit;
            // The mask check above bounds the free list by `capacity`
            let pushed = slots.free.push(buf);
            debug_assert!(pushed.is_ok(), "free list shorter than pool capacity");

            if slots.retiring && slots.outstanding() == 0 {
                return (None, guard.take());
            }
            (None, None)
        });

        if orphan.is_some() {
            log::warn!("Packet buffer released with no pool allocated");
        }
        if retired.is_some() {
            log::debug!("Last outstanding buffer returned, pool released");
        }
    }

    /// Tear the pool down. Returns the number of buffers still outstanding.
    ///
    /// With nothing outstanding the storage is freed now; otherwise the pool
    /// stops handing out buffers and is freed when the last one is released.
    pub fn retire(&self) -> usize {
        let (retired, outstanding) = critical_section::with(|cs| {
            let mut guard = self.slots.borrow(cs).borrow_mut();
            let Some(slots) = guard.as_mut() else {
                return (None, 0);
            };
            let outstanding = slots.outstanding();
            if outstanding == 0 {
                return (guard.take(), 0);
            }
            slots.retiring = true;
            (None, outstanding)
        });
        drop(retired);
        outstanding
    }

    pub fn is_allocated(&self) -> bool {
        self.with_slots(|s| s.is_some())
    }

    pub fn capacity(&self) -> usize {
        self.with_slots(|s| s.map_or(0, |s| s.capacity))
    }

    pub fn buffer_size(&self) -> usize {
        self.with_slots(|s| s.map_or(0, |s| s.buffer_size))
    }

    pub fn free_count(&self) -> usize {
        self.with_slots(|s| s.map_or(0, |s| s.free.len()))
    }

    /// Bit `i` set means buffer `i` is free.
    pub fn free_mask(&self) -> u32 {
        self.with_slots(|s| s.map_or(0, |s| s.free_mask))
    }

    fn with_slots<R>(&self, f: impl FnOnce(Option<&Slots>) -> R) -> R {
        critical_section::with(|cs| f(self.slots.borrow(cs).borrow().as_ref()))
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool(capacity: usize) -> BufferPool {
        let pool = BufferPool::new();
        pool.allocate(capacity, 64).unwrap();
        pool
    }

    #[test]
    fn new_pool_is_absent() {
        let pool = BufferPool::new();
        assert!(!pool.is_allocated());
        assert!(pool.acquire().is_none());
        assert_eq!(pool.free_count(), 0);
        assert_eq!(pool.retire(), 0);
    }

    #[test]
    fn allocate_fills_free_mask() {
        let pool = pool(16);
        assert_eq!(pool.capacity(), 16);
        assert_eq!(pool.buffer_size(), 64);
        assert_eq!(pool.free_count(), 16);
        assert_eq!(pool.free_mask(), 0xFFFF);
    }

    #[test]
    fn double_allocate_is_invalid_state() {
        let pool = pool(4);
        assert!(matches!(
            pool.allocate(4, 64),
            Err(CaptureError::InvalidState(_))
        ));
        assert_eq!(pool.capacity(), 4);
    }

    #[test]
    fn capacity_is_clamped_to_mask_width() {
        let pool = pool(100);
        assert_eq!(pool.capacity(), MAX_POOL_BUFFERS);
        assert_eq!(pool.free_mask(), u32::MAX);

        // A full cycle at the clamp fits the free list exactly
        let held: Vec<_> = core::iter::from_fn(|| pool.acquire()).collect();
        assert_eq!(held.len(), MAX_POOL_BUFFERS);
        for buf in held {
            pool.release(buf);
        }
        assert_eq!(pool.free_count(), MAX_POOL_BUFFERS);
        assert_eq!(pool.free_mask(), u32::MAX);
    }

    #[test]
    fn acquire_hands_out_lowest_index_first() {
        let pool = pool(4);
        let a = pool.acquire().unwrap();
        let b = pool.acquire().unwrap();
        assert_eq!(a.index(), 0);
        assert_eq!(b.index(), 1);
        assert_eq!(a.capacity(), 64);
        assert_eq!(pool.free_mask(), 0b1100);
        pool.release(a);
        pool.release(b);
    }

    #[test]
    fn acquire_fails_when_exhausted() {
        let pool = pool(3);
        let held: Vec<_> = (0..3).map(|_| pool.acquire().unwrap()).collect();
        assert!(pool.acquire().is_none());
        for buf in held {
            pool.release(buf);
        }
        assert_eq!(pool.free_count(), 3);
    }

    #[test]
    fn popcount_tracks_outstanding_acquisitions() {
        let pool = pool(16);
        let mut held = Vec::new();
        // Deterministic interleaving of acquires and releases
        for step in 0..200usize {
            if step % 3 == 2 && !held.is_empty() {
                let buf = held.remove((step * 7) % held.len());
                pool.release(buf);
            } else if let Some(buf) = pool.acquire() {
                held.push(buf);
            }
            assert_eq!(pool.free_mask().count_ones() as usize, 16 - held.len());
            assert_eq!(pool.free_count(), 16 - held.len());
        }
        for buf in held.drain(..) {
            pool.release(buf);
        }
        assert_eq!(pool.free_mask().count_ones(), 16);
    }

    #[test]
    fn acquire_does_not_wait_for_held_guard() {
        let pool = pool(2);
        critical_section::with(|cs| {
            let _held = pool.slots.borrow(cs).borrow_mut();
            assert!(pool.acquire().is_none());
        });
        let buf = pool.acquire().unwrap();
        pool.release(buf);
    }

    #[test]
    #[should_panic(expected = "released twice")]
    fn releasing_a_free_slot_panics() {
        let pool = pool(2);
        let forged = PacketBuf {
            index: 0,
            data: Vec::new(),
        };
        pool.release(forged);
    }

    #[test]
    fn failed_allocation_leaves_pool_absent() {
        let pool = BufferPool::new();
        let err = pool.allocate(4, usize::MAX).unwrap_err();
        assert_eq!(err, CaptureError::BufferAlloc { index: 0 });
        assert!(!pool.is_allocated());
        // A sane allocation still works afterwards
        pool.allocate(4, 32).unwrap();
        assert_eq!(pool.free_count(), 4);
    }

    #[test]
    fn retire_with_nothing_outstanding_frees_now() {
        let pool = pool(4);
        assert_eq!(pool.retire(), 0);
        assert!(!pool.is_allocated());
    }

    #[test]
    fn retire_defers_until_last_release() {
        let pool = pool(4);
        let a = pool.acquire().unwrap();
        let b = pool.acquire().unwrap();

        assert_eq!(pool.retire(), 2);
        assert!(pool.is_allocated());
        // Retiring pool hands out nothing
        assert!(pool.acquire().is_none());
        // Reallocation waits for the drain
        assert!(pool.allocate(4, 64).is_err());

        pool.release(a);
        assert!(pool.is_allocated());
        pool.release(b);
        assert!(!pool.is_allocated());
    }

    #[test]
    fn buffers_are_writable() {
        let pool = pool(1);
        let mut buf = pool.acquire().unwrap();
        buf.as_mut_slice()[..3].copy_from_slice(&[1, 2, 3]);
        assert_eq!(&buf.as_slice()[..3], &[1, 2, 3]);
        pool.release(buf);
    }
}
