//! Slab allocator for fixed-size records (component B, spec §4.B). One
//! instance per hot record type (`PacketContent`, tracked-MAC head,
//! RSSI window node), each preallocated to `SLOTS_IN_MEM_POOL` capacity, so
//! the packet hot path never touches the general-purpose allocator under
//! load. Grounded in `Geo-Fencing.c`'s `mp_init`/`mp_alloc`/`mp_free` calls
//! over `pkt_content_mempool`, `tracked_mac_list_head_mempool`, and
//! `rssi_list_node_mempool`.
//!
//! Design Note (spec §9, "Slab pools → arena with free-list"): the original
//! intrusive free-list is replaced with an ordinary `Vec`-backed stack of
//! free slot indices behind one `Mutex`. Exhaustion never grows the pool —
//! callers either block or shed load.

use std::sync::Mutex;

use crate::error::{EngineError, Result};

struct Inner<T> {
    slots: Vec<Option<T>>,
    free: Vec<usize>,
}

/// A fixed-capacity slab pool. `alloc` hands back a zeroed/default slot by
/// index; `free` returns it. Thread-safe via one pool-wide mutex, matching
/// the spec's "pools are thread-safe" requirement.
pub struct Pool<T> {
    capacity: usize,
    inner: Mutex<Inner<T>>,
}

impl<T: Default> Pool<T> {
    pub fn new(capacity: usize) -> Self {
        let mut slots = Vec::with_capacity(capacity);
        let mut free = Vec::with_capacity(capacity);
        for i in 0..capacity {
            slots.push(Some(T::default()));
            free.push(capacity - 1 - i);
        }
        Self {
            capacity,
            inner: Mutex::new(Inner { slots, free }),
        }
    }

    /// Returns `Malloc` when every slot is in use — the hot path never
    /// allocates past `capacity`.
    pub fn alloc(&self) -> Result<PoolSlot<'_, T>> {
        let mut inner = self.inner.lock().expect("mem pool mutex poisoned");
        let idx = inner.free.pop().ok_or(EngineError::Malloc)?;
        let value = inner.slots[idx].take().unwrap_or_default();
        Ok(PoolSlot {
            pool: self,
            idx: Some(idx),
            value: Some(value),
        })
    }

    fn free(&self, idx: usize) {
        let mut inner = self.inner.lock().expect("mem pool mutex poisoned");
        inner.slots[idx] = Some(T::default());
        inner.free.push(idx);
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn in_use(&self) -> usize {
        let inner = self.inner.lock().expect("mem pool mutex poisoned");
        self.capacity - inner.free.len()
    }
}

/// An allocated slot, returned to the pool automatically on drop so a
/// panicking worker can never leak pool capacity.
pub struct PoolSlot<'a, T> {
    pool: &'a Pool<T>,
    idx: Option<usize>,
    value: Option<T>,
}

impl<'a, T> std::ops::Deref for PoolSlot<'a, T> {
    type Target = T;
    fn deref(&self) -> &T {
        self.value.as_ref().expect("slot value taken")
    }
}

impl<'a, T> std::ops::DerefMut for PoolSlot<'a, T> {
    fn deref_mut(&mut self) -> &mut T {
        self.value.as_mut().expect("slot value taken")
    }
}

impl<'a, T: Default> Drop for PoolSlot<'a, T> {
    fn drop(&mut self) {
        self.value.take();
        if let Some(idx) = self.idx.take() {
            self.pool.free(idx);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Packet {
        payload: Vec<u8>,
    }

    #[test]
    fn alloc_and_free_respect_capacity_invariant() {
        let pool: Pool<Packet> = Pool::new(4);
        assert_eq!(pool.in_use(), 0);
        let mut slots = Vec::new();
        for i in 0..4 {
            let mut s = pool.alloc().unwrap();
            s.payload = vec![i as u8];
            slots.push(s);
        }
        assert_eq!(pool.in_use(), 4);
        assert!(matches!(pool.alloc(), Err(EngineError::Malloc)));
        slots.pop();
        assert_eq!(pool.in_use(), 3);
        let s = pool.alloc().unwrap();
        assert!(s.payload.is_empty(), "reused slot should be reset to default");
    }

    #[test]
    fn dropping_slot_returns_it_to_the_pool() {
        let pool: Pool<Packet> = Pool::new(1);
        {
            let _s = pool.alloc().unwrap();
            assert_eq!(pool.in_use(), 1);
        }
        assert_eq!(pool.in_use(), 0);
    }
}
