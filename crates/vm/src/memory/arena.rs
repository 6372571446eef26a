use std::collections::BTreeMap;

/// Every chunk is aligned to, and sized in multiples of, this.
const ALIGNMENT: u32 = 8;

/// Guest heap allocator living on the host side.
///
/// The guest's `malloc`/`free` trap into the host, which hands out addresses
/// from a fixed range of guest memory. Only bookkeeping lives here; the
/// bytes themselves are ordinary guest pages. First fit over an
/// address-ordered free list, with neighbours coalesced on free.
#[derive(Debug, Clone)]
pub struct Arena {
    base: u32,
    size: u32,
    /// start -> length of live chunks
    allocated: BTreeMap<u32, u32>,
    /// start -> length of free ranges, never adjacent to each other
    free: BTreeMap<u32, u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ArenaInfo {
    pub bytes_free: u32,
    pub bytes_used: u32,
    pub chunks_used: u32,
}

impl Arena {
    pub fn new(base: u32, size: u32) -> Self {
        let base_aligned = (base + ALIGNMENT - 1) & !(ALIGNMENT - 1);
        let size = size.saturating_sub(base_aligned - base) & !(ALIGNMENT - 1);
        let mut free = BTreeMap::new();
        if size > 0 {
            free.insert(base_aligned, size);
        }
        Self { base: base_aligned, size, allocated: BTreeMap::new(), free }
    }

    pub fn base(&self) -> u32 {
        self.base
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn contains(&self, addr: u32) -> bool {
        addr >= self.base && addr - self.base < self.size
    }

    fn round(len: u32) -> Option<u32> {
        let len = len.max(ALIGNMENT);
        len.checked_add(ALIGNMENT - 1).map(|l| l & !(ALIGNMENT - 1))
    }

    /// Returns the chunk address, or `None` when the arena is exhausted.
    pub fn malloc(&mut self, len: u32) -> Option<u32> {
        let len = Self::round(len)?;
        let (&start, &avail) = self.free.iter().find(|(_, avail)| **avail >= len)?;
        self.free.remove(&start);
        if avail > len {
            self.free.insert(start + len, avail - len);
        }
        self.allocated.insert(start, len);
        Some(start)
    }

    /// Size of the live chunk starting at `addr`.
    pub fn chunk_size(&self, addr: u32) -> Option<u32> {
        self.allocated.get(&addr).copied()
    }

    /// Returns false for an address that is not the start of a live chunk.
    pub fn free(&mut self, addr: u32) -> bool {
        let Some(len) = self.allocated.remove(&addr) else {
            return false;
        };
        let mut start = addr;
        let mut len = len;
        if let Some((&prev, &prev_len)) = self.free.range(..addr).next_back() {
            if prev + prev_len == addr {
                self.free.remove(&prev);
                start = prev;
                len += prev_len;
            }
        }
        if let Some(next_len) = self.free.remove(&(start + len)) {
            len += next_len;
        }
        self.free.insert(start, len);
        true
    }

    /// Tries to resize the chunk at `addr` without moving it. Shrinking
    /// always succeeds; growing succeeds when the following range is free.
    pub fn resize_in_place(&mut self, addr: u32, new_len: u32) -> bool {
        let (Some(old), Some(new_len)) = (self.chunk_size(addr), Self::round(new_len)) else {
            return false;
        };
        if new_len == old {
            return true;
        }
        if new_len < old {
            self.allocated.insert(addr, new_len);
            let tail = addr + new_len;
            let mut tail_len = old - new_len;
            if let Some(next_len) = self.free.remove(&(addr + old)) {
                tail_len += next_len;
            }
            self.free.insert(tail, tail_len);
            return true;
        }
        let need = new_len - old;
        match self.free.get(&(addr + old)).copied() {
            Some(avail) if avail >= need => {
                self.free.remove(&(addr + old));
                if avail > need {
                    self.free.insert(addr + new_len, avail - need);
                }
                self.allocated.insert(addr, new_len);
                true
            }
            _ => false,
        }
    }

    pub fn info(&self) -> ArenaInfo {
        let bytes_used: u32 = self.allocated.values().sum();
        ArenaInfo { bytes_free: self.size - bytes_used, bytes_used, chunks_used: self.allocated.len() as u32 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocations_are_aligned_and_disjoint() {
        let mut arena = Arena::new(0x1003, 0x1000);
        let a = arena.malloc(3).unwrap();
        let b = arena.malloc(17).unwrap();
        assert_eq!(a % ALIGNMENT, 0);
        assert!(b >= a + 8);
        assert_eq!(arena.chunk_size(b), Some(24));
    }

    #[test]
    fn free_coalesces_neighbours() {
        let mut arena = Arena::new(0x1000, 64);
        let a = arena.malloc(16).unwrap();
        let b = arena.malloc(16).unwrap();
        let c = arena.malloc(32).unwrap();
        assert_eq!(arena.malloc(8), None);
        assert!(arena.free(a));
        assert!(arena.free(c));
        assert!(arena.free(b));
        assert!(!arena.free(b));
        assert_eq!(arena.malloc(64), Some(0x1000));
    }

    #[test]
    fn resize_in_place_grows_into_free_tail() {
        let mut arena = Arena::new(0x1000, 128);
        let a = arena.malloc(16).unwrap();
        assert!(arena.resize_in_place(a, 64));
        assert_eq!(arena.info().bytes_used, 64);
        let b = arena.malloc(8).unwrap();
        assert!(!arena.resize_in_place(a, 128));
        assert!(arena.resize_in_place(a, 8));
        assert_eq!(arena.info().chunks_used, 2);
        assert!(b > a);
    }
}
