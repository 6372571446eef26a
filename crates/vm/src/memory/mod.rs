//! Paged guest memory.
//!
//! EDUCATIONAL PURPOSE: the guest sees a flat 32-bit address space, but only
//! the pages that were mapped exist. Each page carries its own
//! read/write/execute attributes, and every access is checked against them
//! before a single byte moves. A page is either owned by the machine or a
//! window into a host buffer ("non-owned" memory), which is how host data is
//! exposed to a guest without copying.

mod arena;
mod page;

use std::collections::HashMap;

pub use arena::{Arena, ArenaInfo};
pub use page::{Page, PageAttributes, SharedBuffer};

use crate::error::{Access, MachineError};

pub const PAGE_SIZE: usize = 4096;
pub const PAGE_SHIFT: u32 = 12;
pub const PAGE_OFFSET_MASK: u32 = 0xfff;

pub const fn page_number(addr: u32) -> u32 {
    addr >> PAGE_SHIFT
}

pub const fn align_down(addr: u32) -> u32 {
    addr & !PAGE_OFFSET_MASK
}

pub const fn align_up(len: usize) -> usize {
    (len + PAGE_SIZE - 1) & !(PAGE_SIZE - 1)
}

#[derive(Debug)]
pub struct Memory {
    pages: HashMap<u32, Page>,
    owned_pages: usize,
    max_owned_pages: usize,
}

impl Memory {
    /// `memory_max` bounds the bytes of machine-owned pages. Host-backed
    /// pages do not count against it.
    pub fn new(memory_max: usize) -> Self {
        Self { pages: HashMap::new(), owned_pages: 0, max_owned_pages: memory_max / PAGE_SIZE }
    }

    pub fn owned_bytes(&self) -> usize {
        self.owned_pages * PAGE_SIZE
    }

    pub fn page(&self, addr: u32) -> Option<&Page> {
        self.pages.get(&page_number(addr))
    }

    pub fn attributes(&self, addr: u32) -> Option<PageAttributes> {
        self.page(addr).map(|p| p.attr)
    }

    fn pages_in(addr: u32, len: usize) -> Result<std::ops::Range<u32>, MachineError> {
        if len == 0 {
            return Ok(0..0);
        }
        let last = (addr as u64) + len as u64 - 1;
        if last > u32::MAX as u64 {
            return Err(MachineError::PageFault { addr });
        }
        Ok(page_number(addr)..page_number(last as u32) + 1)
    }

    /// Maps zeroed owned pages over `[addr, addr + len)`. Pages that already
    /// exist keep their contents and get `attr`.
    pub fn map(&mut self, addr: u32, len: usize, attr: PageAttributes) -> Result<(), MachineError> {
        let range = Self::pages_in(addr, len)?;
        let missing = range.clone().filter(|p| !self.pages.contains_key(p)).count();
        if self.owned_pages + missing > self.max_owned_pages {
            return Err(MachineError::OutOfMemory { requested: missing * PAGE_SIZE });
        }
        for pageno in range {
            match self.pages.get_mut(&pageno) {
                Some(page) => page.attr = attr,
                None => {
                    self.pages.insert(pageno, Page::zeroed(attr));
                    self.owned_pages += 1;
                }
            }
        }
        Ok(())
    }

    pub fn set_page_attributes(&mut self, addr: u32, len: usize, attr: PageAttributes) -> Result<(), MachineError> {
        for pageno in Self::pages_in(addr, len)? {
            let page = self.pages.get_mut(&pageno).ok_or(MachineError::PageFault { addr: pageno << PAGE_SHIFT })?;
            page.attr = attr;
        }
        Ok(())
    }

    /// Maps `len` bytes of `buffer` (from its start) at the page-aligned
    /// `addr`. `len` must be a whole number of pages inside the buffer.
    pub fn insert_non_owned(
        &mut self,
        addr: u32,
        buffer: &SharedBuffer,
        len: usize,
        attr: PageAttributes,
    ) -> Result<(), MachineError> {
        if addr & PAGE_OFFSET_MASK != 0 || len % PAGE_SIZE != 0 {
            return Err(MachineError::InvalidOperation("non-owned mapping must be page aligned"));
        }
        if len > buffer.borrow().len() {
            return Err(MachineError::InvalidOperation("non-owned mapping exceeds its buffer"));
        }
        for (i, pageno) in Self::pages_in(addr, len)?.enumerate() {
            let page = Page::shared(attr, buffer.clone(), i * PAGE_SIZE);
            if let Some(old) = self.pages.insert(pageno, page) {
                if old.is_owned() {
                    self.owned_pages -= 1;
                }
            }
        }
        Ok(())
    }

    /// Unmaps every page touching `[addr, addr + len)`.
    pub fn free_pages(&mut self, addr: u32, len: usize) {
        if let Ok(range) = Self::pages_in(addr, len) {
            for pageno in range {
                if let Some(old) = self.pages.remove(&pageno) {
                    if old.is_owned() {
                        self.owned_pages -= 1;
                    }
                }
            }
        }
    }

    fn access(
        &mut self,
        addr: u32,
        len: usize,
        check: Option<Access>,
        mut op: impl FnMut(&mut Page, usize, std::ops::Range<usize>) -> bool,
    ) -> Result<(), MachineError> {
        if (addr as u64) + (len as u64) > (u32::MAX as u64) + 1 {
            return Err(MachineError::PageFault { addr });
        }
        let mut done = 0usize;
        while done < len {
            let cur = addr.wrapping_add(done as u32);
            let offset = (cur & PAGE_OFFSET_MASK) as usize;
            let chunk = (PAGE_SIZE - offset).min(len - done);
            let page = self.pages.get_mut(&page_number(cur)).ok_or(MachineError::PageFault { addr: cur })?;
            let allowed = match check {
                Some(Access::Read) => page.attr.read,
                Some(Access::Write) => page.attr.write,
                Some(Access::Execute) => page.attr.exec,
                None => true,
            };
            if !allowed {
                return Err(MachineError::ProtectionFault { addr: cur, access: check.unwrap_or(Access::Read) });
            }
            if !op(page, offset, done..done + chunk) {
                return Err(MachineError::ProtectionFault { addr: cur, access: check.unwrap_or(Access::Read) });
            }
            done += chunk;
        }
        Ok(())
    }

    pub fn read(&self, addr: u32, out: &mut [u8]) -> Result<(), MachineError> {
        self.read_checked(addr, out, Access::Read)
    }

    fn read_checked(&self, addr: u32, out: &mut [u8], access: Access) -> Result<(), MachineError> {
        if (addr as u64) + (out.len() as u64) > (u32::MAX as u64) + 1 {
            return Err(MachineError::PageFault { addr });
        }
        let mut done = 0usize;
        while done < out.len() {
            let cur = addr.wrapping_add(done as u32);
            let offset = (cur & PAGE_OFFSET_MASK) as usize;
            let chunk = (PAGE_SIZE - offset).min(out.len() - done);
            let page = self.page(cur).ok_or(MachineError::PageFault { addr: cur })?;
            let allowed = match access {
                Access::Read => page.attr.read,
                Access::Execute => page.attr.exec,
                Access::Write => page.attr.write,
            };
            if !allowed || !page.read(offset, &mut out[done..done + chunk]) {
                return Err(MachineError::ProtectionFault { addr: cur, access });
            }
            done += chunk;
        }
        Ok(())
    }

    pub fn write(&mut self, addr: u32, data: &[u8]) -> Result<(), MachineError> {
        self.access(addr, data.len(), Some(Access::Write), |page, offset, range| {
            page.write(offset, &data[range])
        })
    }

    /// Host-side write that ignores the write attribute, used to load
    /// read-only segments. The pages must be mapped.
    pub fn write_privileged(&mut self, addr: u32, data: &[u8]) -> Result<(), MachineError> {
        self.access(addr, data.len(), None, |page, offset, range| page.write(offset, &data[range]))
    }

    pub fn fetch(&self, pc: u32) -> Result<u32, MachineError> {
        if pc & 0x3 != 0 {
            return Err(MachineError::MisalignedFetch(pc));
        }
        let mut word = [0u8; 4];
        self.read_checked(pc, &mut word, Access::Execute)?;
        Ok(u32::from_le_bytes(word))
    }

    pub fn read_bytes(&self, addr: u32, len: usize) -> Result<Vec<u8>, MachineError> {
        let mut out = vec![0u8; len];
        self.read(addr, &mut out)?;
        Ok(out)
    }

    /// Reads a null-terminated string of at most `max` bytes.
    pub fn read_cstring(&self, addr: u32, max: usize) -> Result<Vec<u8>, MachineError> {
        let mut out = Vec::new();
        let mut byte = [0u8; 1];
        for i in 0..max {
            self.read(addr.wrapping_add(i as u32), &mut byte)?;
            if byte[0] == 0 {
                return Ok(out);
            }
            out.push(byte[0]);
        }
        Ok(out)
    }

    pub fn memset(&mut self, addr: u32, value: u8, len: usize) -> Result<(), MachineError> {
        self.access(addr, len, Some(Access::Write), |page, offset, range| {
            let fill = vec![value; range.len()];
            page.write(offset, &fill)
        })
    }

    /// Overlap-safe copy within guest memory.
    pub fn memmove(&mut self, dst: u32, src: u32, len: usize) -> Result<(), MachineError> {
        let data = self.read_bytes(src, len)?;
        self.write(dst, &data)
    }
}

macro_rules! typed_access {
    ($($read:ident / $write:ident : $ty:ty),* $(,)?) => {
        impl Memory {
            $(
                pub fn $read(&self, addr: u32) -> Result<$ty, MachineError> {
                    let mut buf = [0u8; core::mem::size_of::<$ty>()];
                    self.read(addr, &mut buf)?;
                    Ok(<$ty>::from_le_bytes(buf))
                }

                pub fn $write(&mut self, addr: u32, value: $ty) -> Result<(), MachineError> {
                    self.write(addr, &value.to_le_bytes())
                }
            )*
        }
    };
}

typed_access! {
    read_u8 / write_u8: u8,
    read_u16 / write_u16: u16,
    read_u32 / write_u32: u32,
    read_u64 / write_u64: u64,
    read_i64 / write_i64: i64,
    read_f32 / write_f32: f32,
    read_f64 / write_f64: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn access_spanning_two_pages() {
        let mut mem = Memory::new(1 << 20);
        mem.map(0x1000, 2 * PAGE_SIZE, PageAttributes::rw()).unwrap();
        mem.write_u32(0x1ffe, 0xdead_beef).unwrap();
        assert_eq!(mem.read_u32(0x1ffe).unwrap(), 0xdead_beef);
    }

    #[test]
    fn attributes_are_enforced() {
        let mut mem = Memory::new(1 << 20);
        mem.map(0x1000, PAGE_SIZE, PageAttributes::ro()).unwrap();
        assert_eq!(
            mem.write_u8(0x1004, 1),
            Err(MachineError::ProtectionFault { addr: 0x1004, access: Access::Write })
        );
        assert_eq!(mem.read_u8(0x3000), Err(MachineError::PageFault { addr: 0x3000 }));
        assert!(matches!(mem.fetch(0x1000), Err(MachineError::ProtectionFault { access: Access::Execute, .. })));
        mem.write_privileged(0x1004, &[7]).unwrap();
        assert_eq!(mem.read_u8(0x1004).unwrap(), 7);
    }

    #[test]
    fn owned_pages_are_bounded() {
        let mut mem = Memory::new(2 * PAGE_SIZE);
        mem.map(0, 2 * PAGE_SIZE, PageAttributes::rw()).unwrap();
        assert!(matches!(mem.map(0x10000, 1, PageAttributes::rw()), Err(MachineError::OutOfMemory { .. })));
    }

    #[test]
    fn non_owned_pages_alias_the_host_buffer() {
        let buffer: SharedBuffer = Rc::new(RefCell::new(vec![0u8; 2 * PAGE_SIZE]));
        let mut mem = Memory::new(PAGE_SIZE);
        mem.insert_non_owned(0x8000_0000, &buffer, 2 * PAGE_SIZE, PageAttributes::rw()).unwrap();
        mem.write_u32(0x8000_1000, 0x0403_0201).unwrap();
        assert_eq!(&buffer.borrow()[PAGE_SIZE..PAGE_SIZE + 4], &[1, 2, 3, 4]);
        buffer.borrow_mut()[0] = 9;
        assert_eq!(mem.read_u8(0x8000_0000).unwrap(), 9);
        assert_eq!(mem.owned_bytes(), 0);
    }
}
