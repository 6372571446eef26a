use std::cell::RefCell;
use std::rc::Rc;

use super::PAGE_SIZE;

/// Host-owned byte storage that can be mapped into guest memory without
/// copying. The host keeps its own handle; whatever the guest writes through
/// a writable mapping is visible to the host immediately.
pub type SharedBuffer = Rc<RefCell<Vec<u8>>>;

/// Read/write/execute triple of a page.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct PageAttributes {
    pub read: bool,
    pub write: bool,
    pub exec: bool,
}

impl PageAttributes {
    pub const fn new(read: bool, write: bool, exec: bool) -> Self {
        Self { read, write, exec }
    }

    pub const fn rw() -> Self {
        Self::new(true, true, false)
    }

    pub const fn ro() -> Self {
        Self::new(true, false, false)
    }

    pub const fn rx() -> Self {
        Self::new(true, false, true)
    }
}

#[derive(Debug)]
pub(crate) enum PageData {
    Owned(Box<[u8]>),
    /// A window of `PAGE_SIZE` bytes into a host buffer.
    Shared { buffer: SharedBuffer, offset: usize },
}

#[derive(Debug)]
pub struct Page {
    pub attr: PageAttributes,
    pub(crate) data: PageData,
}

impl Page {
    pub(crate) fn zeroed(attr: PageAttributes) -> Self {
        Self { attr, data: PageData::Owned(vec![0u8; PAGE_SIZE].into_boxed_slice()) }
    }

    pub(crate) fn shared(attr: PageAttributes, buffer: SharedBuffer, offset: usize) -> Self {
        Self { attr, data: PageData::Shared { buffer, offset } }
    }

    pub fn is_owned(&self) -> bool {
        matches!(self.data, PageData::Owned(_))
    }

    /// Copies `out.len()` bytes starting at `offset` within the page.
    /// Returns false when a shared window no longer fits its host buffer.
    pub(crate) fn read(&self, offset: usize, out: &mut [u8]) -> bool {
        match &self.data {
            PageData::Owned(bytes) => {
                out.copy_from_slice(&bytes[offset..offset + out.len()]);
                true
            }
            PageData::Shared { buffer, offset: base } => {
                let buffer = buffer.borrow();
                match buffer.get(base + offset..base + offset + out.len()) {
                    Some(src) => {
                        out.copy_from_slice(src);
                        true
                    }
                    None => false,
                }
            }
        }
    }

    pub(crate) fn write(&mut self, offset: usize, data: &[u8]) -> bool {
        match &mut self.data {
            PageData::Owned(bytes) => {
                bytes[offset..offset + data.len()].copy_from_slice(data);
                true
            }
            PageData::Shared { buffer, offset: base } => {
                let mut buffer = buffer.borrow_mut();
                match buffer.get_mut(*base + offset..*base + offset + data.len()) {
                    Some(dst) => {
                        dst.copy_from_slice(data);
                        true
                    }
                    None => false,
                }
            }
        }
    }
}
