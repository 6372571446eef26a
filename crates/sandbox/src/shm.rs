//! Host buffers made visible to the guest.
//!
//! The whole pages of a buffer are mapped straight into guest memory, so
//! both sides see each other's writes without copying. A trailing partial
//! page cannot be mapped that way; it gets an owned page holding a copy,
//! which is written back to the buffer when the range is unshared.

use std::cell::RefCell;
use std::rc::Rc;

use types::{Vector2, Vector3, Vector4};
use vm::{Memory, PageAttributes, SharedBuffer, PAGE_SIZE};

use crate::error::SandboxError;

#[derive(Debug)]
struct SharedRange {
    addr: u32,
    len: usize,
    /// Bytes mapped without copying; always whole pages.
    mapped: usize,
    writable: bool,
    buffer: SharedBuffer,
}

impl SharedRange {
    fn span(&self) -> usize {
        self.len.div_ceil(PAGE_SIZE) * PAGE_SIZE
    }
}

#[derive(Debug)]
pub(crate) struct SharedMemory {
    next: u32,
    ranges: Vec<SharedRange>,
}

impl SharedMemory {
    pub(crate) fn new(base: u32) -> Self {
        Self { next: base, ranges: Vec::new() }
    }

    pub(crate) fn len(&self) -> usize {
        self.ranges.len()
    }

    pub(crate) fn share(&mut self, memory: &mut Memory, buffer: SharedBuffer, writable: bool) -> Result<u32, SandboxError> {
        let len = buffer.borrow().len();
        if len == 0 {
            return Err(SandboxError::InvalidArgument("cannot share an empty buffer".into()));
        }
        let addr = self.next;
        let span = len.div_ceil(PAGE_SIZE) * PAGE_SIZE;
        let next = u32::try_from(span)
            .ok()
            .and_then(|span| addr.checked_add(span))
            .ok_or_else(|| SandboxError::InvalidArgument(format!("no guest address space left for {len} bytes")))?;

        let attr = if writable { PageAttributes::rw() } else { PageAttributes::ro() };
        let mapped = len / PAGE_SIZE * PAGE_SIZE;
        if mapped > 0 {
            memory.insert_non_owned(addr, &buffer, mapped, attr)?;
        }
        if mapped < len {
            let tail = addr + mapped as u32;
            memory.map(tail, PAGE_SIZE, PageAttributes::rw())?;
            memory.write_privileged(tail, &buffer.borrow()[mapped..])?;
            memory.set_page_attributes(tail, PAGE_SIZE, attr)?;
        }

        log::debug!("shared {len} bytes at 0x{addr:08x} ({} mapped, writable: {writable})", mapped);
        self.ranges.push(SharedRange { addr, len, mapped, writable, buffer });
        self.next = next;
        Ok(addr)
    }

    pub(crate) fn unshare(&mut self, memory: &mut Memory, addr: u32) -> Result<(), SandboxError> {
        let position = self.ranges.iter().position(|r| r.addr == addr).ok_or_else(|| {
            log::warn!("unshare of unknown range 0x{addr:08x}");
            SandboxError::UnknownRange(addr)
        })?;
        let range = self.ranges.remove(position);
        if range.writable && range.mapped < range.len {
            let tail = memory.read_bytes(addr + range.mapped as u32, range.len - range.mapped)?;
            range.buffer.borrow_mut()[range.mapped..range.len].copy_from_slice(&tail);
        }
        memory.free_pages(addr, range.span());
        Ok(())
    }
}

/// An element type a shared buffer can be built from, stored the way the
/// guest lays it out: little-endian lanes, no padding.
pub trait BufferElement: Sized {
    const SIZE: usize;
    fn put(&self, out: &mut Vec<u8>);
    fn take(bytes: &[u8]) -> Self;
}

fn lane_f32(bytes: &[u8], i: usize) -> f32 {
    f32::from_le_bytes([bytes[i * 4], bytes[i * 4 + 1], bytes[i * 4 + 2], bytes[i * 4 + 3]])
}

macro_rules! scalar_element {
    ($($ty:ty),+) => {
        $(impl BufferElement for $ty {
            const SIZE: usize = core::mem::size_of::<$ty>();

            fn put(&self, out: &mut Vec<u8>) {
                out.extend_from_slice(&self.to_le_bytes());
            }

            fn take(bytes: &[u8]) -> Self {
                let mut raw = [0u8; core::mem::size_of::<$ty>()];
                raw.copy_from_slice(&bytes[..Self::SIZE]);
                <$ty>::from_le_bytes(raw)
            }
        })+
    };
}

scalar_element!(f32, f64, i32, i64);

impl BufferElement for Vector2 {
    const SIZE: usize = 8;

    fn put(&self, out: &mut Vec<u8>) {
        self.x.put(out);
        self.y.put(out);
    }

    fn take(bytes: &[u8]) -> Self {
        Vector2::new(lane_f32(bytes, 0), lane_f32(bytes, 1))
    }
}

impl BufferElement for Vector3 {
    const SIZE: usize = 12;

    fn put(&self, out: &mut Vec<u8>) {
        self.x.put(out);
        self.y.put(out);
        self.z.put(out);
    }

    fn take(bytes: &[u8]) -> Self {
        Vector3::new(lane_f32(bytes, 0), lane_f32(bytes, 1), lane_f32(bytes, 2))
    }
}

impl BufferElement for Vector4 {
    const SIZE: usize = 16;

    fn put(&self, out: &mut Vec<u8>) {
        self.x.put(out);
        self.y.put(out);
        self.z.put(out);
        self.w.put(out);
    }

    fn take(bytes: &[u8]) -> Self {
        Vector4::new(lane_f32(bytes, 0), lane_f32(bytes, 1), lane_f32(bytes, 2), lane_f32(bytes, 3))
    }
}

/// A new shared buffer holding `values`, e.g. `typed_buffer(&[1.0f32, 2.0])`
/// or a slice of `Vector3`.
pub fn typed_buffer<T: BufferElement>(values: &[T]) -> SharedBuffer {
    let mut bytes = Vec::with_capacity(values.len() * T::SIZE);
    for value in values {
        value.put(&mut bytes);
    }
    Rc::new(RefCell::new(bytes))
}

/// Decodes a shared buffer as `T` values. A trailing partial element is
/// ignored.
pub fn read_typed_buffer<T: BufferElement>(buffer: &SharedBuffer) -> Vec<T> {
    buffer.borrow().chunks_exact(T::SIZE).map(T::take).collect()
}
