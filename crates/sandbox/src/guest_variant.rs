//! Guest-visible value layouts: the 24-byte guest variant and the flat
//! `std::string` / `std::vector` descriptors guests use for bulk data.

use types::{
    Color, ObjectId, Plane, Rect2, Rect2i, Variant, VariantType, Vector2, Vector2i, Vector3, Vector3i, Vector4,
    Vector4i,
};
use vm::{Arena, Memory};

use crate::error::SandboxError;
use crate::global::Config;
use crate::scoped::{ScopedObjects, ScopedVariants};

/// A tagged value as it lives in guest memory.
///
/// Inline kinds (bool, int, float, the small vectors, rects, planes and
/// colors) are stored in the payload itself. Scoped kinds store a signed
/// index into the host value store, and objects store their address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(C, align(8))]
pub struct GuestVariant {
    pub ty: u32,
    padding: u32,
    pub payload: [u8; 16],
}

const _: () = assert!(core::mem::size_of::<GuestVariant>() == Config::GUEST_VARIANT_SIZE);
const _: () = assert!(core::mem::align_of::<GuestVariant>() == 8);

fn lanes_f32<const N: usize>(payload: &[u8; 16]) -> [f32; N] {
    let mut out = [0f32; N];
    for (i, lane) in out.iter_mut().enumerate() {
        *lane = f32::from_le_bytes([payload[i * 4], payload[i * 4 + 1], payload[i * 4 + 2], payload[i * 4 + 3]]);
    }
    out
}

fn lanes_i32<const N: usize>(payload: &[u8; 16]) -> [i32; N] {
    let mut out = [0i32; N];
    for (i, lane) in out.iter_mut().enumerate() {
        *lane = i32::from_le_bytes([payload[i * 4], payload[i * 4 + 1], payload[i * 4 + 2], payload[i * 4 + 3]]);
    }
    out
}

impl GuestVariant {
    pub const SIZE: u32 = Config::GUEST_VARIANT_SIZE as u32;

    pub fn nil() -> Self {
        Self::default()
    }

    fn with_type(ty: VariantType) -> Self {
        Self { ty: ty as u32, ..Self::default() }
    }

    pub fn from_int(value: i64) -> Self {
        Self::with_type(VariantType::Int).with_payload(&value.to_le_bytes())
    }

    pub fn from_float(value: f64) -> Self {
        Self::with_type(VariantType::Float).with_payload(&value.to_le_bytes())
    }

    pub fn from_bool(value: bool) -> Self {
        Self::with_type(VariantType::Bool).with_payload(&[value as u8])
    }

    pub fn from_object(object: ObjectId) -> Self {
        Self::with_type(VariantType::Object).with_payload(&(object.address() as u64).to_le_bytes())
    }

    /// A scoped value referring to `index` in the host value store.
    pub fn from_index(ty: VariantType, index: i32) -> Self {
        Self::with_type(ty).with_payload(&(index as i64).to_le_bytes())
    }

    fn with_payload(mut self, bytes: &[u8]) -> Self {
        self.payload[..bytes.len()].copy_from_slice(bytes);
        self
    }

    fn with_f32s(self, lanes: &[f32]) -> Self {
        let bytes: Vec<u8> = lanes.iter().flat_map(|l| l.to_le_bytes()).collect();
        self.with_payload(&bytes)
    }

    fn with_i32s(self, lanes: &[i32]) -> Self {
        let bytes: Vec<u8> = lanes.iter().flat_map(|l| l.to_le_bytes()).collect();
        self.with_payload(&bytes)
    }

    pub fn from_bytes(bytes: &[u8; 24]) -> Self {
        let mut payload = [0u8; 16];
        payload.copy_from_slice(&bytes[8..24]);
        Self {
            ty: u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            padding: u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
            payload,
        }
    }

    pub fn to_bytes(&self) -> [u8; 24] {
        let mut out = [0u8; 24];
        out[0..4].copy_from_slice(&self.ty.to_le_bytes());
        out[4..8].copy_from_slice(&self.padding.to_le_bytes());
        out[8..24].copy_from_slice(&self.payload);
        out
    }

    pub fn read(memory: &Memory, addr: u32) -> Result<Self, SandboxError> {
        let mut bytes = [0u8; 24];
        memory.read(addr, &mut bytes)?;
        Ok(Self::from_bytes(&bytes))
    }

    pub fn write(&self, memory: &mut Memory, addr: u32) -> Result<(), SandboxError> {
        memory.write(addr, &self.to_bytes())?;
        Ok(())
    }

    /// Reads `count` consecutive guest variants.
    pub fn read_array(memory: &Memory, addr: u32, count: usize) -> Result<Vec<Self>, SandboxError> {
        (0..count).map(|i| Self::read(memory, addr.wrapping_add(i as u32 * Self::SIZE))).collect()
    }

    pub fn variant_type(&self) -> Result<VariantType, SandboxError> {
        VariantType::from_u32(self.ty).ok_or(SandboxError::UnknownType(self.ty))
    }

    pub fn int(&self) -> i64 {
        i64::from_le_bytes(self.payload[..8].try_into().unwrap_or([0; 8]))
    }

    pub fn float(&self) -> f64 {
        f64::from_bits(self.int() as u64)
    }

    pub fn boolean(&self) -> bool {
        self.payload[0] != 0
    }

    pub fn object(&self) -> ObjectId {
        ObjectId(self.int() as u32)
    }

    pub fn is_scoped(&self) -> bool {
        VariantType::from_u32(self.ty).is_some_and(VariantType::is_scoped)
    }

    /// Store index of a scoped value.
    pub fn index(&self) -> Result<i32, SandboxError> {
        let raw = self.int();
        i32::try_from(raw).map_err(|_| SandboxError::InvalidReference(raw as i32))
    }

    /// Encodes `value`: inline kinds directly, complex kinds through the
    /// value store. Encoding an object scopes it for the current call.
    pub fn create(
        value: &Variant,
        variants: &mut ScopedVariants,
        objects: &mut ScopedObjects,
    ) -> Result<Self, SandboxError> {
        let ty = value.get_type();
        Ok(match value {
            Variant::Nil => Self::nil(),
            Variant::Bool(b) => Self::from_bool(*b),
            Variant::Int(i) => Self::from_int(*i),
            Variant::Float(f) => Self::from_float(*f),
            Variant::Vector2(v) => Self::with_type(ty).with_f32s(&[v.x, v.y]),
            Variant::Vector2i(v) => Self::with_type(ty).with_i32s(&[v.x, v.y]),
            Variant::Rect2(r) => Self::with_type(ty).with_f32s(&[r.position.x, r.position.y, r.size.x, r.size.y]),
            Variant::Rect2i(r) => Self::with_type(ty).with_i32s(&[r.position.x, r.position.y, r.size.x, r.size.y]),
            Variant::Vector3(v) => Self::with_type(ty).with_f32s(&[v.x, v.y, v.z]),
            Variant::Vector3i(v) => Self::with_type(ty).with_i32s(&[v.x, v.y, v.z]),
            Variant::Vector4(v) => Self::with_type(ty).with_f32s(&[v.x, v.y, v.z, v.w]),
            Variant::Vector4i(v) => Self::with_type(ty).with_i32s(&[v.x, v.y, v.z, v.w]),
            Variant::Plane(p) => Self::with_type(ty).with_f32s(&[p.normal.x, p.normal.y, p.normal.z, p.d]),
            Variant::Color(c) => Self::with_type(ty).with_f32s(&[c.r, c.g, c.b, c.a]),
            Variant::Object(o) => {
                objects.scope(*o)?;
                Self::from_object(*o)
            }
            other => Self::from_index(ty, variants.create_scoped(other.clone())?),
        })
    }

    /// Decodes into a host value. Scoped kinds need a live index, objects
    /// must be scoped (or null).
    pub fn to_variant(&self, variants: &ScopedVariants, objects: &ScopedObjects) -> Result<Variant, SandboxError> {
        let ty = self.variant_type()?;
        let p = &self.payload;
        Ok(match ty {
            VariantType::Nil => Variant::Nil,
            VariantType::Bool => Variant::Bool(self.boolean()),
            VariantType::Int => Variant::Int(self.int()),
            VariantType::Float => Variant::Float(self.float()),
            VariantType::Vector2 => {
                let [x, y] = lanes_f32::<2>(p);
                Variant::Vector2(Vector2::new(x, y))
            }
            VariantType::Vector2i => {
                let [x, y] = lanes_i32::<2>(p);
                Variant::Vector2i(Vector2i::new(x, y))
            }
            VariantType::Rect2 => {
                let [x, y, w, h] = lanes_f32::<4>(p);
                Variant::Rect2(Rect2 { position: Vector2::new(x, y), size: Vector2::new(w, h) })
            }
            VariantType::Rect2i => {
                let [x, y, w, h] = lanes_i32::<4>(p);
                Variant::Rect2i(Rect2i { position: Vector2i::new(x, y), size: Vector2i::new(w, h) })
            }
            VariantType::Vector3 => {
                let [x, y, z] = lanes_f32::<3>(p);
                Variant::Vector3(Vector3::new(x, y, z))
            }
            VariantType::Vector3i => {
                let [x, y, z] = lanes_i32::<3>(p);
                Variant::Vector3i(Vector3i::new(x, y, z))
            }
            VariantType::Vector4 => {
                let [x, y, z, w] = lanes_f32::<4>(p);
                Variant::Vector4(Vector4::new(x, y, z, w))
            }
            VariantType::Vector4i => {
                let [x, y, z, w] = lanes_i32::<4>(p);
                Variant::Vector4i(Vector4i::new(x, y, z, w))
            }
            VariantType::Plane => {
                let [x, y, z, d] = lanes_f32::<4>(p);
                Variant::Plane(Plane { normal: Vector3::new(x, y, z), d })
            }
            VariantType::Color => {
                let [r, g, b, a] = lanes_f32::<4>(p);
                Variant::Color(Color::new(r, g, b, a))
            }
            VariantType::Object => {
                let object = self.object();
                if !object.is_null() && !objects.contains(object) {
                    return Err(SandboxError::UnscopedObject(object));
                }
                Variant::Object(object)
            }
            scoped => {
                let value = variants.get(self.index()?)?;
                if value.get_type() != scoped {
                    return Err(SandboxError::mismatch(scoped, value.get_type()));
                }
                value.clone()
            }
        })
    }
}

/// A guest `std::string`: pointer, size, and either 16 inline bytes or the
/// heap capacity.
pub struct GuestStdString;

impl GuestStdString {
    pub const SIZE: u32 = Config::STD_STRING_SIZE as u32;

    pub fn read_bytes(memory: &Memory, addr: u32) -> Result<Vec<u8>, SandboxError> {
        let ptr = memory.read_u32(addr)?;
        let size = memory.read_u32(addr.wrapping_add(4))? as usize;
        if size <= Config::STD_STRING_SSO {
            return Ok(memory.read_bytes(addr.wrapping_add(8), size)?);
        }
        if size > Config::MAX_STRING_LEN {
            return Err(SandboxError::InvalidArgument(format!("guest string too large ({size} bytes)")));
        }
        Ok(memory.read_bytes(ptr, size)?)
    }

    pub fn read(memory: &Memory, addr: u32) -> Result<String, SandboxError> {
        Ok(String::from_utf8_lossy(&Self::read_bytes(memory, addr)?).into_owned())
    }

    /// Fills the descriptor at `addr`. Long strings get a null-terminated
    /// buffer from the guest heap, which the guest later frees.
    pub fn write(memory: &mut Memory, arena: &mut Arena, addr: u32, bytes: &[u8]) -> Result<(), SandboxError> {
        let len = bytes.len();
        if len > Config::MAX_STRING_LEN {
            return Err(SandboxError::InvalidArgument(format!("string too large ({len} bytes)")));
        }
        if len <= Config::STD_STRING_SSO {
            let mut inline = [0u8; 16];
            inline[..len].copy_from_slice(bytes);
            memory.write_u32(addr, addr.wrapping_add(8))?;
            memory.write_u32(addr.wrapping_add(4), len as u32)?;
            memory.write(addr.wrapping_add(8), &inline)?;
            return Ok(());
        }
        let ptr = arena.malloc(len as u32 + 1).ok_or(vm::MachineError::OutOfMemory { requested: len + 1 })?;
        memory.write(ptr, bytes)?;
        memory.write_u8(ptr.wrapping_add(len as u32), 0)?;
        memory.write_u32(addr, ptr)?;
        memory.write_u32(addr.wrapping_add(4), len as u32)?;
        memory.write_u32(addr.wrapping_add(8), len as u32)?;
        Ok(())
    }
}

/// A guest `std::vector`: begin, end and capacity addresses.
pub struct GuestStdVector;

impl GuestStdVector {
    pub const SIZE: u32 = Config::STD_VECTOR_SIZE as u32;

    pub fn read_bytes(memory: &Memory, addr: u32) -> Result<Vec<u8>, SandboxError> {
        let begin = memory.read_u32(addr)?;
        let end = memory.read_u32(addr.wrapping_add(4))?;
        let len = end.checked_sub(begin).ok_or_else(|| SandboxError::InvalidArgument("vector end before begin".into()))?
            as usize;
        if len > Config::MAX_VECTOR_BYTES {
            return Err(SandboxError::InvalidArgument(format!("guest vector too large ({len} bytes)")));
        }
        Ok(memory.read_bytes(begin, len)?)
    }

    pub fn write(memory: &mut Memory, arena: &mut Arena, addr: u32, bytes: &[u8]) -> Result<(), SandboxError> {
        let len = bytes.len();
        if len > Config::MAX_VECTOR_BYTES {
            return Err(SandboxError::InvalidArgument(format!("vector too large ({len} bytes)")));
        }
        let begin = if len == 0 {
            0
        } else {
            let ptr = arena.malloc(len as u32).ok_or(vm::MachineError::OutOfMemory { requested: len })?;
            memory.write(ptr, bytes)?;
            ptr
        };
        let end = begin.wrapping_add(len as u32);
        memory.write_u32(addr, begin)?;
        memory.write_u32(addr.wrapping_add(4), end)?;
        memory.write_u32(addr.wrapping_add(8), end)?;
        Ok(())
    }

    /// Reads a vector of `std::string`.
    pub fn read_strings(memory: &Memory, addr: u32) -> Result<Vec<String>, SandboxError> {
        let begin = memory.read_u32(addr)?;
        let count = Self::read_bytes(memory, addr)?.len() / Config::STD_STRING_SIZE;
        (0..count).map(|i| GuestStdString::read(memory, begin.wrapping_add(i as u32 * GuestStdString::SIZE))).collect()
    }

    /// Fills the descriptor at `addr` with a new vector of `std::string`.
    pub fn write_strings<S: AsRef<str>>(
        memory: &mut Memory,
        arena: &mut Arena,
        addr: u32,
        strings: &[S],
    ) -> Result<(), SandboxError> {
        Self::write(memory, arena, addr, &vec![0u8; strings.len() * Config::STD_STRING_SIZE])?;
        let begin = memory.read_u32(addr)?;
        for (i, s) in strings.iter().enumerate() {
            let at = begin.wrapping_add(i as u32 * GuestStdString::SIZE);
            GuestStdString::write(memory, arena, at, s.as_ref().as_bytes())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use types::Array;
    use vm::PageAttributes;

    const BASE: u32 = 0x10000;

    fn memory() -> (Memory, Arena) {
        let mut memory = Memory::new(1 << 20);
        memory.map(BASE, 0x4000, PageAttributes::rw()).unwrap();
        (memory, Arena::new(BASE + 0x1000, 0x3000))
    }

    #[test]
    fn inline_kinds_do_not_touch_the_store() {
        let mut variants = ScopedVariants::new(8);
        let mut objects = ScopedObjects::new(8);
        for value in [
            Variant::Nil,
            Variant::Bool(true),
            Variant::Int(-42),
            Variant::Float(2.5),
            Variant::Vector3i(Vector3i::new(1, -2, 3)),
            Variant::Color(Color::new(0.1, 0.2, 0.3, 1.0)),
            Variant::Rect2(Rect2 { position: Vector2::new(1.0, 2.0), size: Vector2::new(3.0, 4.0) }),
        ] {
            let gv = GuestVariant::create(&value, &mut variants, &mut objects).unwrap();
            assert_eq!(gv.to_variant(&variants, &objects).unwrap(), value);
        }
        assert_eq!(variants.transient_len(), 0);
    }

    #[test]
    fn scoped_kinds_go_through_the_store() {
        let mut variants = ScopedVariants::new(8);
        let mut objects = ScopedObjects::new(8);
        let value = Variant::Array(Array::from_vec(vec![Variant::Int(1)]));
        let gv = GuestVariant::create(&value, &mut variants, &mut objects).unwrap();
        assert_eq!(gv.ty, VariantType::Array as u32);
        assert_eq!(gv.index().unwrap(), 0);
        assert_eq!(gv.to_variant(&variants, &objects).unwrap(), value);
        variants.clear_transient();
        assert_eq!(gv.to_variant(&variants, &objects), Err(SandboxError::InvalidReference(0)));
    }

    #[test]
    fn wrong_kind_for_index_is_a_mismatch() {
        let mut variants = ScopedVariants::new(8);
        let objects = ScopedObjects::new(8);
        let index = variants.create_scoped(Variant::from("text")).unwrap();
        let gv = GuestVariant::from_index(VariantType::Dictionary, index);
        assert!(matches!(gv.to_variant(&variants, &objects), Err(SandboxError::TypeMismatch { .. })));
        let unknown = GuestVariant { ty: 400, ..GuestVariant::nil() };
        assert_eq!(unknown.to_variant(&variants, &objects), Err(SandboxError::UnknownType(400)));
    }

    #[test]
    fn objects_must_be_scoped() {
        let variants = ScopedVariants::new(8);
        let mut objects = ScopedObjects::new(8);
        let gv = GuestVariant::from_object(ObjectId(0x2000));
        assert_eq!(gv.to_variant(&variants, &objects), Err(SandboxError::UnscopedObject(ObjectId(0x2000))));
        objects.scope(ObjectId(0x2000)).unwrap();
        assert_eq!(gv.to_variant(&variants, &objects).unwrap(), Variant::Object(ObjectId(0x2000)));
    }

    #[test]
    fn std_string_sso_boundary() {
        let (mut memory, mut arena) = memory();
        let fifteen = "a".repeat(15);
        GuestStdString::write(&mut memory, &mut arena, BASE, fifteen.as_bytes()).unwrap();
        assert_eq!(memory.read_u32(BASE).unwrap(), BASE + 8);
        assert_eq!(GuestStdString::read(&memory, BASE).unwrap(), fifteen);
        assert_eq!(arena.info().chunks_used, 0);

        let sixteen = "b".repeat(16);
        GuestStdString::write(&mut memory, &mut arena, BASE + 0x40, sixteen.as_bytes()).unwrap();
        let ptr = memory.read_u32(BASE + 0x40).unwrap();
        assert!(arena.contains(ptr));
        assert_eq!(memory.read_u8(ptr + 16).unwrap(), 0);
        assert_eq!(GuestStdString::read(&memory, BASE + 0x40).unwrap(), sixteen);
    }

    #[test]
    fn std_vector_round_trip() {
        let (mut memory, mut arena) = memory();
        GuestStdVector::write(&mut memory, &mut arena, BASE, &[1, 2, 3, 4]).unwrap();
        assert_eq!(GuestStdVector::read_bytes(&memory, BASE).unwrap(), vec![1, 2, 3, 4]);
        GuestStdVector::write(&mut memory, &mut arena, BASE + 0x20, &[]).unwrap();
        assert!(GuestStdVector::read_bytes(&memory, BASE + 0x20).unwrap().is_empty());
    }

    #[test]
    fn vector_of_strings() {
        let (mut memory, mut arena) = memory();
        let names = ["ready", "a_method_name_longer_than_sso"];
        GuestStdVector::write_strings(&mut memory, &mut arena, BASE, &names).unwrap();
        assert_eq!(GuestStdVector::read_strings(&memory, BASE).unwrap(), names);
    }

    #[test]
    fn descriptors_at_the_top_of_memory_fault_cleanly() {
        let (mut memory, mut arena) = memory();
        let top = u32::MAX - (vm::PAGE_SIZE as u32 - 1);
        memory.map(top, vm::PAGE_SIZE, PageAttributes::rw()).unwrap();
        let last_word = u32::MAX - 3;

        assert!(GuestStdString::read_bytes(&memory, last_word).is_err());
        assert!(GuestStdString::write(&mut memory, &mut arena, last_word, b"hi").is_err());
        assert!(GuestStdString::write(&mut memory, &mut arena, last_word, &[b'x'; 32]).is_err());
        assert!(GuestStdVector::read_bytes(&memory, last_word).is_err());
        assert!(GuestStdVector::write(&mut memory, &mut arena, last_word, &[1, 2]).is_err());
        assert!(GuestVariant::read(&memory, last_word).is_err());
    }
}
