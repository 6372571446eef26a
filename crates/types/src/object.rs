use core::fmt;

/// Identity of a host object as the guest sees it: an opaque 32-bit address.
///
/// Zero is the null object. The host hands these out; a guest can only use
/// one after the sandbox has scoped it for the current call chain.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct ObjectId(pub u32);

impl ObjectId {
    pub const NULL: ObjectId = ObjectId(0);

    pub const fn new(address: u32) -> Self {
        Self(address)
    }

    pub const fn address(self) -> u32 {
        self.0
    }

    pub const fn is_null(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectId(0x{:x})", self.0)
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:x}", self.0)
    }
}

impl From<u32> for ObjectId {
    fn from(value: u32) -> Self {
        ObjectId(value)
    }
}
