//! Host-side value model shared by the sandbox, the in-memory scene and the
//! guest toolkit: the dynamic `Variant`, its math payloads, object identity,
//! the syscall ABI numbering and the host object-graph interface.

pub mod abi;
pub mod callable;
pub mod containers;
pub mod host;
pub mod math;
pub mod object;
pub mod ops;
pub mod variant;
pub mod variant_type;

pub use callable::{Callable, Signal};
pub use containers::{Array, Dictionary};
pub use host::{HostError, HostResult, ObjectGraph, PendingCall};
pub use math::*;
pub use object::ObjectId;
pub use ops::VariantOp;
pub use variant::Variant;
pub use variant_type::VariantType;
