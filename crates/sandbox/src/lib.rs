//! Runs RISC-V guest programs as scripts of a host object graph.
//!
//! A `Sandbox` owns one `vm::Machine` and one host (`types::ObjectGraph`).
//! Guest code reaches the host only through the syscall table in
//! `syscalls`, which marshals values through `GuestVariant`, keeps complex
//! values in the scoped store and checks every object, method, property
//! and resource against the `ObjectGuard`.

// external
pub extern crate hex;

// exports
pub mod config;
pub mod counters;
mod engine;
pub mod error;
pub mod execution_context;
pub mod global;
pub mod guard;
pub mod guest_variant;
pub mod profiling;
pub mod sandbox;
pub mod scoped;
mod shm;
pub mod singletons;
mod syscalls;
pub mod translation;

pub use config::SandboxConfig;
pub use counters::{global_counters, instance_count, CallCounters};
pub use engine::FaultReport;
pub use error::{ErrorKind, SandboxError};
pub use global::Config;
pub use guard::{AllowPolicy, ClassPredicate, MethodPredicate, ObjectGuard, ObjectPredicate, PropertyPredicate, ResourcePredicate};
pub use guest_variant::{GuestStdString, GuestStdVector, GuestVariant};
pub use profiling::{Hotspot, HotspotReport};
pub use sandbox::Sandbox;
pub use scoped::{ScopedObjects, ScopedVariants};
pub use shm::{read_typed_buffer, typed_buffer, BufferElement};
pub use singletons::{SingletonLookup, Singletons};
pub use translation::{background_translation_enabled, enable_background_translation};
pub use vm::SharedBuffer;
