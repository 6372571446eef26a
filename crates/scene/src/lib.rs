//! An in-memory host object graph.
//!
//! Stands in for the engine's scene tree wherever a sandbox needs a host:
//! tests, the command-line runner and embedding experiments.

pub mod class_db;
pub mod object;
pub mod scene;

pub use class_db::{ClassDb, HostMethod};
pub use object::{SceneObject, TimerState};
pub use scene::Scene;
