//! The host object graph as the sandbox sees it.
//!
//! A sandbox never touches host objects directly: every guest request that
//! names an object goes through this trait after the sandbox has checked the
//! address against its scoped set and the allow policy. Only the operations
//! every host must have are required; tree, group, timer and resource
//! operations default to `HostError::Unsupported`.

use thiserror::Error;

use crate::callable::Callable;
use crate::object::ObjectId;
use crate::variant::Variant;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum HostError {
    #[error("object {0} does not exist")]
    NoSuchObject(ObjectId),
    #[error("{class} has no method '{method}'")]
    NoSuchMethod { class: String, method: String },
    #[error("{class} has no property '{property}'")]
    NoSuchProperty { class: String, property: String },
    #[error("{class} has no signal '{signal}'")]
    NoSuchSignal { class: String, signal: String },
    #[error("unknown class '{0}'")]
    UnknownClass(String),
    #[error("node not found: {0}")]
    NodeNotFound(String),
    #[error("resource not found: {0}")]
    ResourceNotFound(String),
    #[error("object {0} is not a node")]
    NotANode(ObjectId),
    #[error("invalid call: {0}")]
    InvalidCall(String),
    #[error("operation not supported by this host: {0}")]
    Unsupported(&'static str),
}

pub type HostResult<T> = Result<T, HostError>;

/// A callable the host wants invoked, produced by timers and signal
/// emission. Host-side callables are invoked by the host itself; guest
/// callables are handed back so that the owning sandbox can run them.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingCall {
    pub callable: Callable,
    pub args: Vec<Variant>,
}

pub trait ObjectGraph {
    fn exists(&self, object: ObjectId) -> bool;

    fn class_name(&self, object: ObjectId) -> HostResult<String>;

    /// True when `object` is of `class` or inherits from it.
    fn is_class(&self, object: ObjectId, class: &str) -> bool {
        self.class_name(object).map(|c| c == class).unwrap_or(false)
    }

    fn get_property(&self, object: ObjectId, name: &str) -> HostResult<Variant>;

    fn set_property(&mut self, object: ObjectId, name: &str, value: Variant) -> HostResult<()>;

    fn call_method(&mut self, object: ObjectId, method: &str, args: &[Variant]) -> HostResult<Variant>;

    fn call_deferred(&mut self, _object: ObjectId, _method: &str, _args: Vec<Variant>) -> HostResult<()> {
        Err(HostError::Unsupported("call_deferred"))
    }

    fn method_list(&self, object: ObjectId) -> HostResult<Vec<String>>;

    fn property_list(&self, object: ObjectId) -> HostResult<Vec<String>>;

    fn signal_list(&self, _object: ObjectId) -> HostResult<Vec<String>> {
        Ok(Vec::new())
    }

    fn connect(&mut self, _object: ObjectId, _signal: &str, _target: Callable) -> HostResult<()> {
        Err(HostError::Unsupported("connect"))
    }

    fn disconnect(&mut self, _object: ObjectId, _signal: &str, _target: &Callable) -> HostResult<()> {
        Err(HostError::Unsupported("disconnect"))
    }

    /// Creates an instance of `class`. The caller has already checked that
    /// the class is allowed.
    fn create_object(&mut self, class: &str) -> HostResult<ObjectId>;

    /// Named engine singletons ("Engine", "Input", ...).
    fn singleton(&self, _name: &str) -> Option<ObjectId> {
        None
    }

    fn get_node(&self, _base: ObjectId, path: &str) -> HostResult<ObjectId> {
        Err(HostError::NodeNotFound(path.to_owned()))
    }

    fn name(&self, _node: ObjectId) -> HostResult<String> {
        Err(HostError::Unsupported("name"))
    }

    fn set_name(&mut self, _node: ObjectId, _name: &str) -> HostResult<()> {
        Err(HostError::Unsupported("set_name"))
    }

    fn path(&self, _node: ObjectId) -> HostResult<String> {
        Err(HostError::Unsupported("path"))
    }

    /// `ObjectId::NULL` for the root or an orphan.
    fn parent(&self, _node: ObjectId) -> HostResult<ObjectId> {
        Err(HostError::Unsupported("parent"))
    }

    fn children(&self, _node: ObjectId) -> HostResult<Vec<ObjectId>> {
        Err(HostError::Unsupported("children"))
    }

    fn add_child(&mut self, _parent: ObjectId, _child: ObjectId, _deferred: bool) -> HostResult<()> {
        Err(HostError::Unsupported("add_child"))
    }

    fn add_sibling(&mut self, _node: ObjectId, _sibling: ObjectId, _deferred: bool) -> HostResult<()> {
        Err(HostError::Unsupported("add_sibling"))
    }

    fn move_child(&mut self, _parent: ObjectId, _child: ObjectId, _to: i64) -> HostResult<()> {
        Err(HostError::Unsupported("move_child"))
    }

    fn remove_child(&mut self, _parent: ObjectId, _child: ObjectId, _deferred: bool) -> HostResult<()> {
        Err(HostError::Unsupported("remove_child"))
    }

    fn reparent(&mut self, _node: ObjectId, _new_parent: ObjectId) -> HostResult<()> {
        Err(HostError::Unsupported("reparent"))
    }

    fn queue_free(&mut self, _node: ObjectId) -> HostResult<()> {
        Err(HostError::Unsupported("queue_free"))
    }

    fn duplicate(&mut self, _node: ObjectId) -> HostResult<ObjectId> {
        Err(HostError::Unsupported("duplicate"))
    }

    fn add_to_group(&mut self, _node: ObjectId, _group: &str) -> HostResult<()> {
        Err(HostError::Unsupported("add_to_group"))
    }

    fn remove_from_group(&mut self, _node: ObjectId, _group: &str) -> HostResult<()> {
        Err(HostError::Unsupported("remove_from_group"))
    }

    fn is_in_group(&self, _node: ObjectId, _group: &str) -> HostResult<bool> {
        Ok(false)
    }

    /// Creates a timer that invokes `callback` with the timer object as its
    /// first argument each time it fires.
    fn create_timer(&mut self, _interval: f64, _oneshot: bool, _callback: Callable) -> HostResult<ObjectId> {
        Err(HostError::Unsupported("create_timer"))
    }

    fn stop_timer(&mut self, _timer: ObjectId) -> HostResult<()> {
        Err(HostError::Unsupported("stop_timer"))
    }

    fn load(&mut self, path: &str) -> HostResult<Variant> {
        Err(HostError::ResourceNotFound(path.to_owned()))
    }

    fn is_editor(&self) -> bool {
        false
    }

    /// Guest `print` output.
    fn print(&mut self, text: &str) {
        log::info!("{text}");
    }

    /// Advances host time and returns the guest callables that became due
    /// (fired timers, emitted signals connected to guest functions).
    fn process(&mut self, _delta: f64) -> Vec<PendingCall> {
        Vec::new()
    }
}
