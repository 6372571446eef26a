use std::collections::{BTreeMap, HashMap};

use hex::encode as hex_encode;
use types::{Callable, HostError, HostResult, ObjectGraph, ObjectId, PendingCall, Variant};

use crate::class_db::{ClassDb, HostMethod};
use crate::object::{SceneObject, TimerState};

/// Address of the first object. Everything below is never a valid object,
/// which keeps small integers (variant indices) from aliasing objects.
const FIRST_ADDRESS: u32 = 0x0010_0000;
const ADDRESS_STRIDE: u32 = 0x40;

#[derive(Debug, Clone)]
enum Deferred {
    Call { object: ObjectId, method: String, args: Vec<Variant> },
    AddChild { parent: ObjectId, child: ObjectId },
    AddSibling { node: ObjectId, sibling: ObjectId },
    RemoveChild { parent: ObjectId, child: ObjectId },
}

/// The host object graph: a tree of nodes under `root`, free-standing
/// objects, singletons and loadable resources.
///
/// Tree mutations requested as deferred, `call_deferred` calls and
/// `queue_free` take effect in `process`, the way an engine applies them at
/// the end of a frame.
pub struct Scene {
    objects: BTreeMap<ObjectId, SceneObject>,
    next_address: u32,
    root: ObjectId,
    classes: ClassDb,
    singletons: HashMap<String, ObjectId>,
    resources: HashMap<String, Variant>,
    deferred: Vec<Deferred>,
    pending: Vec<PendingCall>,
    editor: bool,
    output: Vec<String>,
    call_log: Vec<(ObjectId, String)>,
}

impl Default for Scene {
    fn default() -> Self {
        Self::new()
    }
}

impl Scene {
    pub fn new() -> Self {
        let mut scene = Self {
            objects: BTreeMap::new(),
            next_address: FIRST_ADDRESS,
            root: ObjectId::NULL,
            classes: ClassDb::default(),
            singletons: HashMap::new(),
            resources: HashMap::new(),
            deferred: Vec::new(),
            pending: Vec::new(),
            editor: false,
            output: Vec::new(),
            call_log: Vec::new(),
        };
        scene.root = scene.insert("Node", "root");
        for name in ["Engine", "Input", "Time"] {
            let id = scene.insert(name, name);
            scene.singletons.insert(name.to_string(), id);
        }
        scene
    }

    fn insert(&mut self, class: &str, name: &str) -> ObjectId {
        let id = ObjectId(self.next_address);
        self.next_address += ADDRESS_STRIDE;
        let properties = self.classes.default_properties(class).into_iter().collect();
        self.objects.insert(id, SceneObject::new(class, name, properties));
        id
    }

    pub fn root(&self) -> ObjectId {
        self.root
    }

    pub fn classes_mut(&mut self) -> &mut ClassDb {
        &mut self.classes
    }

    /// Registers `class` (deriving from `parent`) with host methods.
    pub fn register_class(&mut self, class: &str, parent: &str, methods: Vec<(&str, HostMethod)>) {
        self.classes.register(class, Some(parent));
        for (name, method) in methods {
            self.classes.add_method(class, name, method);
        }
    }

    pub fn register_resource(&mut self, path: &str, value: Variant) {
        self.resources.insert(path.to_string(), value);
    }

    /// Creates a `class` node named `name` under `parent`.
    pub fn add_node(&mut self, parent: ObjectId, class: &str, name: &str) -> HostResult<ObjectId> {
        let id = self.create_object(class)?;
        self.set_name(id, name)?;
        self.attach(parent, id, None)?;
        Ok(id)
    }

    /// Adds a property (or overwrites it) without the existence check of
    /// `set_property`.
    pub fn define_property(&mut self, object: ObjectId, name: &str, value: Variant) -> HostResult<()> {
        self.get_mut(object)?.properties.insert(name.to_string(), value);
        Ok(())
    }

    pub fn add_user_signal(&mut self, object: ObjectId, signal: &str) -> HostResult<()> {
        self.get_mut(object)?.user_signals.push(signal.to_string());
        Ok(())
    }

    pub fn object(&self, object: ObjectId) -> Option<&SceneObject> {
        self.objects.get(&object)
    }

    pub fn set_editor(&mut self, editor: bool) {
        self.editor = editor;
    }

    /// Everything printed through the host.
    pub fn printed(&self) -> &[String] {
        &self.output
    }

    /// Every `call_method` the host received, in order.
    pub fn calls(&self) -> &[(ObjectId, String)] {
        &self.call_log
    }

    /// Invokes the connections of `signal` on `object`. Host callables run
    /// now, guest callables are queued for `process`.
    pub fn emit_signal(&mut self, object: ObjectId, signal: &str, args: &[Variant]) -> HostResult<()> {
        let targets: Vec<Callable> = self
            .get(object)?
            .connections
            .iter()
            .filter(|(s, _)| s == signal)
            .map(|(_, c)| c.clone())
            .collect();
        for target in targets {
            self.dispatch(target, args.to_vec());
        }
        Ok(())
    }

    fn dispatch(&mut self, callable: Callable, args: Vec<Variant>) {
        if let Callable::Method { object, method, .. } = &callable {
            let args = callable.arguments(&args);
            if let Err(err) = self.call_method(*object, method, &args) {
                log::warn!("callable {method} on {object} failed: {err}");
            }
            return;
        }
        self.pending.push(PendingCall { callable, args });
    }

    fn get(&self, object: ObjectId) -> HostResult<&SceneObject> {
        self.objects.get(&object).ok_or(HostError::NoSuchObject(object))
    }

    fn get_mut(&mut self, object: ObjectId) -> HostResult<&mut SceneObject> {
        self.objects.get_mut(&object).ok_or(HostError::NoSuchObject(object))
    }

    fn node(&self, object: ObjectId) -> HostResult<&SceneObject> {
        let obj = self.get(object)?;
        if self.classes.inherits(&obj.class, "Node") {
            Ok(obj)
        } else {
            Err(HostError::NotANode(object))
        }
    }

    fn node_mut(&mut self, object: ObjectId) -> HostResult<&mut SceneObject> {
        self.node(object)?;
        self.get_mut(object)
    }

    fn is_ancestor(&self, ancestor: ObjectId, mut node: ObjectId) -> bool {
        while !node.is_null() {
            if node == ancestor {
                return true;
            }
            node = self.objects.get(&node).map(|o| o.parent).unwrap_or(ObjectId::NULL);
        }
        false
    }

    /// Links `child` under `parent`, at `position` or at the end.
    fn attach(&mut self, parent: ObjectId, child: ObjectId, position: Option<usize>) -> HostResult<()> {
        self.node(parent)?;
        if !self.node(child)?.parent.is_null() {
            return Err(HostError::InvalidCall(format!("{child} already has a parent")));
        }
        if self.is_ancestor(child, parent) {
            return Err(HostError::InvalidCall(format!("{child} is an ancestor of {parent}")));
        }
        let children = &mut self.get_mut(parent)?.children;
        let index = position.unwrap_or(children.len()).min(children.len());
        children.insert(index, child);
        self.get_mut(child)?.parent = parent;
        Ok(())
    }

    fn detach(&mut self, parent: ObjectId, child: ObjectId) -> HostResult<()> {
        let children = &mut self.node_mut(parent)?.children;
        let index = children
            .iter()
            .position(|c| *c == child)
            .ok_or_else(|| HostError::InvalidCall(format!("{child} is not a child of {parent}")))?;
        children.remove(index);
        self.get_mut(child)?.parent = ObjectId::NULL;
        Ok(())
    }

    fn apply_deferred(&mut self, op: Deferred) -> HostResult<()> {
        match op {
            Deferred::Call { object, method, args } => self.call_method(object, &method, &args).map(|_| ()),
            Deferred::AddChild { parent, child } => self.attach(parent, child, None),
            Deferred::AddSibling { node, sibling } => self.add_sibling(node, sibling, false),
            Deferred::RemoveChild { parent, child } => self.detach(parent, child),
        }
    }

    fn free_subtree(&mut self, node: ObjectId) {
        if let Some(obj) = self.objects.remove(&node) {
            for child in obj.children {
                self.free_subtree(child);
            }
        }
    }

    fn duplicate_subtree(&mut self, node: ObjectId) -> HostResult<ObjectId> {
        let source = self.get(node)?.clone();
        let id = self.insert(&source.class, &source.name);
        if let Some(copy) = self.objects.get_mut(&id) {
            copy.properties = source.properties.clone();
            copy.groups = source.groups.clone();
            copy.user_signals = source.user_signals.clone();
        }
        for child in source.children {
            let child_copy = self.duplicate_subtree(child)?;
            self.attach(id, child_copy, None)?;
        }
        Ok(id)
    }

    /// Dumps the tree with properties, for debugging.
    pub fn pretty_print(&self) {
        println!("--- Scene Dump ---");
        self.print_node(self.root, 0);
        println!("------------------");
    }

    fn print_node(&self, node: ObjectId, depth: usize) {
        let Some(obj) = self.objects.get(&node) else {
            return;
        };
        println!("{:indent$}{} ({}) {}", "", obj.name, obj.class, node, indent = depth * 2);
        for (key, value) in &obj.properties {
            match value {
                Variant::PackedByteArray(bytes) => {
                    println!("{:indent$}  - {}: [{} bytes] {}", "", key, bytes.len(), hex_encode(bytes), indent = depth * 2)
                }
                other => println!("{:indent$}  - {}: {}", "", key, other, indent = depth * 2),
            }
        }
        for child in &obj.children {
            self.print_node(*child, depth + 1);
        }
    }
}

impl ObjectGraph for Scene {
    fn exists(&self, object: ObjectId) -> bool {
        self.objects.contains_key(&object)
    }

    fn class_name(&self, object: ObjectId) -> HostResult<String> {
        Ok(self.get(object)?.class.clone())
    }

    fn is_class(&self, object: ObjectId, class: &str) -> bool {
        self.objects.get(&object).is_some_and(|o| self.classes.inherits(&o.class, class))
    }

    fn get_property(&self, object: ObjectId, name: &str) -> HostResult<Variant> {
        let obj = self.get(object)?;
        if name == "name" && self.classes.inherits(&obj.class, "Node") {
            return Ok(Variant::StringName(obj.name.clone()));
        }
        obj.properties
            .get(name)
            .cloned()
            .ok_or_else(|| HostError::NoSuchProperty { class: obj.class.clone(), property: name.to_string() })
    }

    fn set_property(&mut self, object: ObjectId, name: &str, value: Variant) -> HostResult<()> {
        if name == "name" && self.node(object).is_ok() {
            let name = value.as_str().map(str::to_string).unwrap_or_else(|| value.to_string());
            return self.set_name(object, &name);
        }
        let obj = self.get_mut(object)?;
        match obj.properties.get_mut(name) {
            Some(slot) => {
                *slot = value;
                Ok(())
            }
            None => Err(HostError::NoSuchProperty { class: obj.class.clone(), property: name.to_string() }),
        }
    }

    fn call_method(&mut self, object: ObjectId, method: &str, args: &[Variant]) -> HostResult<Variant> {
        let class = self.get(object)?.class.clone();
        self.call_log.push((object, method.to_string()));
        let arg_str = |i: usize| {
            args.get(i)
                .and_then(Variant::as_str)
                .ok_or_else(|| HostError::InvalidCall(format!("{method}: argument {i} must be a string")))
        };
        match method {
            "get_class" => Ok(Variant::String(class)),
            "is_class" => Ok(Variant::Bool(self.classes.inherits(&class, arg_str(0)?))),
            "get" => self.get_property(object, arg_str(0)?),
            "set" => {
                let value = args.get(1).cloned().unwrap_or_default();
                self.set_property(object, arg_str(0)?, value).map(|_| Variant::Nil)
            }
            "has_method" => {
                let name = arg_str(0)?;
                Ok(Variant::Bool(self.classes.methods(&class).iter().any(|m| m == name)))
            }
            "emit_signal" => {
                let signal = arg_str(0)?.to_string();
                self.emit_signal(object, &signal, &args[1..]).map(|_| Variant::Nil)
            }
            "get_name" => self.name(object).map(Variant::StringName),
            _ => match self.classes.method(&class, method) {
                Some(f) => Ok(f(object, args)),
                None => Err(HostError::NoSuchMethod { class, method: method.to_string() }),
            },
        }
    }

    fn call_deferred(&mut self, object: ObjectId, method: &str, args: Vec<Variant>) -> HostResult<()> {
        self.get(object)?;
        self.deferred.push(Deferred::Call { object, method: method.to_string(), args });
        Ok(())
    }

    fn method_list(&self, object: ObjectId) -> HostResult<Vec<String>> {
        Ok(self.classes.methods(&self.get(object)?.class))
    }

    fn property_list(&self, object: ObjectId) -> HostResult<Vec<String>> {
        Ok(self.get(object)?.properties.keys().cloned().collect())
    }

    fn signal_list(&self, object: ObjectId) -> HostResult<Vec<String>> {
        let obj = self.get(object)?;
        let mut signals = self.classes.signals(&obj.class);
        signals.extend(obj.user_signals.iter().cloned());
        Ok(signals)
    }

    fn connect(&mut self, object: ObjectId, signal: &str, target: Callable) -> HostResult<()> {
        if !self.signal_list(object)?.iter().any(|s| s == signal) {
            let class = self.get(object)?.class.clone();
            return Err(HostError::NoSuchSignal { class, signal: signal.to_string() });
        }
        self.get_mut(object)?.connections.push((signal.to_string(), target));
        Ok(())
    }

    fn disconnect(&mut self, object: ObjectId, signal: &str, target: &Callable) -> HostResult<()> {
        let connections = &mut self.get_mut(object)?.connections;
        let before = connections.len();
        connections.retain(|(s, c)| !(s == signal && c == target));
        if connections.len() == before {
            return Err(HostError::InvalidCall(format!("{signal} is not connected to that target")));
        }
        Ok(())
    }

    fn create_object(&mut self, class: &str) -> HostResult<ObjectId> {
        if !self.classes.exists(class) {
            return Err(HostError::UnknownClass(class.to_string()));
        }
        Ok(self.insert(class, class))
    }

    fn singleton(&self, name: &str) -> Option<ObjectId> {
        self.singletons.get(name).copied()
    }

    fn get_node(&self, base: ObjectId, path: &str) -> HostResult<ObjectId> {
        let not_found = || HostError::NodeNotFound(path.to_string());
        // Absolute paths start above the root, relative ones at `base`.
        let mut current = if path.starts_with('/') {
            ObjectId::NULL
        } else {
            self.node(base)?;
            base
        };
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            current = match segment {
                "." => current,
                ".." => {
                    let parent = self.node(current).map_err(|_| not_found())?.parent;
                    if parent.is_null() {
                        return Err(not_found());
                    }
                    parent
                }
                name if current.is_null() => {
                    if self.node(self.root)?.name == name {
                        self.root
                    } else {
                        return Err(not_found());
                    }
                }
                name => *self
                    .node(current)?
                    .children
                    .iter()
                    .find(|c| self.objects.get(c).is_some_and(|o| o.name == name))
                    .ok_or_else(not_found)?,
            };
        }
        if current.is_null() {
            return Err(not_found());
        }
        Ok(current)
    }

    fn name(&self, node: ObjectId) -> HostResult<String> {
        Ok(self.node(node)?.name.clone())
    }

    fn set_name(&mut self, node: ObjectId, name: &str) -> HostResult<()> {
        if name.is_empty() || name.contains(['/', ':', '.']) {
            return Err(HostError::InvalidCall(format!("invalid node name '{name}'")));
        }
        self.node_mut(node)?.name = name.to_string();
        Ok(())
    }

    fn path(&self, node: ObjectId) -> HostResult<String> {
        let mut names = vec![self.node(node)?.name.clone()];
        let mut current = node;
        loop {
            let parent = self.node(current)?.parent;
            if parent.is_null() {
                break;
            }
            names.push(self.node(parent)?.name.clone());
            current = parent;
        }
        if current != self.root {
            return Ok(String::new());
        }
        names.reverse();
        Ok(format!("/{}", names.join("/")))
    }

    fn parent(&self, node: ObjectId) -> HostResult<ObjectId> {
        Ok(self.node(node)?.parent)
    }

    fn children(&self, node: ObjectId) -> HostResult<Vec<ObjectId>> {
        Ok(self.node(node)?.children.clone())
    }

    fn add_child(&mut self, parent: ObjectId, child: ObjectId, deferred: bool) -> HostResult<()> {
        if deferred {
            self.node(parent)?;
            self.node(child)?;
            self.deferred.push(Deferred::AddChild { parent, child });
            return Ok(());
        }
        self.attach(parent, child, None)
    }

    fn add_sibling(&mut self, node: ObjectId, sibling: ObjectId, deferred: bool) -> HostResult<()> {
        let parent = self.node(node)?.parent;
        if parent.is_null() {
            return Err(HostError::InvalidCall(format!("{node} has no parent")));
        }
        if deferred {
            self.node(sibling)?;
            self.deferred.push(Deferred::AddSibling { node, sibling });
            return Ok(());
        }
        let position = self.node(parent)?.children.iter().position(|c| *c == node).map(|i| i + 1);
        self.attach(parent, sibling, position)
    }

    fn move_child(&mut self, parent: ObjectId, child: ObjectId, to: i64) -> HostResult<()> {
        let children = &mut self.node_mut(parent)?.children;
        let from = children
            .iter()
            .position(|c| *c == child)
            .ok_or_else(|| HostError::InvalidCall(format!("{child} is not a child of {parent}")))?;
        let len = children.len() as i64;
        let to = if to < 0 { len + to } else { to };
        if !(0..len).contains(&to) {
            return Err(HostError::InvalidCall(format!("child index {to} out of range")));
        }
        let node = children.remove(from);
        children.insert(to as usize, node);
        Ok(())
    }

    fn remove_child(&mut self, parent: ObjectId, child: ObjectId, deferred: bool) -> HostResult<()> {
        if deferred {
            self.node(parent)?;
            self.deferred.push(Deferred::RemoveChild { parent, child });
            return Ok(());
        }
        self.detach(parent, child)
    }

    fn reparent(&mut self, node: ObjectId, new_parent: ObjectId) -> HostResult<()> {
        self.node(new_parent)?;
        if self.is_ancestor(node, new_parent) {
            return Err(HostError::InvalidCall(format!("{node} is an ancestor of {new_parent}")));
        }
        let old_parent = self.node(node)?.parent;
        if !old_parent.is_null() {
            self.detach(old_parent, node)?;
        }
        self.attach(new_parent, node, None)
    }

    fn queue_free(&mut self, node: ObjectId) -> HostResult<()> {
        if node == self.root {
            return Err(HostError::InvalidCall("cannot free the root".to_string()));
        }
        self.node_mut(node)?.queued_for_deletion = true;
        Ok(())
    }

    fn duplicate(&mut self, node: ObjectId) -> HostResult<ObjectId> {
        self.node(node)?;
        self.duplicate_subtree(node)
    }

    fn add_to_group(&mut self, node: ObjectId, group: &str) -> HostResult<()> {
        self.node_mut(node)?.groups.insert(group.to_string());
        Ok(())
    }

    fn remove_from_group(&mut self, node: ObjectId, group: &str) -> HostResult<()> {
        self.node_mut(node)?.groups.remove(group);
        Ok(())
    }

    fn is_in_group(&self, node: ObjectId, group: &str) -> HostResult<bool> {
        Ok(self.node(node)?.groups.contains(group))
    }

    fn create_timer(&mut self, interval: f64, oneshot: bool, callback: Callable) -> HostResult<ObjectId> {
        if !interval.is_finite() || interval < 0.0 {
            return Err(HostError::InvalidCall(format!("invalid timer interval {interval}")));
        }
        let timer = self.create_object("Timer")?;
        let root = self.root;
        let obj = self.get_mut(timer)?;
        obj.properties.insert("wait_time".to_string(), Variant::Float(interval));
        obj.properties.insert("one_shot".to_string(), Variant::Bool(oneshot));
        obj.timer = Some(TimerState::new(interval, oneshot, callback));
        self.attach(root, timer, None)?;
        Ok(timer)
    }

    fn stop_timer(&mut self, timer: ObjectId) -> HostResult<()> {
        match self.get_mut(timer)?.timer.as_mut() {
            Some(state) => {
                state.running = false;
                Ok(())
            }
            None => Err(HostError::InvalidCall(format!("{timer} is not a timer"))),
        }
    }

    fn load(&mut self, path: &str) -> HostResult<Variant> {
        self.resources.get(path).cloned().ok_or_else(|| HostError::ResourceNotFound(path.to_string()))
    }

    fn is_editor(&self) -> bool {
        self.editor
    }

    fn print(&mut self, text: &str) {
        log::info!("{text}");
        self.output.push(text.to_string());
    }

    fn process(&mut self, delta: f64) -> Vec<PendingCall> {
        for op in std::mem::take(&mut self.deferred) {
            if let Err(err) = self.apply_deferred(op) {
                log::warn!("deferred operation failed: {err}");
            }
        }

        let mut fired = Vec::new();
        for (id, obj) in self.objects.iter_mut() {
            if let Some(timer) = obj.timer.as_mut() {
                if !obj.queued_for_deletion && timer.tick(delta) {
                    fired.push((*id, timer.callback.clone()));
                }
            }
        }
        for (timer, callback) in fired {
            self.dispatch(callback, vec![Variant::Object(timer)]);
            if let Err(err) = self.emit_signal(timer, "timeout", &[]) {
                log::warn!("timeout signal on {timer} failed: {err}");
            }
        }

        let doomed: Vec<ObjectId> =
            self.objects.iter().filter(|(_, o)| o.queued_for_deletion).map(|(id, _)| *id).collect();
        for node in doomed {
            let parent = self.objects.get(&node).map(|o| o.parent).unwrap_or(ObjectId::NULL);
            if !parent.is_null() {
                let _ = self.detach(parent, node);
            }
            self.free_subtree(node);
        }

        std::mem::take(&mut self.pending)
    }
}
