use std::collections::HashMap;
use std::rc::Rc;

use types::{ObjectId, Variant, Vector2, Vector3};

/// A host method registered on a class: receives the target object and the
/// call arguments.
pub type HostMethod = Rc<dyn Fn(ObjectId, &[Variant]) -> Variant>;

struct ClassInfo {
    parent: Option<String>,
    properties: Vec<(String, Variant)>,
    signals: Vec<String>,
    methods: HashMap<String, HostMethod>,
}

/// Class hierarchy with per-class default properties, signals and host
/// methods.
pub struct ClassDb {
    classes: HashMap<String, ClassInfo>,
}

/// Methods every object answers, handled by the scene itself.
pub const BUILTIN_METHODS: &[&str] = &["get_class", "is_class", "get", "set", "has_method", "emit_signal", "get_name"];

impl Default for ClassDb {
    fn default() -> Self {
        let mut db = Self { classes: HashMap::new() };
        db.register("Object", None);
        db.register("Node", Some("Object"));
        db.add_signal("Node", "ready");
        db.add_signal("Node", "tree_exiting");
        db.register("Node2D", Some("Node"));
        db.add_property("Node2D", "position", Variant::Vector2(Vector2::ZERO));
        db.add_property("Node2D", "rotation", Variant::Float(0.0));
        db.add_property("Node2D", "scale", Variant::Vector2(Vector2::new(1.0, 1.0)));
        db.register("Node3D", Some("Node"));
        db.add_property("Node3D", "position", Variant::Vector3(Vector3::ZERO));
        db.add_property("Node3D", "rotation", Variant::Vector3(Vector3::ZERO));
        db.add_property("Node3D", "scale", Variant::Vector3(Vector3::new(1.0, 1.0, 1.0)));
        db.register("Timer", Some("Node"));
        db.add_property("Timer", "wait_time", Variant::Float(1.0));
        db.add_property("Timer", "one_shot", Variant::Bool(false));
        db.add_signal("Timer", "timeout");
        db.register("Sandbox", Some("Node"));
        db.register("Resource", Some("Object"));
        for singleton in ["Engine", "Input", "Time"] {
            db.register(singleton, Some("Object"));
        }
        db
    }
}

impl ClassDb {
    pub fn register(&mut self, name: &str, parent: Option<&str>) {
        self.classes.insert(
            name.to_string(),
            ClassInfo {
                parent: parent.map(str::to_string),
                properties: Vec::new(),
                signals: Vec::new(),
                methods: HashMap::new(),
            },
        );
    }

    pub fn exists(&self, name: &str) -> bool {
        self.classes.contains_key(name)
    }

    pub fn add_property(&mut self, class: &str, name: &str, default: Variant) {
        if let Some(info) = self.classes.get_mut(class) {
            info.properties.push((name.to_string(), default));
        }
    }

    pub fn add_signal(&mut self, class: &str, name: &str) {
        if let Some(info) = self.classes.get_mut(class) {
            info.signals.push(name.to_string());
        }
    }

    pub fn add_method(&mut self, class: &str, name: &str, method: HostMethod) {
        if let Some(info) = self.classes.get_mut(class) {
            info.methods.insert(name.to_string(), method);
        }
    }

    /// `class` followed by its ancestors.
    pub fn lineage<'a>(&'a self, class: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        let mut next = self.classes.contains_key(class).then_some(class);
        std::iter::from_fn(move || {
            let current = next?;
            next = self.classes.get(current).and_then(|c| c.parent.as_deref());
            Some(current)
        })
    }

    pub fn inherits(&self, class: &str, ancestor: &str) -> bool {
        self.lineage(class).any(|c| c == ancestor)
    }

    /// Defaults of `class` and its ancestors, most derived last.
    pub fn default_properties(&self, class: &str) -> Vec<(String, Variant)> {
        let lineage: Vec<&str> = self.lineage(class).collect();
        lineage
            .iter()
            .rev()
            .filter_map(|c| self.classes.get(*c))
            .flat_map(|info| info.properties.iter().cloned())
            .collect()
    }

    pub fn signals(&self, class: &str) -> Vec<String> {
        self.lineage(class)
            .filter_map(|c| self.classes.get(c))
            .flat_map(|info| info.signals.iter().cloned())
            .collect()
    }

    pub fn method(&self, class: &str, name: &str) -> Option<HostMethod> {
        self.lineage(class).find_map(|c| self.classes.get(c)?.methods.get(name).cloned())
    }

    pub fn methods(&self, class: &str) -> Vec<String> {
        let mut names: Vec<String> = BUILTIN_METHODS.iter().map(|m| m.to_string()).collect();
        for c in self.lineage(class) {
            if let Some(info) = self.classes.get(c) {
                names.extend(info.methods.keys().cloned());
            }
        }
        names.sort();
        names.dedup();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inheritance_walks_to_object() {
        let db = ClassDb::default();
        assert_eq!(db.lineage("Timer").collect::<Vec<_>>(), vec!["Timer", "Node", "Object"]);
        assert!(db.inherits("Node2D", "Node"));
        assert!(!db.inherits("Node", "Node2D"));
        assert_eq!(db.lineage("Missing").count(), 0);
    }

    #[test]
    fn methods_are_inherited() {
        let mut db = ClassDb::default();
        db.add_method("Node", "ping", Rc::new(|_, _| Variant::from("pong")));
        assert!(db.method("Node2D", "ping").is_some());
        assert!(db.methods("Node3D").contains(&"ping".to_string()));
        assert!(db.method("Object", "ping").is_none());
    }
}
