use std::collections::BTreeMap;

use types::{ObjectGraph, ObjectId};

/// Resolves a singleton by asking the host.
pub type SingletonLookup<H> = fn(&H, &str) -> Option<ObjectId>;

/// Name to lookup function for the engine singletons a guest may request
/// with `get_obj`. Filled once when the sandbox is created and only read
/// afterwards.
pub struct Singletons<H> {
    lookups: BTreeMap<String, SingletonLookup<H>>,
}

fn by_name<H: ObjectGraph>(host: &H, name: &str) -> Option<ObjectId> {
    host.singleton(name)
}

pub const DEFAULT_SINGLETONS: &[&str] =
    &["Engine", "Input", "Time", "OS", "ClassDB", "ProjectSettings", "ResourceLoader", "IP", "Marshalls"];

impl<H: ObjectGraph> Default for Singletons<H> {
    fn default() -> Self {
        let mut singletons = Self { lookups: BTreeMap::new() };
        for name in DEFAULT_SINGLETONS {
            singletons.register(name, by_name::<H>);
        }
        singletons
    }
}

impl<H: ObjectGraph> Singletons<H> {
    pub fn register(&mut self, name: &str, lookup: SingletonLookup<H>) {
        self.lookups.insert(name.to_string(), lookup);
    }

    pub fn lookup(&self, host: &H, name: &str) -> Option<ObjectId> {
        self.lookups.get(name).and_then(|f| f(host, name))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.lookups.keys().map(String::as_str)
    }
}
