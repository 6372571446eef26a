//! Reference-semantics containers. Cloning an `Array` or a `Dictionary`
//! shares storage, like the engine's own containers; `duplicate` copies it.

use std::cell::{Cell, Ref, RefCell, RefMut};
use std::collections::HashSet;
use std::fmt;
use std::rc::Rc;

use crate::variant::Variant;

/// Nesting depth at which comparison and formatting of containers stop
/// descending.
pub const MAX_NESTING: usize = 64;

thread_local! {
    static NESTING: Cell<usize> = const { Cell::new(0) };
}

/// One level of container recursion, released on drop.
pub(crate) struct Nested(());

impl Nested {
    /// `None` once `MAX_NESTING` levels are open on this thread.
    pub(crate) fn enter() -> Option<Nested> {
        NESTING.with(|depth| {
            if depth.get() >= MAX_NESTING {
                return None;
            }
            depth.set(depth.get() + 1);
            Some(Nested(()))
        })
    }
}

impl Drop for Nested {
    fn drop(&mut self) {
        NESTING.with(|depth| depth.set(depth.get().saturating_sub(1)));
    }
}

fn storage_id(value: &Variant) -> Option<*const ()> {
    match value {
        Variant::Array(a) => Some(Rc::as_ptr(&a.0) as *const ()),
        Variant::Dictionary(d) => Some(Rc::as_ptr(&d.0) as *const ()),
        _ => None,
    }
}

/// Whether storing `value` inside `container` would let the container reach
/// itself, either directly or through nested containers and bound callable
/// arguments. Always false when `container` is not an Array or Dictionary.
pub fn creates_cycle(container: &Variant, value: &Variant) -> bool {
    let Some(target) = storage_id(container) else {
        return false;
    };
    let mut seen = HashSet::new();
    let mut pending = vec![value.clone()];
    while let Some(next) = pending.pop() {
        if let Some(id) = storage_id(&next) {
            if id == target {
                return true;
            }
            if !seen.insert(id) {
                continue;
            }
        }
        match &next {
            Variant::Array(a) => pending.extend(a.items().iter().cloned()),
            Variant::Dictionary(d) => {
                for (k, v) in d.0.borrow().iter() {
                    pending.push(k.clone());
                    pending.push(v.clone());
                }
            }
            Variant::Callable(c) => pending.extend(c.bound_args().iter().cloned()),
            _ => {}
        }
    }
    false
}

#[derive(Clone, Default)]
pub struct Array(Rc<RefCell<Vec<Variant>>>);

impl Array {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_vec(items: Vec<Variant>) -> Self {
        Self(Rc::new(RefCell::new(items)))
    }

    pub fn len(&self) -> usize {
        self.0.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.borrow().is_empty()
    }

    pub fn get(&self, index: usize) -> Option<Variant> {
        self.0.borrow().get(index).cloned()
    }

    pub fn set(&self, index: usize, value: Variant) -> bool {
        match self.0.borrow_mut().get_mut(index) {
            Some(slot) => {
                *slot = value;
                true
            }
            None => false,
        }
    }

    pub fn push(&self, value: Variant) {
        self.0.borrow_mut().push(value);
    }

    pub fn items(&self) -> Ref<'_, Vec<Variant>> {
        self.0.borrow()
    }

    pub fn items_mut(&self) -> RefMut<'_, Vec<Variant>> {
        self.0.borrow_mut()
    }

    pub fn to_vec(&self) -> Vec<Variant> {
        self.0.borrow().clone()
    }

    pub fn contains(&self, value: &Variant) -> bool {
        self.0.borrow().iter().any(|v| v == value)
    }

    pub fn shares_storage(&self, other: &Array) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub fn duplicate(&self) -> Self {
        Self::from_vec(self.to_vec())
    }
}

impl PartialEq for Array {
    fn eq(&self, other: &Self) -> bool {
        if self.shares_storage(other) {
            return true;
        }
        let Some(_nested) = Nested::enter() else {
            return false;
        };
        *self.0.borrow() == *other.0.borrow()
    }
}

impl fmt::Debug for Array {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Some(_nested) = Nested::enter() else {
            return f.write_str("[...]");
        };
        f.debug_list().entries(self.0.borrow().iter()).finish()
    }
}

impl FromIterator<Variant> for Array {
    fn from_iter<I: IntoIterator<Item = Variant>>(iter: I) -> Self {
        Self::from_vec(iter.into_iter().collect())
    }
}

/// Insertion-ordered map. Keys are compared with `Variant` equality, so
/// float keys work the way scripts expect.
#[derive(Clone, Default)]
pub struct Dictionary(Rc<RefCell<Vec<(Variant, Variant)>>>);

impl Dictionary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.0.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.borrow().is_empty()
    }

    pub fn get(&self, key: &Variant) -> Option<Variant> {
        self.0.borrow().iter().find(|(k, _)| k == key).map(|(_, v)| v.clone())
    }

    pub fn has(&self, key: &Variant) -> bool {
        self.0.borrow().iter().any(|(k, _)| k == key)
    }

    pub fn set(&self, key: Variant, value: Variant) {
        let mut entries = self.0.borrow_mut();
        match entries.iter_mut().find(|(k, _)| *k == key) {
            Some((_, slot)) => *slot = value,
            None => entries.push((key, value)),
        }
    }

    pub fn erase(&self, key: &Variant) -> bool {
        let mut entries = self.0.borrow_mut();
        let before = entries.len();
        entries.retain(|(k, _)| k != key);
        entries.len() != before
    }

    pub fn clear(&self) {
        self.0.borrow_mut().clear();
    }

    /// Copies entries from `other`; existing keys keep their value unless
    /// `overwrite` is set.
    pub fn merge(&self, other: &Dictionary, overwrite: bool) {
        if Rc::ptr_eq(&self.0, &other.0) {
            return;
        }
        for (key, value) in other.0.borrow().iter() {
            if overwrite || !self.has(key) {
                self.set(key.clone(), value.clone());
            }
        }
    }

    pub fn keys(&self) -> Vec<Variant> {
        self.0.borrow().iter().map(|(k, _)| k.clone()).collect()
    }

    pub fn values(&self) -> Vec<Variant> {
        self.0.borrow().iter().map(|(_, v)| v.clone()).collect()
    }

    pub fn shares_storage(&self, other: &Dictionary) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub fn duplicate(&self) -> Self {
        Self(Rc::new(RefCell::new(self.0.borrow().clone())))
    }
}

impl PartialEq for Dictionary {
    fn eq(&self, other: &Self) -> bool {
        if self.shares_storage(other) {
            return true;
        }
        let Some(_nested) = Nested::enter() else {
            return false;
        };
        let (a, b) = (self.0.borrow(), other.0.borrow());
        a.len() == b.len() && a.iter().all(|(k, v)| other.get(k).as_ref() == Some(v))
    }
}

impl fmt::Debug for Dictionary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Some(_nested) = Nested::enter() else {
            return f.write_str("{...}");
        };
        f.debug_map().entries(self.0.borrow().iter().map(|(k, v)| (k, v))).finish()
    }
}

impl FromIterator<(Variant, Variant)> for Dictionary {
    fn from_iter<I: IntoIterator<Item = (Variant, Variant)>>(iter: I) -> Self {
        let dict = Dictionary::new();
        for (k, v) in iter {
            dict.set(k, v);
        }
        dict
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_and_duplicates_do_not() {
        let a = Array::new();
        let shared = a.clone();
        let copy = a.duplicate();
        a.push(Variant::Int(1));
        assert_eq!(shared.len(), 1);
        assert_eq!(copy.len(), 0);
    }

    #[test]
    fn dictionary_keeps_insertion_order_and_overwrites() {
        let d = Dictionary::new();
        d.set(Variant::from("b"), Variant::Int(1));
        d.set(Variant::from("a"), Variant::Int(2));
        d.set(Variant::from("b"), Variant::Int(3));
        assert_eq!(d.keys(), vec![Variant::from("b"), Variant::from("a")]);
        assert_eq!(d.get(&Variant::from("b")), Some(Variant::Int(3)));
        assert!(d.erase(&Variant::from("a")));
        assert!(!d.has(&Variant::from("a")));
    }

    #[test]
    fn merge_respects_overwrite_flag() {
        let a: Dictionary = [(Variant::Int(1), Variant::from("x"))].into_iter().collect();
        let b: Dictionary = [(Variant::Int(1), Variant::from("y")), (Variant::Int(2), Variant::Nil)].into_iter().collect();
        a.merge(&b, false);
        assert_eq!(a.get(&Variant::Int(1)), Some(Variant::from("x")));
        assert_eq!(a.len(), 2);
        a.merge(&b, true);
        assert_eq!(a.get(&Variant::Int(1)), Some(Variant::from("y")));
    }

    #[test]
    fn cycles_are_detected_through_nesting_and_callables() {
        let outer = Array::new();
        let inner = Dictionary::new();
        inner.set(Variant::from("back"), Variant::Array(outer.clone()));
        let container = Variant::Array(outer.clone());

        assert!(creates_cycle(&container, &container));
        assert!(creates_cycle(&container, &Variant::Dictionary(inner.clone())));
        let bound = crate::Callable::method(crate::ObjectId::NULL, "f").bind([Variant::Dictionary(inner)]);
        assert!(creates_cycle(&container, &Variant::Callable(bound)));

        let unrelated = Variant::Array(Array::from_vec(vec![Variant::Array(Array::new())]));
        assert!(!creates_cycle(&container, &unrelated));
        assert!(!creates_cycle(&Variant::Int(1), &container));
    }

    #[test]
    fn self_containing_arrays_format_and_compare() {
        let a = Array::new();
        a.push(Variant::Array(a.clone()));
        let b = Array::new();
        b.push(Variant::Array(b.clone()));

        assert!(Variant::Array(a.clone()).to_string().contains("[...]"));
        assert!(format!("{a:?}").contains("[...]"));
        assert_ne!(a, b);
        assert_eq!(a, a.clone());

        a.items_mut().clear();
        b.items_mut().clear();
    }
}
