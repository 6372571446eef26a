use std::collections::BTreeSet;

use types::{ObjectId, Variant};

use crate::error::SandboxError;

/// Host value store behind every scoped guest variant.
///
/// EDUCATIONAL PURPOSE: a guest never holds a host value directly. Complex
/// values (strings, containers, callables, ...) stay on the host and the
/// guest gets an integer index into one of two pools:
/// - the transient pool, valid for the current top-level call only and
///   emptied when it returns,
/// - the permanent pool, which outlives calls and is only released by the
///   host.
///
/// The sign of the index says which pool it refers to: transient indices
/// are `>= 0`, permanent ones are `-(slot + 1)`. Transient indices only ever
/// grow during a call, so an index can never silently come to mean a
/// different value. Any miss is an `InvalidReference` error that aborts the
/// guest call and never the host.
#[derive(Debug)]
pub struct ScopedVariants {
    transient: Vec<Variant>,
    permanent: Vec<Option<Variant>>,
    free_slots: Vec<usize>,
    /// Transient count when the current call level started.
    level_mark: usize,
    max_refs: usize,
    /// While set, new values go straight to the permanent pool.
    permanent_mode: bool,
}

/// Where a call level started in a scoped pool, and the mark of the level
/// below it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ScopeMark {
    pub start: usize,
    pub previous: usize,
}

fn permanent_slot(index: i32) -> usize {
    (-(index as i64) - 1) as usize
}

impl ScopedVariants {
    pub fn new(max_refs: usize) -> Self {
        Self {
            transient: Vec::new(),
            permanent: Vec::new(),
            free_slots: Vec::new(),
            level_mark: 0,
            max_refs,
            permanent_mode: false,
        }
    }

    pub fn set_max_refs(&mut self, max_refs: usize) {
        self.max_refs = max_refs;
    }

    pub(crate) fn set_permanent_mode(&mut self, enabled: bool) {
        self.permanent_mode = enabled;
    }

    pub fn create_scoped(&mut self, value: Variant) -> Result<i32, SandboxError> {
        if self.permanent_mode {
            return Ok(self.insert_permanent(value));
        }
        if self.transient.len() - self.level_mark >= self.max_refs {
            return Err(SandboxError::TooManyReferences(self.max_refs));
        }
        let index = i32::try_from(self.transient.len()).map_err(|_| SandboxError::TooManyReferences(self.max_refs))?;
        self.transient.push(value);
        Ok(index)
    }

    /// Stores `value` in the permanent pool, reusing a released slot when
    /// there is one.
    pub fn insert_permanent(&mut self, value: Variant) -> i32 {
        let slot = match self.free_slots.pop() {
            Some(slot) => {
                self.permanent[slot] = Some(value);
                slot
            }
            None => {
                self.permanent.push(Some(value));
                self.permanent.len() - 1
            }
        };
        -(slot as i32) - 1
    }

    /// Promotes the value at `index` to the permanent pool. Already
    /// permanent indices are returned unchanged.
    pub fn create_permanent(&mut self, index: i32) -> Result<i32, SandboxError> {
        let value = self.get(index)?;
        if index < 0 {
            return Ok(index);
        }
        let value = value.clone();
        Ok(self.insert_permanent(value))
    }

    pub fn get(&self, index: i32) -> Result<&Variant, SandboxError> {
        let found = if index >= 0 {
            self.transient.get(index as usize)
        } else {
            self.permanent.get(permanent_slot(index)).and_then(Option::as_ref)
        };
        found.ok_or(SandboxError::InvalidReference(index))
    }

    pub fn get_mut(&mut self, index: i32) -> Result<&mut Variant, SandboxError> {
        let found = if index >= 0 {
            self.transient.get_mut(index as usize)
        } else {
            self.permanent.get_mut(permanent_slot(index)).and_then(Option::as_mut)
        };
        found.ok_or(SandboxError::InvalidReference(index))
    }

    /// Replaces the value at `index`, keeping the index. Either side may be
    /// nil, otherwise the types must match.
    pub fn assign(&mut self, index: i32, value: Variant) -> Result<(), SandboxError> {
        let slot = self.get_mut(index)?;
        if !slot.is_nil() && !value.is_nil() && slot.get_type() != value.get_type() {
            return Err(SandboxError::mismatch(slot.get_type(), value.get_type()));
        }
        *slot = value;
        Ok(())
    }

    pub fn release_permanent(&mut self, index: i32) -> bool {
        if index >= 0 {
            return false;
        }
        let slot = permanent_slot(index);
        match self.permanent.get_mut(slot) {
            Some(entry) if entry.is_some() => {
                *entry = None;
                self.free_slots.push(slot);
                true
            }
            _ => false,
        }
    }

    /// Drops every transient value. Runs once at the end of each top-level
    /// call.
    pub fn clear_transient(&mut self) {
        self.transient.clear();
        self.level_mark = 0;
    }

    pub(crate) fn enter_level(&mut self) -> ScopeMark {
        let mark = ScopeMark { start: self.transient.len(), previous: self.level_mark };
        self.level_mark = mark.start;
        mark
    }

    pub(crate) fn leave_level(&mut self, mark: ScopeMark) {
        self.level_mark = mark.previous;
    }

    pub fn transient_len(&self) -> usize {
        self.transient.len()
    }

    pub fn permanent_len(&self) -> usize {
        self.permanent.len() - self.free_slots.len()
    }
}

/// Host objects the current call chain may name.
///
/// Each level records where it started in the shared list, so objects an
/// outer level introduced stay visible while a nested level's additions are
/// rolled back when it returns. Pinned objects (the sandbox itself, its tree
/// base) are visible at every level.
#[derive(Debug)]
pub struct ScopedObjects {
    list: Vec<ObjectId>,
    pinned: BTreeSet<ObjectId>,
    level_mark: usize,
    max_refs: usize,
}

impl ScopedObjects {
    pub fn new(max_refs: usize) -> Self {
        Self { list: Vec::new(), pinned: BTreeSet::new(), level_mark: 0, max_refs }
    }

    pub fn set_max_refs(&mut self, max_refs: usize) {
        self.max_refs = max_refs;
    }

    pub fn scope(&mut self, object: ObjectId) -> Result<(), SandboxError> {
        if object.is_null() || self.contains(object) {
            return Ok(());
        }
        if self.list.len() - self.level_mark >= self.max_refs {
            return Err(SandboxError::TooManyReferences(self.max_refs));
        }
        self.list.push(object);
        Ok(())
    }

    pub fn contains(&self, object: ObjectId) -> bool {
        self.pinned.contains(&object) || self.list.contains(&object)
    }

    pub fn pin(&mut self, object: ObjectId) {
        if !object.is_null() {
            self.pinned.insert(object);
        }
    }

    pub fn unpin(&mut self, object: ObjectId) {
        self.pinned.remove(&object);
    }

    pub fn len(&self) -> usize {
        self.list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    pub(crate) fn enter_level(&mut self) -> ScopeMark {
        let mark = ScopeMark { start: self.list.len(), previous: self.level_mark };
        self.level_mark = mark.start;
        mark
    }

    pub(crate) fn leave_level(&mut self, mark: ScopeMark) {
        self.list.truncate(mark.start);
        self.level_mark = mark.previous;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_values_live_until_cleared() {
        let mut store = ScopedVariants::new(10);
        let a = store.create_scoped(Variant::from("a")).unwrap();
        let b = store.create_scoped(Variant::Int(2)).unwrap();
        assert_eq!((a, b), (0, 1));
        assert_eq!(store.get(a).unwrap(), &Variant::from("a"));
        store.clear_transient();
        assert_eq!(store.get(a), Err(SandboxError::InvalidReference(0)));
        assert_eq!(store.create_scoped(Variant::Nil).unwrap(), 0);
    }

    #[test]
    fn permanent_promotion_is_idempotent() {
        let mut store = ScopedVariants::new(10);
        let t = store.create_scoped(Variant::from("keep")).unwrap();
        let p = store.create_permanent(t).unwrap();
        assert!(p < 0);
        assert_eq!(store.create_permanent(p).unwrap(), p);
        store.clear_transient();
        assert_eq!(store.get(p).unwrap(), &Variant::from("keep"));
        assert_eq!(store.permanent_len(), 1);
    }

    #[test]
    fn released_slots_are_reused() {
        let mut store = ScopedVariants::new(10);
        let first = store.insert_permanent(Variant::Int(1));
        let second = store.insert_permanent(Variant::Int(2));
        assert_eq!((first, second), (-1, -2));
        assert!(store.release_permanent(first));
        assert!(!store.release_permanent(first));
        assert!(store.get(first).is_err());
        assert_eq!(store.insert_permanent(Variant::Int(3)), first);
        assert!(store.get(i32::MIN).is_err());
    }

    #[test]
    fn assign_is_strict() {
        let mut store = ScopedVariants::new(10);
        let s = store.create_scoped(Variant::from("x")).unwrap();
        store.assign(s, Variant::from("y")).unwrap();
        assert_eq!(store.get(s).unwrap(), &Variant::from("y"));
        assert!(matches!(store.assign(s, Variant::Int(1)), Err(SandboxError::TypeMismatch { .. })));
        let n = store.create_scoped(Variant::Nil).unwrap();
        store.assign(n, Variant::Int(1)).unwrap();
        store.assign(s, Variant::Nil).unwrap();
        assert_eq!(store.get(s).unwrap(), &Variant::Nil);
    }

    #[test]
    fn permanent_mode_bypasses_the_transient_pool() {
        let mut store = ScopedVariants::new(10);
        store.set_permanent_mode(true);
        let index = store.create_scoped(Variant::from("init")).unwrap();
        store.set_permanent_mode(false);
        assert!(index < 0);
        assert_eq!(store.transient_len(), 0);
    }

    #[test]
    fn references_are_capped_per_level() {
        let mut store = ScopedVariants::new(2);
        store.create_scoped(Variant::Nil).unwrap();
        store.create_scoped(Variant::Nil).unwrap();
        assert_eq!(store.create_scoped(Variant::Nil), Err(SandboxError::TooManyReferences(2)));
        let mark = store.enter_level();
        store.create_scoped(Variant::Nil).unwrap();
        store.leave_level(mark);
        assert!(store.create_scoped(Variant::Nil).is_err());
    }

    #[test]
    fn nested_object_scopes_roll_back() {
        let mut objects = ScopedObjects::new(4);
        objects.pin(ObjectId(0x100));
        objects.scope(ObjectId(0x200)).unwrap();
        let mark = objects.enter_level();
        objects.scope(ObjectId(0x300)).unwrap();
        assert!(objects.contains(ObjectId(0x200)));
        assert!(objects.contains(ObjectId(0x300)));
        objects.leave_level(mark);
        assert!(!objects.contains(ObjectId(0x300)));
        assert!(objects.contains(ObjectId(0x200)));
        assert!(objects.contains(ObjectId(0x100)));
        assert_eq!(objects.len(), 1);
    }
}
