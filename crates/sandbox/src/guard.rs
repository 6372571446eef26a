use std::collections::BTreeSet;

use types::{ObjectGraph, ObjectId};

use crate::error::SandboxError;
use crate::global::Config;
use crate::scoped::ScopedObjects;

pub type ClassPredicate = Box<dyn Fn(&str) -> bool>;
pub type ObjectPredicate = Box<dyn Fn(ObjectId) -> bool>;
pub type MethodPredicate = Box<dyn Fn(ObjectId, &str) -> bool>;
/// Receives the object, the property name and whether it is a write.
pub type PropertyPredicate = Box<dyn Fn(ObjectId, &str, bool) -> bool>;
pub type ResourcePredicate = Box<dyn Fn(&str) -> bool>;

/// What a guest may touch.
///
/// Classes and objects are checked against an allow-list first and a
/// predicate second; an empty list with no predicate allows everything.
/// Methods, properties and resources only have predicates.
#[derive(Default)]
pub struct AllowPolicy {
    classes: BTreeSet<String>,
    objects: BTreeSet<ObjectId>,
    class_allowed: Option<ClassPredicate>,
    object_allowed: Option<ObjectPredicate>,
    method_allowed: Option<MethodPredicate>,
    property_allowed: Option<PropertyPredicate>,
    resource_allowed: Option<ResourcePredicate>,
}

impl AllowPolicy {
    pub fn is_restricted(&self) -> bool {
        !self.classes.is_empty()
            || !self.objects.is_empty()
            || self.class_allowed.is_some()
            || self.object_allowed.is_some()
            || self.method_allowed.is_some()
            || self.property_allowed.is_some()
            || self.resource_allowed.is_some()
    }

    pub fn is_class_allowed(&self, name: &str) -> bool {
        if self.classes.is_empty() && self.class_allowed.is_none() {
            return true;
        }
        self.classes.contains(name) || self.class_allowed.as_ref().is_some_and(|p| p(name))
    }

    pub fn is_object_allowed(&self, object: ObjectId) -> bool {
        if self.objects.is_empty() && self.object_allowed.is_none() {
            return true;
        }
        self.objects.contains(&object) || self.object_allowed.as_ref().is_some_and(|p| p(object))
    }

    pub fn is_method_allowed(&self, object: ObjectId, method: &str) -> bool {
        self.method_allowed.as_ref().is_none_or(|p| p(object, method))
    }

    pub fn is_property_allowed(&self, object: ObjectId, property: &str, is_write: bool) -> bool {
        self.property_allowed.as_ref().is_none_or(|p| p(object, property, is_write))
    }

    pub fn is_resource_allowed(&self, path: &str) -> bool {
        self.resource_allowed.as_ref().is_none_or(|p| p(path))
    }
}

/// Validates every guest-supplied object reference and name before the host
/// sees it.
///
/// The policy can always be tightened. Loosening it (clearing restrictions,
/// replacing or removing a predicate) is refused while a call is running, so
/// a guest that re-enters through a host callback cannot talk the host into
/// dropping the checks mid-call.
#[derive(Default)]
pub struct ObjectGuard {
    policy: AllowPolicy,
}

impl ObjectGuard {
    pub fn policy(&self) -> &AllowPolicy {
        &self.policy
    }

    /// Turns an address into an object the current call may use.
    pub fn resolve(&self, objects: &ScopedObjects, address: u32) -> Result<ObjectId, SandboxError> {
        let object = ObjectId(address);
        if object.is_null() {
            log::error!("object is null");
            return Err(SandboxError::NullObject);
        }
        if !objects.contains(object) {
            if address < Config::LIKELY_INDEX_LIMIT {
                log::error!("object {object} is not scoped, but likely a Variant index: {address}");
            } else {
                log::error!("object {object} is not scoped");
            }
            return Err(SandboxError::UnscopedObject(object));
        }
        if !self.policy.is_object_allowed(object) {
            return Err(SandboxError::denied(format!("object {object}")));
        }
        Ok(object)
    }

    pub fn check_class(&self, name: &str) -> Result<(), SandboxError> {
        if self.policy.is_class_allowed(name) {
            Ok(())
        } else {
            log::error!("class '{name}' is not allowed");
            Err(SandboxError::denied(format!("class {name}")))
        }
    }

    /// Object and class checks for an object the host handed back.
    pub fn check_object<H: ObjectGraph>(&self, host: &H, object: ObjectId) -> Result<(), SandboxError> {
        if !self.policy.is_object_allowed(object) {
            log::error!("object {object} is not allowed");
            return Err(SandboxError::denied(format!("object {object}")));
        }
        self.check_class(&host.class_name(object)?)
    }

    pub fn check_method(&self, object: ObjectId, method: &str) -> Result<(), SandboxError> {
        if self.policy.is_method_allowed(object, method) {
            Ok(())
        } else {
            log::error!("method '{method}' on {object} is not allowed");
            Err(SandboxError::denied(format!("method {method}")))
        }
    }

    pub fn check_property(&self, object: ObjectId, property: &str, is_write: bool) -> Result<(), SandboxError> {
        if self.policy.is_property_allowed(object, property, is_write) {
            Ok(())
        } else {
            log::error!("property '{property}' on {object} is not allowed (write: {is_write})");
            Err(SandboxError::denied(format!("property {property}")))
        }
    }

    pub fn check_resource(&self, path: &str) -> Result<(), SandboxError> {
        if self.policy.is_resource_allowed(path) {
            Ok(())
        } else {
            log::error!("resource '{path}' is not allowed");
            Err(SandboxError::denied(format!("resource {path}")))
        }
    }

    /// `true` installs deny-all predicates for every check; `false` clears
    /// the whole policy and is refused mid-call.
    pub fn set_restrictions(&mut self, enabled: bool, in_call: bool) -> Result<(), SandboxError> {
        if enabled {
            self.policy.class_allowed = Some(Box::new(|_| false));
            self.policy.object_allowed = Some(Box::new(|_| false));
            self.policy.method_allowed = Some(Box::new(|_, _| false));
            self.policy.property_allowed = Some(Box::new(|_, _, _| false));
            self.policy.resource_allowed = Some(Box::new(|_| false));
            return Ok(());
        }
        if in_call {
            return Err(SandboxError::CallInProgress("disable restrictions"));
        }
        self.policy = AllowPolicy::default();
        Ok(())
    }

    pub fn is_restricted(&self) -> bool {
        self.policy.is_restricted()
    }

    pub fn allow_class(&mut self, name: &str) {
        self.policy.classes.insert(name.to_string());
    }

    pub fn remove_allowed_class(&mut self, name: &str, in_call: bool) -> Result<(), SandboxError> {
        Self::refuse_in_call(in_call, "remove allowed class")?;
        self.policy.classes.remove(name);
        Ok(())
    }

    pub fn allow_object(&mut self, object: ObjectId) {
        self.policy.objects.insert(object);
    }

    pub fn remove_allowed_object(&mut self, object: ObjectId, in_call: bool) -> Result<(), SandboxError> {
        Self::refuse_in_call(in_call, "remove allowed object")?;
        self.policy.objects.remove(&object);
        Ok(())
    }

    pub fn set_class_allowed(&mut self, p: Option<ClassPredicate>, in_call: bool) -> Result<(), SandboxError> {
        Self::refuse_in_call(in_call, "class predicate")?;
        self.policy.class_allowed = p;
        Ok(())
    }

    pub fn set_object_allowed(&mut self, p: Option<ObjectPredicate>, in_call: bool) -> Result<(), SandboxError> {
        Self::refuse_in_call(in_call, "object predicate")?;
        self.policy.object_allowed = p;
        Ok(())
    }

    pub fn set_method_allowed(&mut self, p: Option<MethodPredicate>, in_call: bool) -> Result<(), SandboxError> {
        Self::refuse_in_call(in_call, "method predicate")?;
        self.policy.method_allowed = p;
        Ok(())
    }

    pub fn set_property_allowed(&mut self, p: Option<PropertyPredicate>, in_call: bool) -> Result<(), SandboxError> {
        Self::refuse_in_call(in_call, "property predicate")?;
        self.policy.property_allowed = p;
        Ok(())
    }

    pub fn set_resource_allowed(&mut self, p: Option<ResourcePredicate>, in_call: bool) -> Result<(), SandboxError> {
        Self::refuse_in_call(in_call, "resource predicate")?;
        self.policy.resource_allowed = p;
        Ok(())
    }

    fn refuse_in_call(in_call: bool, what: &'static str) -> Result<(), SandboxError> {
        if in_call {
            log::warn!("refusing to change {what} while a call is in progress");
            return Err(SandboxError::CallInProgress(what));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scoped(ids: &[u32]) -> ScopedObjects {
        let mut objects = ScopedObjects::new(16);
        for id in ids {
            objects.scope(ObjectId(*id)).unwrap();
        }
        objects
    }

    #[test]
    fn resolve_order() {
        let guard = ObjectGuard::default();
        let objects = scoped(&[0x10_0000]);
        assert_eq!(guard.resolve(&objects, 0), Err(SandboxError::NullObject));
        assert_eq!(guard.resolve(&objects, 3), Err(SandboxError::UnscopedObject(ObjectId(3))));
        assert_eq!(guard.resolve(&objects, 0x10_0000).unwrap(), ObjectId(0x10_0000));
    }

    #[test]
    fn allow_lists_and_predicates() {
        let mut guard = ObjectGuard::default();
        assert!(guard.check_class("Node").is_ok());
        guard.allow_class("Node");
        assert!(guard.check_class("Node").is_ok());
        assert!(guard.check_class("Timer").is_err());
        guard.set_class_allowed(Some(Box::new(|name| name.starts_with("Ti"))), false).unwrap();
        assert!(guard.check_class("Timer").is_ok());

        let objects = scoped(&[0x10_0000, 0x10_0040]);
        guard.allow_object(ObjectId(0x10_0000));
        assert!(guard.resolve(&objects, 0x10_0000).is_ok());
        assert!(matches!(guard.resolve(&objects, 0x10_0040), Err(SandboxError::PermissionDenied(_))));
    }

    #[test]
    fn restrictions_cannot_be_lifted_mid_call() {
        let mut guard = ObjectGuard::default();
        guard.set_restrictions(true, true).unwrap();
        assert!(guard.is_restricted());
        assert!(guard.check_method(ObjectId(1), "free").is_err());
        assert!(guard.check_resource("res://a").is_err());
        assert!(guard.check_property(ObjectId(1), "x", false).is_err());
        assert_eq!(guard.set_restrictions(false, true), Err(SandboxError::CallInProgress("disable restrictions")));
        assert!(guard.set_method_allowed(None, true).is_err());
        assert!(guard.is_restricted());
        guard.set_restrictions(false, false).unwrap();
        assert!(!guard.is_restricted());
        assert!(guard.check_method(ObjectId(1), "free").is_ok());
    }
}
