use crate::object::ObjectId;
use crate::variant::Variant;

/// Something the host can invoke later.
///
/// `Guest` callables point at a function inside a sandboxed program. Only the
/// sandbox identified by `owner` can run them; everyone else just stores and
/// compares them.
#[derive(Debug, Clone, PartialEq)]
pub enum Callable {
    Guest {
        owner: ObjectId,
        address: u32,
        bound: Vec<Variant>,
    },
    Method {
        object: ObjectId,
        method: String,
        bound: Vec<Variant>,
    },
}

impl Callable {
    pub fn guest(owner: ObjectId, address: u32) -> Self {
        Callable::Guest { owner, address, bound: Vec::new() }
    }

    pub fn method(object: ObjectId, method: impl Into<String>) -> Self {
        Callable::Method { object, method: method.into(), bound: Vec::new() }
    }

    /// Appends arguments that are passed after the call-site arguments.
    pub fn bind(mut self, args: impl IntoIterator<Item = Variant>) -> Self {
        match &mut self {
            Callable::Guest { bound, .. } | Callable::Method { bound, .. } => bound.extend(args),
        }
        self
    }

    pub fn bound_args(&self) -> &[Variant] {
        match self {
            Callable::Guest { bound, .. } | Callable::Method { bound, .. } => bound,
        }
    }

    /// Call-site arguments followed by the bound ones.
    pub fn arguments(&self, call_args: &[Variant]) -> Vec<Variant> {
        let mut args = call_args.to_vec();
        args.extend_from_slice(self.bound_args());
        args
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Signal {
    pub object: ObjectId,
    pub name: String,
}
